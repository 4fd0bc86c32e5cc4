// Rising-edge debouncer counted in control periods

/// Reports `true` only after the input has been `true` for `ticks` consecutive calls.
/// A single `false` resets the count.
#[derive(Debug, Clone)]
pub struct Debouncer {
    ticks: u32,
    count: u32,
}

impl Debouncer {
    /// `ticks` below one is treated as one, so a `false` input never reads as on
    pub fn new(ticks: u32) -> Self {
        Self {
            ticks: ticks.max(1),
            count: 0,
        }
    }

    pub fn calculate(&mut self, input: bool) -> bool {
        if input {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }
        self.count >= self.ticks
    }

    /// True on exactly the call where the debounced output first turns on
    pub fn rising(&mut self, input: bool) -> bool {
        let was_on = self.count >= self.ticks;
        let on = self.calculate(input);
        on && !was_on
    }
}
