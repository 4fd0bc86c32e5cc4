// Capabilities the module controller needs from the hardware-access layer
//
// The controller only talks to these traits. `device` implements them over the
// serial actuator bus, `sim` implements them in memory for tests and simulation.

use serde::{Deserialize, Serialize};

/// Error types for actuator and sensor access
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from device {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for device {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Device {id} returned error status: 0x{status:02X}")]
    DeviceStatus { id: u8, status: u8 },

    #[error("Timeout waiting for response from device {id}")]
    Timeout { id: u8 },

    #[error("Device {id} rejected setting: {reason}")]
    Rejected { id: u8, reason: String },
}

pub type Result<T> = std::result::Result<T, HardwareError>;

/// Behavior of an actuator with no active command
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleMode {
    Coast = 0,
    Brake = 1,
}

/// Periodic status reports an actuator emits on the bus
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusFrame {
    /// Applied output, faults
    Faults = 0,
    /// Velocity, temperature, current
    Velocity = 1,
    /// Motor position
    Position = 2,
    AnalogSensor = 3,
    AltEncoder = 4,
    DutyCycleAbsolute = 5,
    DutyCycleVelocity = 6,
}

impl StatusFrame {
    pub const ALL: [StatusFrame; 7] = [
        StatusFrame::Faults,
        StatusFrame::Velocity,
        StatusFrame::Position,
        StatusFrame::AnalogSensor,
        StatusFrame::AltEncoder,
        StatusFrame::DutyCycleAbsolute,
        StatusFrame::DutyCycleVelocity,
    ];
}

/// Proportional, integral, derivative and feedforward gains of an onboard loop
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidfGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub ff: f64,
}

impl PidfGains {
    pub const fn new(p: f64, i: f64, d: f64, ff: f64) -> Self {
        Self { p, i, d, ff }
    }
}

/// Settings shared by every motor controller on the bus
pub trait Actuator {
    fn set_inverted(&mut self, inverted: bool) -> Result<()>;

    fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()>;

    fn set_current_limit(&mut self, amps: u16) -> Result<()>;

    /// Scale output so behavior does not depend on supply voltage
    fn enable_voltage_compensation(&mut self, nominal_volts: f64) -> Result<()>;

    fn set_status_period(&mut self, frame: StatusFrame, period_ms: u16) -> Result<()>;

    /// Overwrite the onboard closed-loop gains
    fn set_gains(&mut self, gains: PidfGains) -> Result<()>;

    /// Duty cycle currently applied, in [-1, 1]
    fn applied_output(&mut self) -> Result<f64>;

    /// Persist all settings to non-volatile memory
    fn burn(&mut self) -> Result<()>;
}

/// Velocity-controlled drive motor with its integrated encoder
pub trait DriveActuator: Actuator {
    /// Scale native rotations / RPM into meters / meters per second
    fn set_conversion_factors(&mut self, position: f64, velocity: f64) -> Result<()>;

    fn set_velocity_target(&mut self, meters_per_second: f64) -> Result<()>;

    fn velocity(&mut self) -> Result<f64>;

    /// Cumulative distance since power-on, never wrapped
    fn position(&mut self) -> Result<f64>;
}

/// Position-controlled steering motor
pub trait SteeringActuator: Actuator {
    fn set_position_target(&mut self, radians: f64) -> Result<()>;

    /// Treat `min` and `max` as the same point so the loop takes the shortest path
    fn enable_continuous_wrap(&mut self, min: f64, max: f64) -> Result<()>;
}

/// Absolute steering encoder paired with the steering motor's relative encoder
pub trait AngleSensor {
    /// Magnet offset of the absolute encoder, in degrees
    fn set_zero_offset(&mut self, degrees: f64) -> Result<()>;

    /// Scale relative encoder rotations into radians
    fn set_relative_conversion(&mut self, factor: f64) -> Result<()>;

    /// Absolute angle in radians (offset applied, not necessarily wrapped)
    fn read_absolute(&mut self) -> Result<f64>;

    /// Relative angle in radians, unbounded across rotations
    fn read_relative(&mut self) -> Result<f64>;

    /// Overwrite the relative encoder's position
    fn seed_relative(&mut self, radians: f64) -> Result<()>;
}
