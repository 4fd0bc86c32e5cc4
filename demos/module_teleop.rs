// Keyboard teleop for one module: W/S drive, A/D steer, R/F speed, Q quit
//
// Usage: cargo run --example module_teleop -- [module id]
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tracing::info;

use swerve_zenoh_runtime::config::topic_cmd;
use swerve_zenoh_runtime::messages::ModuleCommand;

const SPEEDS: [f64; 3] = [0.25, 1.0, 2.5]; // m/s
const STEER_STEP_RAD: f64 = PI / 12.0; // 15 deg per key press
const INPUT_TIMEOUT_MS: u64 = 100; // Reset speed after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let module = std::env::args().nth(1).unwrap_or_else(|| "FL".to_string());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(topic_cmd(&module)).await?;

    info!("Driving module {}", module);
    info!("Controls: W/S=drive, A/D=steer, R/F=speed, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Steering angle persists, speed falls back to zero without input
    let mut speed = 0.0;
    let mut angle = 0.0;
    let mut last_drive_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        speed = SPEEDS[speed_idx];
                        last_drive_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        speed = -SPEEDS[speed_idx];
                        last_drive_input = Instant::now();
                    }

                    // The runtime wraps the angle, no need to here
                    KeyCode::Char('a') if pressed => angle += STEER_STEP_RAD,
                    KeyCode::Char('d') if pressed => angle -= STEER_STEP_RAD,

                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_drive_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            speed = 0.0;
        }

        // Always publish at ~50Hz so the runtime watchdog stays fed
        let cmd = ModuleCommand {
            speed_mps: speed,
            angle_rad: angle,
        };
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({} m/s)", label, SPEEDS[idx]);
}
