use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::RuntimeConfig;

/// Drive and steer swerve modules from commands received over Zenoh
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON runtime config (module table, gains, options)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run against simulated hardware
    #[arg(long)]
    sim: bool,

    /// Serial port of the actuator bus
    #[arg(long)]
    port: Option<String>,

    /// Enable shortest-path steering (flip angle, negate speed)
    #[arg(long)]
    optimize: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(2);
            }
        },
        None => RuntimeConfig::default(),
    };
    if args.sim {
        config.hardware = false;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.optimize {
        config.settings.optimize = true;
    }
    info!(
        "Loaded {} modules ({})",
        config.modules.len(),
        if config.hardware { "hardware" } else { "simulated" }
    );

    if let Err(e) = swerve_zenoh_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
