// Timeouts, topics, electrical limits, module table
use serde::Deserialize;
use std::collections::HashSet;
use std::f64::consts::{PI, TAU};
use std::path::Path;
use std::time::Duration;

use crate::swerve::PidfGains;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics; per-module topics live under swerve/<id>/...
pub const TOPIC_PREFIX: &str = "swerve";
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

pub fn topic_cmd(module: &str) -> String {
    format!("{}/{}/cmd", TOPIC_PREFIX, module)
}

pub fn topic_tune(module: &str) -> String {
    format!("{}/{}/tune", TOPIC_PREFIX, module)
}

pub fn topic_tune_ack(module: &str) -> String {
    format!("{}/{}/tune/ack", TOPIC_PREFIX, module)
}

pub fn topic_telemetry(module: &str) -> String {
    format!("{}/{}/telemetry", TOPIC_PREFIX, module)
}

// Serial port of the actuator bus bridge
pub const BUS_PORT: &str = "/dev/ttyACM0";

// Enable hardware control (set to false for simulation/testing)
pub const HARDWARE_ENABLED: bool = true;

// Electrical protection, not tunable at runtime
pub const CURRENT_LIMIT_AMPS: u16 = 40;
pub const NOMINAL_VOLTAGE: f64 = 12.0;

// Status frame periods: feedback frames at the loop rate, everything else as slow as allowed
pub const FEEDBACK_FRAME_PERIOD_MS: u16 = (1000 / LOOP_HZ) as u16;
pub const IDLE_FRAME_PERIOD_MS: u16 = u16::MAX;

// burnFlash makes the controllers drop frames for a while
pub const SETTLE_DELAY: Duration = Duration::from_millis(200);

// Mechanics
pub const WHEEL_DIAMETER_M: f64 = 0.1016; // 4 in
pub const DRIVE_GEAR_RATIO: f64 = 6.75;
pub const TURN_GEAR_RATIO: f64 = 150.0 / 7.0;

pub const TURN_ROTATIONS_TO_RADIANS: f64 = TAU / TURN_GEAR_RATIO;
pub const DRIVE_ROTATIONS_TO_METERS: f64 = PI * WHEEL_DIAMETER_M / DRIVE_GEAR_RATIO;
pub const DRIVE_RPM_TO_METERS_PER_SECOND: f64 = DRIVE_ROTATIONS_TO_METERS / 60.0;

// Closed-loop gains
pub const DRIVE_GAINS: PidfGains = PidfGains::new(0.05, 0.0, 0.0, 0.22);
pub const TURN_GAINS: PidfGains = PidfGains::new(0.6, 0.0, 0.01, 0.0);

// Consecutive identical commands before the idle re-seed fires
pub const IDLE_DEBOUNCE_TICKS: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Identity and wiring of one swerve module
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleConfig {
    /// Telemetry namespace, e.g. "FL"
    pub id: String,
    pub drive_id: u8,
    pub turn_id: u8,
    pub abs_encoder_id: u8,
    #[serde(default)]
    pub drive_inverted: bool,
    #[serde(default)]
    pub turn_inverted: bool,
    /// Magnet offset of the absolute encoder
    pub mag_offset_deg: f64,
}

impl ModuleConfig {
    pub fn channels(&self) -> [u8; 3] {
        [self.drive_id, self.turn_id, self.abs_encoder_id]
    }
}

/// Controller settings shared by every module
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModuleSettings {
    pub drive_gains: PidfGains,
    pub turn_gains: PidfGains,
    pub current_limit_amps: u16,
    pub nominal_voltage: f64,
    pub feedback_frame_period_ms: u16,
    pub idle_frame_period_ms: u16,
    pub turn_rotations_to_radians: f64,
    pub drive_rotations_to_meters: f64,
    pub drive_rpm_to_meters_per_second: f64,
    pub settle_delay_ms: u64,
    /// Flip the target by π and negate speed instead of turning past 90°
    pub optimize: bool,
    /// Scale speed by cos(steering error)
    pub cosine_scaling: bool,
    /// Re-seed the relative encoder from the absolute one once the command has been idle
    pub reseed_on_idle: bool,
    pub idle_debounce_ticks: u32,
}

impl ModuleSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.current_limit_amps == 0 {
            return Err(ConfigError::Invalid("current_limit_amps must be nonzero".to_string()));
        }
        if !self.nominal_voltage.is_finite() || self.nominal_voltage <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "nominal_voltage {} must be positive",
                self.nominal_voltage
            )));
        }
        if self.feedback_frame_period_ms == 0 || self.idle_frame_period_ms == 0 {
            return Err(ConfigError::Invalid("frame periods must be nonzero".to_string()));
        }
        let conversions = [
            self.turn_rotations_to_radians,
            self.drive_rotations_to_meters,
            self.drive_rpm_to_meters_per_second,
        ];
        if conversions.iter().any(|c| !c.is_finite() || *c == 0.0) {
            return Err(ConfigError::Invalid(
                "conversion factors must be finite and nonzero".to_string(),
            ));
        }
        if self.idle_debounce_ticks == 0 {
            return Err(ConfigError::Invalid("idle_debounce_ticks must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            drive_gains: DRIVE_GAINS,
            turn_gains: TURN_GAINS,
            current_limit_amps: CURRENT_LIMIT_AMPS,
            nominal_voltage: NOMINAL_VOLTAGE,
            feedback_frame_period_ms: FEEDBACK_FRAME_PERIOD_MS,
            idle_frame_period_ms: IDLE_FRAME_PERIOD_MS,
            turn_rotations_to_radians: TURN_ROTATIONS_TO_RADIANS,
            drive_rotations_to_meters: DRIVE_ROTATIONS_TO_METERS,
            drive_rpm_to_meters_per_second: DRIVE_RPM_TO_METERS_PER_SECOND,
            settle_delay_ms: SETTLE_DELAY.as_millis() as u64,
            optimize: false,
            cosine_scaling: false,
            reseed_on_idle: false,
            idle_debounce_ticks: IDLE_DEBOUNCE_TICKS,
        }
    }
}

impl ModuleSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Four-corner module table
pub fn default_modules() -> Vec<ModuleConfig> {
    let module = |id: &str, base: u8, mag_offset_deg: f64, drive_inverted: bool| ModuleConfig {
        id: id.to_string(),
        drive_id: base,
        turn_id: base + 1,
        abs_encoder_id: base + 2,
        drive_inverted,
        turn_inverted: false,
        mag_offset_deg,
    };
    vec![
        module("FL", 1, 15.0, false),
        module("FR", 4, -92.46, true),
        module("BL", 7, 201.18, false),
        module("BR", 10, 47.64, true),
    ]
}

fn default_port() -> String {
    BUS_PORT.to_string()
}

fn default_hardware() -> bool {
    HARDWARE_ENABLED
}

/// Everything the runtime needs to bring up its modules
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_hardware")]
    pub hardware: bool,
    #[serde(default)]
    pub settings: ModuleSettings,
    #[serde(default = "default_modules")]
    pub modules: Vec<ModuleConfig>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            hardware: default_hardware(),
            settings: ModuleSettings::default(),
            modules: default_modules(),
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Every module id and bus channel must be bound exactly once
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;
        if self.modules.is_empty() {
            return Err(ConfigError::Invalid("no modules configured".to_string()));
        }

        let mut ids = HashSet::new();
        let mut channels = HashSet::new();
        for module in &self.modules {
            if !ids.insert(module.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate module id {}",
                    module.id
                )));
            }
            for channel in module.channels() {
                if !channels.insert(channel) {
                    return Err(ConfigError::Invalid(format!(
                        "channel {} of module {} is already bound",
                        channel, module.id
                    )));
                }
            }
        }
        Ok(())
    }
}
