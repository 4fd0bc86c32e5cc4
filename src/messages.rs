// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::swerve::{GainChannel, ModuleState, PidfGains, Rotation2d};

// Command from the drivetrain -> runtime, one per module topic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleCommand {
    pub speed_mps: f64,
    pub angle_rad: f64,
}

impl From<&ModuleCommand> for ModuleState {
    fn from(cmd: &ModuleCommand) -> Self {
        ModuleState::new(cmd.speed_mps, Rotation2d::from_radians(cmd.angle_rad))
    }
}

/// Live gain update for one onboard loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainUpdate {
    pub channel: GainChannel,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub ff: f64,
}

impl GainUpdate {
    pub fn gains(&self) -> PidfGains {
        PidfGains::new(self.p, self.i, self.d, self.ff)
    }
}

/// Reply to a `GainUpdate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneAck {
    pub channel: GainChannel,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wraps_angle() {
        let cmd: ModuleCommand =
            serde_json::from_str(r#"{"speed_mps": 2.0, "angle_rad": 3.3161255787892263}"#).unwrap();
        let state = ModuleState::from(&cmd);
        assert_eq!(state.speed, 2.0);
        assert!((state.angle.degrees() + 170.0).abs() < 1e-9);
    }

    #[test]
    fn test_gain_update_parse() {
        let update: GainUpdate =
            serde_json::from_str(r#"{"channel": "turn", "p": 0.5, "i": 0.0, "d": 0.02, "ff": 0.0}"#)
                .unwrap();
        assert_eq!(update.channel, GainChannel::Turn);
        assert_eq!(update.gains(), PidfGains::new(0.5, 0.0, 0.02, 0.0));
    }

    #[test]
    fn test_ack_omits_empty_reason() {
        let ack = TuneAck {
            channel: GainChannel::Drive,
            accepted: true,
            reason: None,
        };
        assert_eq!(
            serde_json::to_string(&ack).unwrap(),
            r#"{"channel":"drive","accepted":true}"#
        );
    }

    #[test]
    fn test_health_serialization() {
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(),
            r#""cmd_stale""#
        );
    }
}
