// Swerve module control
//
// Provides:
// - Angle wrapping and module state types
// - Capability traits for the drive/steer actuators and angle sensors
// - Serial actuator bus protocol and bus-backed devices
// - Simulated hardware for tests and bench runs
// - The module controller (configure, command, read, tune, telemetry)

pub mod bus;
pub mod device;
mod filter;
pub mod geometry;
pub mod hardware;
mod module;
pub mod sim;
pub mod telemetry;

pub use device::{BusAngleSensor, BusMotor};
pub use geometry::{ModulePosition, ModuleState, Rotation2d, normalize_angle};
pub use hardware::{
    Actuator, AngleSensor, DriveActuator, HardwareError, IdleMode, PidfGains, StatusFrame,
    SteeringActuator,
};
pub use module::{GainChannel, Lifecycle, ModuleError, SwerveModule, configure_all};
pub use telemetry::{TelemetryFrame, TelemetrySink};
