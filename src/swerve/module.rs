// Swerve module controller
//
// Owns one drive actuator, one steering actuator and the steering angle
// sensors. Targets are handed to the actuators' onboard loops; nothing here
// closes a loop itself.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::filter::Debouncer;
use super::geometry::{ModulePosition, ModuleState, Rotation2d};
use super::hardware::{
    Actuator, AngleSensor, DriveActuator, HardwareError, IdleMode, PidfGains, StatusFrame,
    SteeringActuator,
};
use super::telemetry::TelemetrySink;
use crate::config::{ModuleConfig, ModuleSettings};

/// Status frames the drive loop and odometry depend on
const DRIVE_FEEDBACK_FRAMES: [StatusFrame; 2] = [StatusFrame::Velocity, StatusFrame::Position];
/// Status frames the steering loop depends on
const TURN_FEEDBACK_FRAMES: [StatusFrame; 1] = [StatusFrame::Position];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unconfigured,
    Configuring,
    Ready,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Unconfigured => "unconfigured",
            Lifecycle::Configuring => "configuring",
            Lifecycle::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Which onboard loop a gain set belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainChannel {
    Drive,
    Turn,
}

impl fmt::Display for GainChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GainChannel::Drive => f.write_str("drive"),
            GainChannel::Turn => f.write_str("turn"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("Module {module}: hardware error: {source}")]
    Hardware {
        module: String,
        #[source]
        source: HardwareError,
    },

    #[error("Module {module} is {state}, commands need it ready")]
    NotReady { module: String, state: Lifecycle },

    #[error("Module {module} was already configured")]
    AlreadyConfigured { module: String },

    #[error("Module {module}: {field} must be finite, got {value}")]
    InvalidCommand {
        module: String,
        field: &'static str,
        value: f64,
    },

    #[error("Module {module}: {channel} gains rejected: {source}")]
    GainsRejected {
        module: String,
        channel: GainChannel,
        #[source]
        source: HardwareError,
    },
}

/// Shared setup for both motors: direction, braking, electrical limits, bus traffic
fn configure_motor<M: Actuator>(
    motor: &mut M,
    inverted: bool,
    settings: &ModuleSettings,
    feedback_frames: &[StatusFrame],
) -> Result<(), HardwareError> {
    motor.set_inverted(inverted)?;
    motor.set_idle_mode(IdleMode::Brake)?;
    motor.set_current_limit(settings.current_limit_amps)?;
    motor.enable_voltage_compensation(settings.nominal_voltage)?;

    for frame in StatusFrame::ALL {
        let period = if feedback_frames.contains(&frame) {
            settings.feedback_frame_period_ms
        } else {
            settings.idle_frame_period_ms
        };
        motor.set_status_period(frame, period)?;
    }
    Ok(())
}

/// One drive + steer wheel unit
pub struct SwerveModule<D, S, A> {
    config: ModuleConfig,
    settings: ModuleSettings,

    drive: D,
    steering: S,
    sensor: A,

    lifecycle: Lifecycle,
    desired_state: Option<ModuleState>,
    last_command: Option<ModuleState>,
    idle: Debouncer,
    telemetry_faulted: bool,
}

impl<D, S, A> SwerveModule<D, S, A>
where
    D: DriveActuator,
    S: SteeringActuator,
    A: AngleSensor,
{
    /// Bind the handles; nothing is written to the hardware until `configure`
    pub fn new(
        config: ModuleConfig,
        settings: ModuleSettings,
        drive: D,
        steering: S,
        sensor: A,
    ) -> Self {
        let idle = Debouncer::new(settings.idle_debounce_ticks);
        Self {
            config,
            settings,
            drive,
            steering,
            sensor,
            lifecycle: Lifecycle::Unconfigured,
            desired_state: None,
            last_command: None,
            idle,
            telemetry_faulted: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle == Lifecycle::Ready
    }

    /// Last target sent to the actuators, `None` before the first command
    pub fn desired_state(&self) -> Option<ModuleState> {
        self.desired_state
    }

    fn fault(&self, source: HardwareError) -> ModuleError {
        ModuleError::Hardware {
            module: self.config.id.clone(),
            source,
        }
    }

    fn ensure_ready(&self) -> Result<(), ModuleError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ModuleError::NotReady {
                module: self.config.id.clone(),
                state: self.lifecycle,
            })
        }
    }

    /// Configure and persist both actuators, seed the steering encoder, then wait
    /// out the post-burn settle window.
    ///
    /// Blocks for `settings.settle_delay()`. Any rejected setting aborts
    /// configuration and the module never becomes ready.
    pub fn configure(&mut self) -> Result<(), ModuleError> {
        if self.lifecycle != Lifecycle::Unconfigured {
            return Err(ModuleError::AlreadyConfigured {
                module: self.config.id.clone(),
            });
        }
        self.lifecycle = Lifecycle::Configuring;
        info!(
            "Configuring module {} (drive {}, turn {}, encoder {})",
            self.config.id, self.config.drive_id, self.config.turn_id, self.config.abs_encoder_id
        );

        self.configure_motors()?;
        self.configure_encoders()?;
        self.configure_controllers()?;
        self.burn_flash()?;

        self.lifecycle = Lifecycle::Ready;
        info!("Module {} ready", self.config.id);
        Ok(())
    }

    fn configure_motors(&mut self) -> Result<(), ModuleError> {
        configure_motor(
            &mut self.drive,
            self.config.drive_inverted,
            &self.settings,
            &DRIVE_FEEDBACK_FRAMES,
        )
        .map_err(|e| self.fault(e))?;
        configure_motor(
            &mut self.steering,
            self.config.turn_inverted,
            &self.settings,
            &TURN_FEEDBACK_FRAMES,
        )
        .map_err(|e| self.fault(e))?;
        debug!("Module {}: motors configured", self.config.id);
        Ok(())
    }

    fn configure_encoders(&mut self) -> Result<(), ModuleError> {
        self.sensor
            .set_zero_offset(self.config.mag_offset_deg)
            .map_err(|e| self.fault(e))?;
        self.sensor
            .set_relative_conversion(self.settings.turn_rotations_to_radians)
            .map_err(|e| self.fault(e))?;
        self.drive
            .set_conversion_factors(
                self.settings.drive_rotations_to_meters,
                self.settings.drive_rpm_to_meters_per_second,
            )
            .map_err(|e| self.fault(e))?;

        let seed = self.seed_from_absolute()?;
        debug!(
            "Module {}: relative encoder seeded at {:.2} deg",
            self.config.id,
            seed.degrees()
        );
        Ok(())
    }

    fn configure_controllers(&mut self) -> Result<(), ModuleError> {
        self.drive
            .set_gains(self.settings.drive_gains)
            .map_err(|e| self.fault(e))?;
        self.steering
            .set_gains(self.settings.turn_gains)
            .map_err(|e| self.fault(e))?;
        self.steering
            .enable_continuous_wrap(-PI, PI)
            .map_err(|e| self.fault(e))?;
        Ok(())
    }

    fn burn_flash(&mut self) -> Result<(), ModuleError> {
        self.drive.burn().map_err(|e| self.fault(e))?;
        self.steering.burn().map_err(|e| self.fault(e))?;

        // Controllers drop frames right after a burn
        let settle = self.settings.settle_delay();
        if !settle.is_zero() {
            debug!("Module {}: settling for {:?}", self.config.id, settle);
            std::thread::sleep(settle);
        }
        Ok(())
    }

    fn seed_from_absolute(&mut self) -> Result<Rotation2d, ModuleError> {
        let absolute = self.absolute_angle()?;
        self.sensor
            .seed_relative(absolute.radians())
            .map_err(|e| self.fault(e))?;
        Ok(absolute)
    }

    /// Re-seed the steering relative encoder from the absolute encoder
    pub fn reseed(&mut self) -> Result<(), ModuleError> {
        self.ensure_ready()?;
        let seed = self.seed_from_absolute()?;
        info!(
            "Module {}: relative encoder re-seeded at {:.2} deg",
            self.config.id,
            seed.degrees()
        );
        Ok(())
    }

    /// Send a new drive velocity and steering angle target
    ///
    /// Every call reaches both actuators, even when `state` repeats the last one.
    pub fn set_desired_state(&mut self, state: ModuleState) -> Result<(), ModuleError> {
        self.ensure_ready()?;
        if !state.speed.is_finite() {
            return Err(self.invalid("speed", state.speed));
        }
        if !state.angle.is_finite() {
            return Err(self.invalid("angle", state.angle.radians()));
        }

        if self.settings.reseed_on_idle {
            let idle = self.last_command == Some(state);
            if self.idle.rising(idle) {
                self.reseed()?;
            }
        }

        let mut target = state;
        if self.settings.optimize || self.settings.cosine_scaling {
            let current = self.relative_angle()?;
            if self.settings.optimize {
                target = target.optimize(current);
            }
            if self.settings.cosine_scaling {
                target = target.scale_by_error(current);
            }
        }

        self.drive
            .set_velocity_target(target.speed)
            .map_err(|e| self.fault(e))?;
        self.steering
            .set_position_target(target.angle.radians())
            .map_err(|e| self.fault(e))?;

        self.desired_state = Some(target);
        self.last_command = Some(state);
        Ok(())
    }

    fn invalid(&self, field: &'static str, value: f64) -> ModuleError {
        warn!("Module {}: rejecting {} = {}", self.config.id, field, value);
        ModuleError::InvalidCommand {
            module: self.config.id.clone(),
            field,
            value,
        }
    }

    /// Live wheel speed and steering angle
    pub fn get_state(&mut self) -> Result<ModuleState, ModuleError> {
        let speed = self.drive.velocity().map_err(|e| self.fault(e))?;
        Ok(ModuleState::new(speed, self.relative_angle()?))
    }

    /// Cumulative drive distance and steering angle, for odometry
    pub fn get_position(&mut self) -> Result<ModulePosition, ModuleError> {
        let distance = self.drive.position().map_err(|e| self.fault(e))?;
        Ok(ModulePosition::new(distance, self.relative_angle()?))
    }

    fn relative_angle(&mut self) -> Result<Rotation2d, ModuleError> {
        // Unbounded across rotations; Rotation2d wraps it
        let raw = self.sensor.read_relative().map_err(|e| self.fault(e))?;
        Ok(Rotation2d::from_radians(raw))
    }

    fn absolute_angle(&mut self) -> Result<Rotation2d, ModuleError> {
        let raw = self.sensor.read_absolute().map_err(|e| self.fault(e))?;
        Ok(Rotation2d::from_radians(raw))
    }

    pub fn set_drive_pidf(&mut self, p: f64, i: f64, d: f64, ff: f64) -> Result<(), ModuleError> {
        self.tune(GainChannel::Drive, PidfGains::new(p, i, d, ff))
    }

    pub fn set_turn_pidf(&mut self, p: f64, i: f64, d: f64, ff: f64) -> Result<(), ModuleError> {
        self.tune(GainChannel::Turn, PidfGains::new(p, i, d, ff))
    }

    /// Overwrite one onboard gain set; takes effect on the actuator's next loop tick
    pub fn tune(&mut self, channel: GainChannel, gains: PidfGains) -> Result<(), ModuleError> {
        self.ensure_ready()?;
        let result = match channel {
            GainChannel::Drive => self.drive.set_gains(gains),
            GainChannel::Turn => self.steering.set_gains(gains),
        };
        result.map_err(|source| {
            warn!("Module {}: {} gains rejected: {}", self.config.id, channel, source);
            ModuleError::GainsRejected {
                module: self.config.id.clone(),
                channel,
                source,
            }
        })?;
        info!(
            "Module {}: {} gains set to p={} i={} d={} ff={}",
            self.config.id, channel, gains.p, gains.i, gains.d, gains.ff
        );
        Ok(())
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.config.id, name)
    }

    /// Publish current state, desired state and applied outputs
    ///
    /// Read failures skip the affected keys; this never fails.
    pub fn periodic(&mut self, sink: &mut dyn TelemetrySink) {
        if !self.is_ready() {
            return;
        }

        let mut faults = Vec::new();
        match self.get_state() {
            Ok(state) => {
                sink.publish(&self.key("current_speed_mps"), state.speed);
                sink.publish(&self.key("current_angle_deg"), state.angle.degrees());
            }
            Err(e) => faults.push(e.to_string()),
        }

        // Cross-check between the absolute and relative encoders
        match self.absolute_angle() {
            Ok(angle) => sink.publish(&self.key("absolute_angle_deg"), angle.degrees()),
            Err(e) => faults.push(e.to_string()),
        }

        match self.drive.applied_output() {
            Ok(output) => sink.publish(&self.key("drive_output"), output),
            Err(e) => faults.push(format!("drive output: {}", e)),
        }
        match self.steering.applied_output() {
            Ok(output) => sink.publish(&self.key("turn_output"), output),
            Err(e) => faults.push(format!("turn output: {}", e)),
        }

        // Warn once per failure streak
        if faults.is_empty() {
            if self.telemetry_faulted {
                info!("Telemetry: module {} reads recovered", self.config.id);
            }
            self.telemetry_faulted = false;
        } else if !self.telemetry_faulted {
            warn!("Telemetry: module {}: {}", self.config.id, faults.join("; "));
            self.telemetry_faulted = true;
        } else {
            debug!("Telemetry: module {}: {}", self.config.id, faults.join("; "));
        }

        if let Some(desired) = self.desired_state {
            sink.publish(&self.key("target_speed_mps"), desired.speed);
            sink.publish(&self.key("target_angle_deg"), desired.angle.degrees());
        }
    }
}

/// Configure every module at once, one thread each, so settle windows overlap
///
/// Returns the first error; the other modules still finish their own configuration.
pub fn configure_all<D, S, A>(modules: &mut [SwerveModule<D, S, A>]) -> Result<(), ModuleError>
where
    D: DriveActuator + Send,
    S: SteeringActuator + Send,
    A: AngleSensor + Send,
{
    let results: Vec<Result<(), ModuleError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = modules
            .iter_mut()
            .map(|module| scope.spawn(move || module.configure()))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swerve::geometry::normalize_angle;
    use crate::swerve::sim::{SimAngleSensor, SimDevice, SimDrive, SimHardware, SimOp, SimSteering};
    use crate::swerve::telemetry::TelemetryFrame;
    use std::f64::consts::TAU;
    use std::time::{Duration, Instant};

    type SimModule = SwerveModule<SimDrive, SimSteering, SimAngleSensor>;

    fn fl_config() -> ModuleConfig {
        ModuleConfig {
            id: "FL".to_string(),
            drive_id: 1,
            turn_id: 2,
            abs_encoder_id: 3,
            drive_inverted: false,
            turn_inverted: false,
            mag_offset_deg: 15.0,
        }
    }

    fn fast_settings() -> ModuleSettings {
        ModuleSettings {
            settle_delay_ms: 0,
            ..ModuleSettings::default()
        }
    }

    fn build_with(settings: ModuleSettings, wheel_angle: f64) -> (SimModule, SimHardware) {
        let config = fl_config();
        let sim = SimHardware::for_module(&config).with_wheel_angle(wheel_angle);
        let module = SwerveModule::new(config, settings, sim.drive(), sim.steering(), sim.sensor());
        (module, sim)
    }

    fn ready_with(settings: ModuleSettings, wheel_angle: f64) -> (SimModule, SimHardware) {
        let (mut module, sim) = build_with(settings, wheel_angle);
        module.configure().unwrap();
        (module, sim)
    }

    fn ready() -> (SimModule, SimHardware) {
        ready_with(fast_settings(), 0.0)
    }

    #[test]
    fn test_configure_scenario() {
        let (module, sim) = ready();
        let hw = sim.snapshot();

        assert_eq!(module.lifecycle(), Lifecycle::Ready);
        assert_eq!(hw.wrap, Some((-PI, PI)));
        assert_eq!(hw.drive.idle_mode, IdleMode::Brake);
        assert_eq!(hw.turn.idle_mode, IdleMode::Brake);
        assert_eq!(hw.zero_offset_deg, 15.0);
        for motor in [&hw.drive, &hw.turn] {
            assert!(!motor.inverted);
            assert_eq!(motor.current_limit, Some(40));
            assert_eq!(motor.nominal_voltage, Some(12.0));
            assert_eq!(motor.burn_count, 1);
            assert_eq!(motor.command_count, 0);
        }
        assert_eq!(hw.drive.gains, fast_settings().drive_gains);
        assert_eq!(hw.turn.gains, fast_settings().turn_gains);
        assert_eq!(hw.relative_conversion, fast_settings().turn_rotations_to_radians);
    }

    #[test]
    fn test_status_frames_keep_feedback_fast() {
        let (_module, sim) = ready();
        let hw = sim.snapshot();

        assert_eq!(hw.drive.status_periods.len(), StatusFrame::ALL.len());
        assert_eq!(hw.drive.status_periods[&StatusFrame::Velocity], 20);
        assert_eq!(hw.drive.status_periods[&StatusFrame::Position], 20);
        assert_eq!(hw.drive.status_periods[&StatusFrame::Faults], u16::MAX);
        assert_eq!(hw.drive.status_periods[&StatusFrame::DutyCycleVelocity], u16::MAX);

        assert_eq!(hw.turn.status_periods[&StatusFrame::Position], 20);
        assert_eq!(hw.turn.status_periods[&StatusFrame::Velocity], u16::MAX);
        assert_eq!(hw.turn.status_periods[&StatusFrame::AnalogSensor], u16::MAX);
    }

    #[test]
    fn test_inversion_flags_applied() {
        let mut config = fl_config();
        config.drive_inverted = true;
        let sim = SimHardware::for_module(&config);
        let mut module =
            SwerveModule::new(config, fast_settings(), sim.drive(), sim.steering(), sim.sensor());
        module.configure().unwrap();

        let hw = sim.snapshot();
        assert!(hw.drive.inverted);
        assert!(!hw.turn.inverted);
    }

    #[test]
    fn test_seeding_matches_absolute() {
        // Wheel sits two full turns plus 2.5 rad from where the relative encoder powered on
        let (mut module, sim) = build_with(fast_settings(), 0.4);
        sim.disturb_wheel(2.0 * TAU + 2.1);
        let unseeded = module.get_state().unwrap().angle;
        assert!((unseeded.radians() - normalize_angle(2.0 * TAU + 2.1)).abs() < 1e-9);

        module.configure().unwrap();

        let relative = module.get_state().unwrap().angle;
        let absolute = module.absolute_angle().unwrap();
        assert!((relative.radians() - absolute.radians()).abs() < 1e-9);
        assert!((relative.radians() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_state_and_position_angles_agree() {
        let (mut module, sim) = ready();
        sim.disturb_wheel(5.0 * TAU + 0.3);

        let state = module.get_state().unwrap();
        let position = module.get_position().unwrap();
        assert_eq!(state.angle, position.angle);
        assert!(state.angle.radians() > -PI && state.angle.radians() <= PI);
        assert!((state.angle.radians() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_set_desired_state_190_degrees() {
        let (mut module, sim) = ready();
        module
            .set_desired_state(ModuleState::new(2.0, Rotation2d::from_degrees(190.0)))
            .unwrap();

        let desired = module.desired_state().unwrap();
        assert!((desired.angle.degrees() + 170.0).abs() < 1e-9);
        assert_eq!(desired.speed, 2.0);

        let hw = sim.snapshot();
        assert_eq!(hw.velocity_target, Some(2.0));
        assert!((hw.position_target.unwrap() - (-170f64).to_radians()).abs() < 1e-9);
    }

    #[test]
    fn test_desired_state_round_trip() {
        let (mut module, _sim) = ready();
        assert_eq!(module.desired_state(), None);

        for (speed, deg) in [(0.0, 0.0), (1.25, 45.0), (-3.0, -135.0), (4.0, 180.0), (0.5, 720.5)] {
            let state = ModuleState::new(speed, Rotation2d::from_degrees(deg));
            module.set_desired_state(state).unwrap();
            assert_eq!(module.desired_state(), Some(state));
        }
    }

    #[test]
    fn test_identical_commands_are_not_deduplicated() {
        let (mut module, sim) = ready();
        let state = ModuleState::new(1.0, Rotation2d::from_degrees(30.0));
        module.set_desired_state(state).unwrap();
        module.set_desired_state(state).unwrap();

        let hw = sim.snapshot();
        assert_eq!(hw.drive.command_count, 2);
        assert_eq!(hw.turn.command_count, 2);
    }

    #[test]
    fn test_commands_rejected_before_ready() {
        let (mut module, sim) = build_with(fast_settings(), 0.0);
        let err = module
            .set_desired_state(ModuleState::new(1.0, Rotation2d::default()))
            .unwrap_err();
        assert!(matches!(
            err,
            ModuleError::NotReady {
                state: Lifecycle::Unconfigured,
                ..
            }
        ));
        assert!(matches!(
            module.set_drive_pidf(1.0, 0.0, 0.0, 0.0),
            Err(ModuleError::NotReady { .. })
        ));
        assert_eq!(sim.snapshot().drive.command_count, 0);
        assert_eq!(sim.snapshot().velocity_target, None);
    }

    #[test]
    fn test_non_finite_commands_rejected() {
        let (mut module, sim) = ready();
        let good = ModuleState::new(1.0, Rotation2d::from_degrees(10.0));
        module.set_desired_state(good).unwrap();

        let err = module
            .set_desired_state(ModuleState::new(f64::NAN, Rotation2d::default()))
            .unwrap_err();
        assert!(matches!(err, ModuleError::InvalidCommand { field: "speed", .. }));

        let err = module
            .set_desired_state(ModuleState::new(1.0, Rotation2d::from_radians(f64::INFINITY)))
            .unwrap_err();
        assert!(matches!(err, ModuleError::InvalidCommand { field: "angle", .. }));

        assert_eq!(module.desired_state(), Some(good));
        assert_eq!(sim.snapshot().drive.command_count, 1);
        assert_eq!(sim.snapshot().turn.command_count, 1);
    }

    #[test]
    fn test_distance_monotonic_under_forward_drive() {
        let (mut module, sim) = ready();
        let mut last = module.get_position().unwrap().distance;
        for i in 0..50 {
            let speed = (i % 7) as f64 * 0.3;
            module
                .set_desired_state(ModuleState::new(speed, Rotation2d::from_degrees(i as f64 * 13.0)))
                .unwrap();
            sim.step(Duration::from_millis(20));
            let distance = module.get_position().unwrap().distance;
            assert!(distance >= last, "distance went from {} to {}", last, distance);
            last = distance;
        }
        assert!(last > 0.0);
    }

    #[test]
    fn test_configuration_failure_is_fatal() {
        let (mut module, sim) = build_with(fast_settings(), 0.0);
        sim.fail_on(SimDevice::Drive, SimOp::CurrentLimit);

        let err = module.configure().unwrap_err();
        assert!(matches!(
            err,
            ModuleError::Hardware {
                source: HardwareError::Timeout { id: 1 },
                ..
            }
        ));
        assert_eq!(module.lifecycle(), Lifecycle::Configuring);
        assert_eq!(sim.snapshot().drive.burn_count, 0);
        assert!(matches!(
            module.set_desired_state(ModuleState::default()),
            Err(ModuleError::NotReady {
                state: Lifecycle::Configuring,
                ..
            })
        ));
    }

    #[test]
    fn test_configure_only_once() {
        let (mut module, sim) = ready();
        assert!(matches!(
            module.configure(),
            Err(ModuleError::AlreadyConfigured { .. })
        ));
        assert_eq!(sim.snapshot().drive.burn_count, 1);
    }

    #[test]
    fn test_settle_delay_blocks_configure() {
        let settings = ModuleSettings {
            settle_delay_ms: 50,
            ..ModuleSettings::default()
        };
        let (mut module, _sim) = build_with(settings, 0.0);
        let start = Instant::now();
        module.configure().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_tuning_updates_onboard_gains() {
        let (mut module, sim) = ready();
        module.set_turn_pidf(1.1, 0.01, 0.2, 0.0).unwrap();
        module.set_drive_pidf(0.1, 0.0, 0.0, 0.3).unwrap();

        let hw = sim.snapshot();
        assert_eq!(hw.turn.gains, PidfGains::new(1.1, 0.01, 0.2, 0.0));
        assert_eq!(hw.drive.gains, PidfGains::new(0.1, 0.0, 0.0, 0.3));
    }

    #[test]
    fn test_tuning_rejection_is_reported() {
        let (mut module, sim) = ready();
        let err = module.set_turn_pidf(-1.0, 0.0, 0.0, 0.0).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::GainsRejected {
                channel: GainChannel::Turn,
                ..
            }
        ));
        assert_eq!(sim.snapshot().turn.gains, fast_settings().turn_gains);
    }

    #[test]
    fn test_optimization_disabled_keeps_command() {
        let (mut module, _sim) = ready();
        let state = ModuleState::new(1.0, Rotation2d::from_degrees(170.0));
        module.set_desired_state(state).unwrap();
        assert_eq!(module.desired_state(), Some(state));
    }

    #[test]
    fn test_optimization_flips_instead_of_turning() {
        let settings = ModuleSettings {
            optimize: true,
            ..fast_settings()
        };
        let (mut module, sim) = ready_with(settings, 0.0);
        module
            .set_desired_state(ModuleState::new(1.0, Rotation2d::from_degrees(170.0)))
            .unwrap();

        let desired = module.desired_state().unwrap();
        assert_eq!(desired.speed, -1.0);
        assert!((desired.angle.degrees() + 10.0).abs() < 1e-9);
        assert_eq!(sim.snapshot().velocity_target, Some(-1.0));
    }

    #[test]
    fn test_cosine_scaling_reduces_skew() {
        let settings = ModuleSettings {
            cosine_scaling: true,
            ..fast_settings()
        };
        let (mut module, sim) = ready_with(settings, 0.0);
        module
            .set_desired_state(ModuleState::new(2.0, Rotation2d::from_degrees(60.0)))
            .unwrap();

        assert!((sim.snapshot().velocity_target.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_reseed() {
        let settings = ModuleSettings {
            reseed_on_idle: true,
            idle_debounce_ticks: 4,
            ..fast_settings()
        };
        let (mut module, sim) = ready_with(settings, 1.0);
        sim.slip_relative(0.2);
        assert!((module.get_state().unwrap().angle.radians() - 1.2).abs() < 1e-9);

        let state = ModuleState::new(0.0, Rotation2d::from_radians(1.2));
        // One fresh command, then three repeats: not idle long enough yet
        for _ in 0..4 {
            module.set_desired_state(state).unwrap();
        }
        assert!((module.get_state().unwrap().angle.radians() - 1.2).abs() < 1e-9);

        module.set_desired_state(state).unwrap();
        assert!((module.get_state().unwrap().angle.radians() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_debounce_does_not_reseed_while_moving() {
        let settings = ModuleSettings {
            reseed_on_idle: true,
            idle_debounce_ticks: 0,
            ..fast_settings()
        };
        let (mut module, sim) = ready_with(settings, 1.0);
        for i in 0..5 {
            sim.slip_relative(0.2);
            let angle = module.get_state().unwrap().angle.radians();
            module
                .set_desired_state(ModuleState::new(1.0 + i as f64, Rotation2d::from_radians(1.0)))
                .unwrap();
            assert!((module.get_state().unwrap().angle.radians() - angle).abs() < 1e-9);
        }
    }

    #[test]
    fn test_no_reseed_when_disabled() {
        let (mut module, sim) = ready_with(fast_settings(), 1.0);
        sim.slip_relative(0.2);
        let state = ModuleState::new(0.0, Rotation2d::from_radians(1.2));
        for _ in 0..10 {
            module.set_desired_state(state).unwrap();
        }
        assert!((module.get_state().unwrap().angle.radians() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_telemetry_without_and_with_desired_state() {
        let (mut module, _sim) = ready_with(fast_settings(), 0.5);
        let mut frame = TelemetryFrame::new();
        module.periodic(&mut frame);

        assert!((frame.get("FL/current_angle_deg").unwrap() - 0.5f64.to_degrees()).abs() < 1e-9);
        assert!((frame.get("FL/absolute_angle_deg").unwrap() - 0.5f64.to_degrees()).abs() < 1e-9);
        assert_eq!(frame.get("FL/current_speed_mps"), Some(0.0));
        assert!(frame.get("FL/drive_output").is_some());
        assert!(frame.get("FL/turn_output").is_some());
        assert_eq!(frame.get("FL/target_speed_mps"), None);

        module
            .set_desired_state(ModuleState::new(1.5, Rotation2d::from_degrees(-45.0)))
            .unwrap();
        frame.clear();
        module.periodic(&mut frame);
        assert_eq!(frame.get("FL/target_speed_mps"), Some(1.5));
        assert!((frame.get("FL/target_angle_deg").unwrap() + 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_telemetry_fault_flag_tracks_streak() {
        let (mut module, sim) = ready();
        let mut frame = TelemetryFrame::new();
        module.periodic(&mut frame);
        assert!(!module.telemetry_faulted);

        sim.fail_on(SimDevice::Drive, SimOp::Read);
        module.periodic(&mut frame);
        module.periodic(&mut frame);
        assert!(module.telemetry_faulted);
    }

    #[test]
    fn test_telemetry_survives_read_failures() {
        let (mut module, sim) = ready();
        sim.fail_on(SimDevice::Encoder, SimOp::Read);
        sim.fail_on(SimDevice::Drive, SimOp::Read);

        let mut frame = TelemetryFrame::new();
        module.periodic(&mut frame);
        assert_eq!(frame.get("FL/absolute_angle_deg"), None);
        assert_eq!(frame.get("FL/current_speed_mps"), None);
        assert!(frame.get("FL/turn_output").is_some());
    }

    #[test]
    fn test_no_telemetry_before_ready() {
        let (mut module, _sim) = build_with(fast_settings(), 0.0);
        let mut frame = TelemetryFrame::new();
        module.periodic(&mut frame);
        assert!(frame.is_empty());
    }

    #[test]
    fn test_configure_all_overlaps_settle_windows() {
        let settings = ModuleSettings {
            settle_delay_ms: 100,
            ..ModuleSettings::default()
        };
        let mut sims = Vec::new();
        let mut modules: Vec<SimModule> = crate::config::default_modules()
            .into_iter()
            .map(|config| {
                let sim = SimHardware::for_module(&config);
                let module =
                    SwerveModule::new(config, settings.clone(), sim.drive(), sim.steering(), sim.sensor());
                sims.push(sim);
                module
            })
            .collect();

        let start = Instant::now();
        configure_all(&mut modules).unwrap();
        let elapsed = start.elapsed();

        assert!(modules.iter().all(|m| m.is_ready()));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(390), "took {:?}", elapsed);
        assert!(sims.iter().all(|sim| sim.snapshot().wrap == Some((-PI, PI))));
    }

    #[test]
    fn test_configure_all_reports_failure() {
        let configs = crate::config::default_modules();
        let sims: Vec<SimHardware> = configs.iter().map(SimHardware::for_module).collect();
        sims[2].fail_on(SimDevice::Turn, SimOp::Wrap);
        let mut modules: Vec<SimModule> = configs
            .into_iter()
            .zip(&sims)
            .map(|(config, sim)| {
                SwerveModule::new(config, fast_settings(), sim.drive(), sim.steering(), sim.sensor())
            })
            .collect();

        assert!(configure_all(&mut modules).is_err());
        assert!(!modules[2].is_ready());
        assert!(modules[0].is_ready());
    }
}
