// Simulated module hardware
//
// One `SimHardware` holds the physical state of a module (wheel angle, drive
// distance) plus everything the controller wrote to it. The drive, steering and
// sensor handles it hands out share that state, so a test can keep the
// `SimHardware` as a probe after the handles move into a `SwerveModule`.

use std::collections::{BTreeMap, HashSet};
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::geometry::normalize_angle;
use super::hardware::{
    Actuator, AngleSensor, DriveActuator, HardwareError, IdleMode, PidfGains, Result,
    StatusFrame, SteeringActuator,
};
use crate::config::ModuleConfig;

/// Free speed used to derive simulated applied output (m/s)
const MAX_DRIVE_SPEED: f64 = 4.5;
/// Steering slew rate (rad/s)
const MAX_TURN_RATE: f64 = 4.0 * TAU;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimDevice {
    Drive,
    Turn,
    Encoder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Inverted,
    IdleMode,
    CurrentLimit,
    VoltageCompensation,
    StatusPeriod,
    Conversion,
    Gains,
    Wrap,
    Burn,
    Target,
    Read,
    ZeroOffset,
    Seed,
}

/// Settings written to one simulated motor controller
#[derive(Debug, Clone, PartialEq)]
pub struct SimMotor {
    pub id: u8,
    pub inverted: bool,
    pub idle_mode: IdleMode,
    pub current_limit: Option<u16>,
    pub nominal_voltage: Option<f64>,
    pub status_periods: BTreeMap<StatusFrame, u16>,
    pub gains: PidfGains,
    pub position_conversion: f64,
    pub velocity_conversion: f64,
    pub applied_output: f64,
    pub burn_count: u32,
    pub command_count: u32,
}

impl SimMotor {
    fn new(id: u8) -> Self {
        Self {
            id,
            inverted: false,
            idle_mode: IdleMode::Coast,
            current_limit: None,
            nominal_voltage: None,
            status_periods: BTreeMap::new(),
            gains: PidfGains::default(),
            position_conversion: 1.0,
            velocity_conversion: 1.0,
            applied_output: 0.0,
            burn_count: 0,
            command_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimState {
    pub drive: SimMotor,
    pub turn: SimMotor,
    pub encoder_id: u8,

    pub velocity_target: Option<f64>,
    pub position_target: Option<f64>,
    pub wrap: Option<(f64, f64)>,

    /// Physical wheel angle (rad, unbounded)
    pub wheel_angle: f64,
    /// Wheel angle at which the relative encoder reads zero
    pub relative_origin: f64,
    pub relative_conversion: f64,
    /// Physical magnet misalignment of the absolute encoder (deg)
    pub mount_offset_deg: f64,
    /// Offset configured into the absolute encoder (deg)
    pub zero_offset_deg: f64,

    pub drive_velocity: f64,
    pub drive_distance: f64,

    failing: HashSet<(SimDevice, SimOp)>,
}

impl SimState {
    fn relative(&self) -> f64 {
        self.wheel_angle - self.relative_origin
    }

    fn absolute(&self) -> f64 {
        let degrees = (self.wheel_angle.to_degrees() - self.mount_offset_deg + self.zero_offset_deg)
            .rem_euclid(360.0);
        degrees.to_radians()
    }

    fn check(&self, device: SimDevice, op: SimOp) -> Result<()> {
        if !self.failing.contains(&(device, op)) {
            return Ok(());
        }
        let id = match device {
            SimDevice::Drive => self.drive.id,
            SimDevice::Turn => self.turn.id,
            SimDevice::Encoder => self.encoder_id,
        };
        Err(HardwareError::Timeout { id })
    }

    fn motor_mut(&mut self, device: SimDevice) -> &mut SimMotor {
        match device {
            SimDevice::Turn => &mut self.turn,
            _ => &mut self.drive,
        }
    }
}

/// Shared simulated state of one module
#[derive(Debug, Clone)]
pub struct SimHardware {
    state: Arc<Mutex<SimState>>,
}

impl SimHardware {
    pub fn new(drive_id: u8, turn_id: u8, encoder_id: u8) -> Self {
        let state = SimState {
            drive: SimMotor::new(drive_id),
            turn: SimMotor::new(turn_id),
            encoder_id,
            velocity_target: None,
            position_target: None,
            wrap: None,
            wheel_angle: 0.0,
            relative_origin: 0.0,
            relative_conversion: 1.0,
            mount_offset_deg: 0.0,
            zero_offset_deg: 0.0,
            drive_velocity: 0.0,
            drive_distance: 0.0,
            failing: HashSet::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Hardware whose magnet misalignment matches the module's configured offset
    pub fn for_module(config: &ModuleConfig) -> Self {
        let sim = Self::new(config.drive_id, config.turn_id, config.abs_encoder_id);
        sim.lock().mount_offset_deg = config.mag_offset_deg;
        sim
    }

    /// Start with the wheel at `radians`; the relative encoder powers on reading zero
    pub fn with_wheel_angle(self, radians: f64) -> Self {
        {
            let mut state = self.lock();
            state.wheel_angle = radians;
            state.relative_origin = radians;
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn drive(&self) -> SimDrive {
        SimDrive {
            hw: self.clone(),
        }
    }

    pub fn steering(&self) -> SimSteering {
        SimSteering {
            hw: self.clone(),
        }
    }

    pub fn sensor(&self) -> SimAngleSensor {
        SimAngleSensor {
            hw: self.clone(),
        }
    }

    pub fn snapshot(&self) -> SimState {
        self.lock().clone()
    }

    /// Make every future `op` on `device` fail with a timeout
    pub fn fail_on(&self, device: SimDevice, op: SimOp) {
        self.lock().failing.insert((device, op));
    }

    /// Rotate the wheel by hand, e.g. an external push while uncommanded
    pub fn disturb_wheel(&self, radians: f64) {
        self.lock().wheel_angle += radians;
    }

    /// Let the relative encoder drift from the wheel, e.g. a skipped belt tooth
    pub fn slip_relative(&self, radians: f64) {
        self.lock().relative_origin -= radians;
    }

    /// Advance the simulated firmware loops by `dt`
    pub fn step(&self, dt: Duration) {
        let dt = dt.as_secs_f64();
        let mut guard = self.lock();
        let state = &mut *guard;

        state.drive_velocity = state.velocity_target.unwrap_or(0.0);
        state.drive_distance += state.drive_velocity * dt;
        state.drive.applied_output = (state.drive_velocity / MAX_DRIVE_SPEED).clamp(-1.0, 1.0);

        let Some(target) = state.position_target else {
            state.turn.applied_output = 0.0;
            return;
        };
        let raw_error = target - state.relative();
        let error = match state.wrap {
            Some(_) => normalize_angle(raw_error),
            None => raw_error,
        };
        let max_step = MAX_TURN_RATE * dt;
        let step = error.clamp(-max_step, max_step);
        state.wheel_angle += step;
        state.turn.applied_output = if max_step > 0.0 { step / max_step } else { 0.0 };
    }
}

macro_rules! sim_actuator {
    ($handle:ident, $device:expr) => {
        impl Actuator for $handle {
            fn set_inverted(&mut self, inverted: bool) -> Result<()> {
                let mut state = self.hw.lock();
                state.check($device, SimOp::Inverted)?;
                state.motor_mut($device).inverted = inverted;
                Ok(())
            }

            fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()> {
                let mut state = self.hw.lock();
                state.check($device, SimOp::IdleMode)?;
                state.motor_mut($device).idle_mode = mode;
                Ok(())
            }

            fn set_current_limit(&mut self, amps: u16) -> Result<()> {
                let mut state = self.hw.lock();
                state.check($device, SimOp::CurrentLimit)?;
                state.motor_mut($device).current_limit = Some(amps);
                Ok(())
            }

            fn enable_voltage_compensation(&mut self, nominal_volts: f64) -> Result<()> {
                let mut state = self.hw.lock();
                state.check($device, SimOp::VoltageCompensation)?;
                state.motor_mut($device).nominal_voltage = Some(nominal_volts);
                Ok(())
            }

            fn set_status_period(&mut self, frame: StatusFrame, period_ms: u16) -> Result<()> {
                let mut state = self.hw.lock();
                state.check($device, SimOp::StatusPeriod)?;
                state.motor_mut($device).status_periods.insert(frame, period_ms);
                Ok(())
            }

            fn set_gains(&mut self, gains: PidfGains) -> Result<()> {
                let mut state = self.hw.lock();
                state.check($device, SimOp::Gains)?;
                let motor = state.motor_mut($device);
                let values = [gains.p, gains.i, gains.d, gains.ff];
                if values.iter().any(|g| !g.is_finite() || *g < 0.0) {
                    return Err(HardwareError::Rejected {
                        id: motor.id,
                        reason: format!("gains out of range: {:?}", gains),
                    });
                }
                motor.gains = gains;
                Ok(())
            }

            fn applied_output(&mut self) -> Result<f64> {
                let mut state = self.hw.lock();
                state.check($device, SimOp::Read)?;
                Ok(state.motor_mut($device).applied_output)
            }

            fn burn(&mut self) -> Result<()> {
                let mut state = self.hw.lock();
                state.check($device, SimOp::Burn)?;
                state.motor_mut($device).burn_count += 1;
                Ok(())
            }
        }
    };
}

/// Simulated drive motor
pub struct SimDrive {
    hw: SimHardware,
}

sim_actuator!(SimDrive, SimDevice::Drive);

impl DriveActuator for SimDrive {
    fn set_conversion_factors(&mut self, position: f64, velocity: f64) -> Result<()> {
        let mut state = self.hw.lock();
        state.check(SimDevice::Drive, SimOp::Conversion)?;
        state.drive.position_conversion = position;
        state.drive.velocity_conversion = velocity;
        Ok(())
    }

    fn set_velocity_target(&mut self, meters_per_second: f64) -> Result<()> {
        let mut state = self.hw.lock();
        state.check(SimDevice::Drive, SimOp::Target)?;
        state.velocity_target = Some(meters_per_second);
        state.drive.command_count += 1;
        Ok(())
    }

    fn velocity(&mut self) -> Result<f64> {
        let state = self.hw.lock();
        state.check(SimDevice::Drive, SimOp::Read)?;
        Ok(state.drive_velocity)
    }

    fn position(&mut self) -> Result<f64> {
        let state = self.hw.lock();
        state.check(SimDevice::Drive, SimOp::Read)?;
        Ok(state.drive_distance)
    }
}

/// Simulated steering motor
pub struct SimSteering {
    hw: SimHardware,
}

sim_actuator!(SimSteering, SimDevice::Turn);

impl SteeringActuator for SimSteering {
    fn set_position_target(&mut self, radians: f64) -> Result<()> {
        let mut state = self.hw.lock();
        state.check(SimDevice::Turn, SimOp::Target)?;
        state.position_target = Some(radians);
        state.turn.command_count += 1;
        Ok(())
    }

    fn enable_continuous_wrap(&mut self, min: f64, max: f64) -> Result<()> {
        let mut state = self.hw.lock();
        state.check(SimDevice::Turn, SimOp::Wrap)?;
        state.wrap = Some((min, max));
        Ok(())
    }
}

/// Simulated absolute encoder + steering relative encoder
pub struct SimAngleSensor {
    hw: SimHardware,
}

impl AngleSensor for SimAngleSensor {
    fn set_zero_offset(&mut self, degrees: f64) -> Result<()> {
        let mut state = self.hw.lock();
        state.check(SimDevice::Encoder, SimOp::ZeroOffset)?;
        state.zero_offset_deg = degrees;
        Ok(())
    }

    fn set_relative_conversion(&mut self, factor: f64) -> Result<()> {
        let mut state = self.hw.lock();
        state.check(SimDevice::Turn, SimOp::Conversion)?;
        state.relative_conversion = factor;
        Ok(())
    }

    fn read_absolute(&mut self) -> Result<f64> {
        let state = self.hw.lock();
        state.check(SimDevice::Encoder, SimOp::Read)?;
        Ok(state.absolute())
    }

    fn read_relative(&mut self) -> Result<f64> {
        let state = self.hw.lock();
        state.check(SimDevice::Turn, SimOp::Read)?;
        Ok(state.relative())
    }

    fn seed_relative(&mut self, radians: f64) -> Result<()> {
        let mut state = self.hw.lock();
        state.check(SimDevice::Turn, SimOp::Seed)?;
        state.relative_origin = state.wheel_angle - radians;
        Ok(())
    }
}
