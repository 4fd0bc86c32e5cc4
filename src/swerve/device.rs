// Bus-backed actuators and sensors
//
// Each handle owns a device id on a shared `ActuatorBus`. The lock is held for a
// single transaction, so modules configured from different threads interleave
// on the wire instead of waiting on each other's settle delay.

use std::sync::MutexGuard;

use super::bus::{ActuatorBus, Register, SharedBus};
use super::hardware::{
    Actuator, AngleSensor, DriveActuator, HardwareError, IdleMode, PidfGains, Result,
    StatusFrame, SteeringActuator,
};

fn lock(bus: &SharedBus) -> MutexGuard<'_, ActuatorBus> {
    // A panic mid-transaction leaves the port usable; the next frame resyncs on the header.
    bus.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Motor controller addressed by id
pub struct BusMotor {
    bus: SharedBus,
    id: u8,
}

impl BusMotor {
    pub fn new(bus: SharedBus, id: u8) -> Self {
        Self { bus, id }
    }

    /// Fail with `Timeout` if the device does not answer a ping
    pub fn probe(&mut self) -> Result<()> {
        if lock(&self.bus).ping(self.id)? {
            Ok(())
        } else {
            Err(HardwareError::Timeout { id: self.id })
        }
    }

    fn write_f64(&mut self, register: Register, value: f64) -> Result<()> {
        lock(&self.bus).write_f32(self.id, register, value as f32)
    }

    fn read_f64(&mut self, register: Register) -> Result<f64> {
        Ok(lock(&self.bus).read_f32(self.id, register)? as f64)
    }
}

impl Actuator for BusMotor {
    fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        lock(&self.bus).write_u8(self.id, Register::Inverted, inverted as u8)
    }

    fn set_idle_mode(&mut self, mode: IdleMode) -> Result<()> {
        lock(&self.bus).write_u8(self.id, Register::IdleMode, mode as u8)
    }

    fn set_current_limit(&mut self, amps: u16) -> Result<()> {
        lock(&self.bus).write_u16(self.id, Register::CurrentLimit, amps)
    }

    fn enable_voltage_compensation(&mut self, nominal_volts: f64) -> Result<()> {
        self.write_f64(Register::VoltageCompensation, nominal_volts)
    }

    fn set_status_period(&mut self, frame: StatusFrame, period_ms: u16) -> Result<()> {
        lock(&self.bus).write_u16(self.id, Register::StatusPeriod(frame), period_ms)
    }

    fn set_gains(&mut self, gains: PidfGains) -> Result<()> {
        self.write_f64(Register::GainP, gains.p)?;
        self.write_f64(Register::GainI, gains.i)?;
        self.write_f64(Register::GainD, gains.d)?;
        self.write_f64(Register::GainFf, gains.ff)
    }

    fn applied_output(&mut self) -> Result<f64> {
        self.read_f64(Register::AppliedOutput)
    }

    fn burn(&mut self) -> Result<()> {
        lock(&self.bus).burn(self.id)
    }
}

impl DriveActuator for BusMotor {
    fn set_conversion_factors(&mut self, position: f64, velocity: f64) -> Result<()> {
        self.write_f64(Register::PositionConversion, position)?;
        self.write_f64(Register::VelocityConversion, velocity)
    }

    fn set_velocity_target(&mut self, meters_per_second: f64) -> Result<()> {
        self.write_f64(Register::VelocityTarget, meters_per_second)
    }

    fn velocity(&mut self) -> Result<f64> {
        self.read_f64(Register::Velocity)
    }

    fn position(&mut self) -> Result<f64> {
        self.read_f64(Register::Position)
    }
}

impl SteeringActuator for BusMotor {
    fn set_position_target(&mut self, radians: f64) -> Result<()> {
        self.write_f64(Register::PositionTarget, radians)
    }

    fn enable_continuous_wrap(&mut self, min: f64, max: f64) -> Result<()> {
        lock(&self.bus).write_u8(self.id, Register::WrapEnabled, 1)?;
        self.write_f64(Register::WrapMin, min)?;
        self.write_f64(Register::WrapMax, max)
    }
}

/// Absolute encoder plus the relative encoder inside the steering motor
pub struct BusAngleSensor {
    bus: SharedBus,
    abs_id: u8,
    turn_id: u8,
}

impl BusAngleSensor {
    pub fn new(bus: SharedBus, abs_id: u8, turn_id: u8) -> Self {
        Self {
            bus,
            abs_id,
            turn_id,
        }
    }
}

impl AngleSensor for BusAngleSensor {
    fn set_zero_offset(&mut self, degrees: f64) -> Result<()> {
        lock(&self.bus).write_f32(self.abs_id, Register::MagnetOffset, degrees as f32)
    }

    fn set_relative_conversion(&mut self, factor: f64) -> Result<()> {
        lock(&self.bus).write_f32(self.turn_id, Register::PositionConversion, factor as f32)
    }

    fn read_absolute(&mut self) -> Result<f64> {
        let degrees = lock(&self.bus).read_f32(self.abs_id, Register::AbsolutePosition)?;
        Ok((degrees as f64).to_radians())
    }

    fn read_relative(&mut self) -> Result<f64> {
        Ok(lock(&self.bus).read_f32(self.turn_id, Register::Position)? as f64)
    }

    fn seed_relative(&mut self, radians: f64) -> Result<()> {
        lock(&self.bus).write_f32(self.turn_id, Register::Position, radians as f32)
    }
}
