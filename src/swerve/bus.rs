// Serial actuator bus protocol
//
// Motor controllers and the absolute encoders sit behind a serial bridge that
// speaks a Dynamixel-1.0 style framing:
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Floating point registers are 4-byte little-endian IEEE 754.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use super::hardware::{HardwareError, Result, StatusFrame};

/// Default serial configuration for the bus bridge
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    Burn = 0x06,
}

/// Register map shared by motor controllers and absolute encoders
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Register {
    // Configuration area (persisted by Burn)
    Inverted,             // 1 byte: 0=normal, 1=inverted
    IdleMode,             // 1 byte: 0=coast, 1=brake
    CurrentLimit,         // 2 bytes, amps
    VoltageCompensation,  // f32, volts (0 = disabled)
    StatusPeriod(StatusFrame), // 2 bytes, ms
    PositionConversion,   // f32
    VelocityConversion,   // f32
    GainP,                // f32
    GainI,                // f32
    GainD,                // f32
    GainFf,               // f32
    WrapEnabled,          // 1 byte
    WrapMin,              // f32
    WrapMax,              // f32
    MagnetOffset,         // f32, degrees (absolute encoder)

    // Runtime area (volatile)
    VelocityTarget,   // f32
    PositionTarget,   // f32
    Position,         // f32, writable to seed
    Velocity,         // f32, read-only
    AppliedOutput,    // f32, read-only
    AbsolutePosition, // f32, degrees [0, 360), read-only (absolute encoder)
}

impl Register {
    pub fn address(self) -> u8 {
        match self {
            Register::Inverted => 10,
            Register::IdleMode => 11,
            Register::CurrentLimit => 12,
            Register::VoltageCompensation => 14,
            Register::StatusPeriod(frame) => 20 + 2 * frame as u8,
            Register::PositionConversion => 40,
            Register::VelocityConversion => 44,
            Register::GainP => 50,
            Register::GainI => 54,
            Register::GainD => 58,
            Register::GainFf => 62,
            Register::WrapEnabled => 66,
            Register::WrapMin => 67,
            Register::WrapMax => 71,
            Register::MagnetOffset => 75,
            Register::VelocityTarget => 80,
            Register::PositionTarget => 84,
            Register::Position => 88,
            Register::Velocity => 92,
            Register::AppliedOutput => 96,
            Register::AbsolutePosition => 100,
        }
    }
}

/// Bus handle shared by every device of every module
pub type SharedBus = Arc<Mutex<ActuatorBus>>;

/// Actuator bus - handles serial communication with the bridge
pub struct ActuatorBus {
    port: Box<dyn SerialPort>,
}

impl ActuatorBus {
    /// Open a new connection to the bus
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    pub fn into_shared(self) -> SharedBus {
        Arc::new(Mutex::new(self))
    }

    /// Calculate checksum for a packet (excluding header)
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    /// Build a packet with header and checksum
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);

        let checksum_data = &packet[2..]; // skip header
        packet.push(Self::checksum(checksum_data));

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read a status packet and return its parameters
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut header = [0u8; 2];
        self.port.read_exact(&mut header).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                HardwareError::Timeout { id: expected_id }
            } else {
                HardwareError::Io(e)
            }
        })?;

        if header != HEADER {
            return Err(HardwareError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", header),
            });
        }

        let mut id_length = [0u8; 2];
        self.port.read_exact(&mut id_length)?;
        let id = id_length[0];
        let length = id_length[1] as usize;

        if id != expected_id {
            return Err(HardwareError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }
        if length < 2 {
            return Err(HardwareError::InvalidResponse {
                id,
                reason: format!("Length {} too short", length),
            });
        }

        // error + params + checksum = length bytes
        let mut remaining = vec![0u8; length];
        self.port.read_exact(&mut remaining)?;

        let mut checksum_data = vec![id, length as u8];
        checksum_data.extend_from_slice(&remaining[..remaining.len() - 1]);
        if Self::checksum(&checksum_data) != remaining[remaining.len() - 1] {
            return Err(HardwareError::ChecksumMismatch { id });
        }

        let status = remaining[0];
        if status != 0 {
            return Err(HardwareError::DeviceStatus { id, status });
        }

        Ok(remaining[1..remaining.len() - 1].to_vec())
    }

    fn transact(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        let packet = Self::build_packet(id, instruction, params);
        self.send_packet(&packet)?;
        self.read_response(id)
    }

    /// Ping a device to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        match self.transact(id, Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(HardwareError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!("Write u8 to device {}: reg={:?}, value={}", id, register, value);
        self.transact(id, Instruction::Write, &[register.address(), value])?;
        Ok(())
    }

    pub fn write_u16(&mut self, id: u8, register: Register, value: u16) -> Result<()> {
        debug!("Write u16 to device {}: reg={:?}, value={}", id, register, value);
        let [lo, hi] = value.to_le_bytes();
        self.transact(id, Instruction::Write, &[register.address(), lo, hi])?;
        Ok(())
    }

    pub fn write_f32(&mut self, id: u8, register: Register, value: f32) -> Result<()> {
        debug!("Write f32 to device {}: reg={:?}, value={}", id, register, value);
        self.transact(id, Instruction::Write, &f32_params(register, value))?;
        Ok(())
    }

    pub fn read_f32(&mut self, id: u8, register: Register) -> Result<f32> {
        let response = self.transact(id, Instruction::Read, &[register.address(), 4])?;
        if response.len() < 4 {
            return Err(HardwareError::InvalidResponse {
                id,
                reason: format!("Expected 4 bytes, got {}", response.len()),
            });
        }
        Ok(f32::from_le_bytes([
            response[0],
            response[1],
            response[2],
            response[3],
        ]))
    }

    /// Persist the configuration area to flash
    ///
    /// The device drops frames for a while afterwards.
    pub fn burn(&mut self, id: u8) -> Result<()> {
        debug!("Burn flash on device {}", id);
        self.transact(id, Instruction::Burn, &[])?;
        Ok(())
    }
}

fn f32_params(register: Register, value: f32) -> [u8; 5] {
    let [b0, b1, b2, b3] = value.to_le_bytes();
    [register.address(), b0, b1, b2, b3]
}
