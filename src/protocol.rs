//! Frame layouts exchanged between the ECU and the transmission controller.
//!
//! All multi-byte fields are big-endian. Unused payload bytes are zero.
//!
//! | ID      | Byte 0          | Byte 1       | Byte 2        | Byte 3      |
//! |---------|-----------------|--------------|---------------|-------------|
//! | `0x100` | RPM high        | RPM low      | throttle %    | coolant °C  |
//! | `0x200` | torque req (Nm) | current gear | -             | -           |

use crate::bus::{Frame, FRAME_PAYLOAD_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENGINE_STATUS_ID: u32 = 0x100;
pub const TRANSMISSION_COMMAND_ID: u32 = 0x200;

/// Torque requests below this put the drivetrain load on the engine.
pub const TORQUE_REQUEST_THRESHOLD_NM: u8 = 100;
pub const DRIVETRAIN_LOAD_NM: f32 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unexpected frame id {found:#05x}, expected {expected:#05x}")]
    UnexpectedId { expected: u32, found: u32 },
}

fn expect_id(frame: &Frame, expected: u32) -> Result<(), ProtocolError> {
    if frame.id == expected {
        Ok(())
    } else {
        Err(ProtocolError::UnexpectedId {
            expected,
            found: frame.id,
        })
    }
}

/// `0x100` engine status broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub rpm: u16,
    pub throttle_pct: u8,
    pub coolant_c: u8,
}

impl EngineStatus {
    /// Fractions are truncated; values outside a field's range saturate.
    pub fn from_readings(rpm: i32, throttle_pct: f32, coolant_c: f32) -> Self {
        Self {
            rpm: rpm.clamp(0, i32::from(u16::MAX)) as u16,
            throttle_pct: throttle_pct as u8,
            coolant_c: coolant_c as u8,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_PAYLOAD_LEN] {
        let [rpm_hi, rpm_lo] = self.rpm.to_be_bytes();
        [rpm_hi, rpm_lo, self.throttle_pct, self.coolant_c, 0, 0, 0, 0]
    }

    pub fn to_frame(&self, timestamp_us: u64) -> Frame {
        Frame::new(ENGINE_STATUS_ID, self.encode(), timestamp_us)
    }

    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        expect_id(frame, ENGINE_STATUS_ID)?;
        let p = &frame.payload;
        Ok(Self {
            rpm: u16::from_be_bytes([p[0], p[1]]),
            throttle_pct: p[2],
            coolant_c: p[3],
        })
    }
}

/// `0x200` transmission command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionCommand {
    pub requested_torque_nm: u8,
    pub gear: u8,
}

impl TransmissionCommand {
    pub fn encode(&self) -> [u8; FRAME_PAYLOAD_LEN] {
        [self.requested_torque_nm, self.gear, 0, 0, 0, 0, 0, 0]
    }

    pub fn to_frame(&self, timestamp_us: u64) -> Frame {
        Frame::new(TRANSMISSION_COMMAND_ID, self.encode(), timestamp_us)
    }

    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        expect_id(frame, TRANSMISSION_COMMAND_ID)?;
        Ok(Self {
            requested_torque_nm: frame.payload[0],
            gear: frame.payload[1],
        })
    }
}

/// How the ECU turns a transmission torque request into external load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPolicy {
    pub threshold_nm: u8,
    pub applied_load_nm: f32,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            threshold_nm: TORQUE_REQUEST_THRESHOLD_NM,
            applied_load_nm: DRIVETRAIN_LOAD_NM,
        }
    }
}

impl LoadPolicy {
    pub fn load_for(&self, requested_torque_nm: u8) -> f32 {
        if requested_torque_nm < self.threshold_nm {
            self.applied_load_nm
        } else {
            0.0
        }
    }
}

/// One-line human rendering of a known frame, for bus sniffing.
pub fn describe_frame(frame: &Frame) -> Option<String> {
    match frame.id {
        ENGINE_STATUS_ID => EngineStatus::decode(frame).ok().map(|s| {
            alloc::format!(
                "ID: 0x100 | RPM: {} | Throttle: {}% | Coolant: {}C",
                s.rpm,
                s.throttle_pct,
                s.coolant_c
            )
        }),
        TRANSMISSION_COMMAND_ID => TransmissionCommand::decode(frame).ok().map(|c| {
            alloc::format!(
                "ID: 0x200 | Torque request: {} Nm | Gear: {}",
                c.requested_torque_nm,
                c.gear
            )
        }),
        _ => None,
    }
}
