use crate::bus::{Frame, MessageBus};
use crate::protocol::{EngineStatus, TransmissionCommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

const MIN_GEAR: u8 = 1;
const MAX_GEAR: u8 = 5;
const UPSHIFT_RPM: u16 = 3000;
const DOWNSHIFT_RPM: u16 = 1500;
const TORQUE_PER_THROTTLE_PCT: f32 = 2.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    pub enabled: bool,
    pub min_gear: u8,
    pub max_gear: u8,
    pub upshift_rpm: u16,
    pub downshift_rpm: u16,
    pub torque_per_throttle_pct: f32,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_gear: MIN_GEAR,
            max_gear: MAX_GEAR,
            upshift_rpm: UPSHIFT_RPM,
            downshift_rpm: DOWNSHIFT_RPM,
            torque_per_throttle_pct: TORQUE_PER_THROTTLE_PCT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TransmissionStats {
    pub status_frames_seen: u64,
    pub frames_ignored: u64,
    pub commands_sent: u64,
    pub shifts: u32,
}

/// Simulated transmission control unit on the other end of the bus.
///
/// Each cycle it drains the bus, keeps the newest engine status, picks a gear
/// and answers with a torque request.
#[derive(Debug, Clone)]
pub struct TransmissionController {
    config: TransmissionConfig,
    gear: u8,
    last_status: Option<EngineStatus>,
    stats: TransmissionStats,
}

impl TransmissionController {
    pub fn new() -> Self {
        Self::new_with_config(TransmissionConfig::default())
    }

    pub fn new_with_config(config: TransmissionConfig) -> Self {
        Self {
            gear: config.min_gear,
            config,
            last_status: None,
            stats: TransmissionStats::default(),
        }
    }

    /// Consume this cycle's frames. Returns the command to send, or `None`
    /// when no engine status has arrived yet.
    pub fn process(&mut self, frames: &[Frame]) -> Option<TransmissionCommand> {
        for frame in frames {
            match EngineStatus::decode(frame) {
                Ok(status) => {
                    self.stats.status_frames_seen += 1;
                    self.last_status = Some(status);
                }
                // Not ours
                Err(_) => self.stats.frames_ignored += 1,
            }
        }

        let status = self.last_status?;
        self.select_gear(status.rpm);

        let torque = f32::from(status.throttle_pct) * self.config.torque_per_throttle_pct;
        Some(TransmissionCommand {
            requested_torque_nm: torque.clamp(0.0, f32::from(u8::MAX)) as u8,
            gear: self.gear,
        })
    }

    /// Drain `bus`, process, and put the reply back on it.
    pub fn step(&mut self, bus: &MessageBus, timestamp_us: u64) -> Option<TransmissionCommand> {
        let frames = bus.drain();
        trace!(frames = frames.len(), "TCU drained bus");

        let command = self.process(&frames)?;
        bus.send(command.to_frame(timestamp_us));
        self.stats.commands_sent += 1;
        Some(command)
    }

    fn select_gear(&mut self, rpm: u16) {
        let previous = self.gear;
        if rpm > self.config.upshift_rpm && self.gear < self.config.max_gear {
            self.gear += 1;
        } else if rpm < self.config.downshift_rpm && self.gear > self.config.min_gear {
            self.gear -= 1;
        }

        if self.gear != previous {
            self.stats.shifts += 1;
            debug!(from = previous, to = self.gear, rpm, "TCU shift");
        }
    }

    pub fn gear(&self) -> u8 {
        self.gear
    }

    pub fn last_status(&self) -> Option<EngineStatus> {
        self.last_status
    }

    pub fn stats(&self) -> TransmissionStats {
        self.stats
    }
}

impl Default for TransmissionController {
    fn default() -> Self {
        Self::new()
    }
}
