use serde::{Deserialize, Serialize};
use static_assertions::{assert_impl_all, const_assert_eq};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const FRAME_PAYLOAD_LEN: usize = 8;

const_assert_eq!(FRAME_PAYLOAD_LEN, 8);

/// One classic-CAN style frame: an identifier and exactly eight data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub id: u32,
    #[serde(with = "serde_bytes")]
    pub payload: [u8; FRAME_PAYLOAD_LEN],
    /// Capture time, microseconds on the simulation clock.
    pub timestamp_us: u64,
}

impl Frame {
    pub fn new(id: u32, payload: [u8; FRAME_PAYLOAD_LEN], timestamp_us: u64) -> Self {
        Self {
            id,
            payload,
            timestamp_us,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub drains: u64,
    pub empty_drains: u64,
}

#[derive(Debug, Default)]
struct BusInner {
    frames: Vec<Frame>,
    stats: BusStats,
}

/// Shared in-memory bus.
///
/// `send` appends, `drain` hands back everything queued and empties the bus.
/// There is no per-reader cursor: whichever reader drains first receives the
/// frames and any later reader sees only what was sent after that. Readers
/// that share a bus must therefore be scheduled so each drains right after
/// the frames meant for it were sent.
#[derive(Debug, Default)]
pub struct MessageBus {
    inner: Mutex<BusInner>,
}

assert_impl_all!(MessageBus: Send, Sync);

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, frame: Frame) {
        let mut inner = self.lock();
        inner.frames.push(frame);
        inner.stats.frames_sent += 1;
    }

    pub fn drain(&self) -> Vec<Frame> {
        let mut inner = self.lock();
        let frames = core::mem::take(&mut inner.frames);

        inner.stats.drains += 1;
        if frames.is_empty() {
            inner.stats.empty_drains += 1;
        }
        inner.stats.frames_delivered += frames.len() as u64;

        frames
    }

    pub fn pending(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn stats(&self) -> BusStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        // A panicking sender cannot leave the queue half-written
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_drain_in_send_order() {
        let bus = MessageBus::new();
        for i in 0..3u8 {
            bus.send(Frame::new(0x100, [i, 0, 0, 0, 0, 0, 0, 0], u64::from(i)));
        }
        assert_eq!(bus.pending(), 3);

        let frames = bus.drain();
        let order: Vec<u8> = frames.iter().map(|f| f.payload[0]).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn test_stats_track_traffic() {
        let bus = MessageBus::new();
        bus.send(Frame::new(0x200, [0; 8], 0));
        bus.drain();
        bus.drain();

        let stats = bus.stats();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_delivered, 1);
        assert_eq!(stats.drains, 2);
        assert_eq!(stats.empty_drains, 1);
    }
}
