use crate::dtc::DtcLabel;
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const NO_ACTIVE_DTC: &str = "None";

/// Latest published ECU status. Always produced and read as a whole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EcuSnapshot {
    pub rpm: i32,
    pub throttle_pct: f32,
    pub coolant_c: f32,
    pub load_nm: f32,
    pub injection_ms: f32,
    pub active_dtc: Option<DtcLabel>,
}

impl EcuSnapshot {
    pub fn dtc_label(&self) -> &str {
        self.active_dtc.as_ref().map_or(NO_ACTIVE_DTC, DtcLabel::as_str)
    }
}

#[derive(Debug, Default)]
struct StateInner {
    snapshot: EcuSnapshot,
    updates: u64,
}

/// Hand-off point between the simulation thread and any observer.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<StateInner>,
}

assert_impl_all!(StateStore: Send, Sync);
assert_impl_all!(EcuSnapshot: Copy, Send);

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &self,
        rpm: i32,
        throttle_pct: f32,
        coolant_c: f32,
        load_nm: f32,
        injection_ms: f32,
        active_dtc: Option<DtcLabel>,
    ) {
        self.publish(EcuSnapshot {
            rpm,
            throttle_pct,
            coolant_c,
            load_nm,
            injection_ms,
            active_dtc,
        });
    }

    pub fn publish(&self, snapshot: EcuSnapshot) {
        let mut inner = self.lock();
        inner.snapshot = snapshot;
        inner.updates += 1;
    }

    pub fn read(&self) -> EcuSnapshot {
        self.lock().snapshot
    }

    /// Number of snapshots published so far.
    pub fn updates(&self) -> u64 {
        self.lock().updates
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_default_snapshot_has_no_dtc() {
        let store = StateStore::new();
        let snapshot = store.read();
        assert_eq!(snapshot.rpm, 0);
        assert_eq!(snapshot.dtc_label(), "None");
        assert_eq!(store.updates(), 0);
    }

    #[test]
    fn test_update_replaces_every_field() {
        let store = StateStore::new();
        store.update(1200, 15.0, 88.0, 80.0, 3.2, DtcLabel::from("P0217").ok());
        store.update(900, 10.0, 89.0, 0.0, 2.0, None);

        let snapshot = store.read();
        assert_eq!(snapshot.rpm, 900);
        assert_eq!(snapshot.load_nm, 0.0);
        assert_eq!(snapshot.dtc_label(), "None");
        assert_eq!(store.updates(), 2);
    }

    #[test]
    fn test_readers_never_see_torn_snapshots() {
        let store = Arc::new(StateStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    let v = i as f32;
                    store.update(i, v, v, v, v, None);
                }
            })
        };

        for _ in 0..1000 {
            let s = store.read();
            let v = s.rpm as f32;
            assert_eq!(s.throttle_pct, v);
            assert_eq!(s.coolant_c, v);
            assert_eq!(s.load_nm, v);
            assert_eq!(s.injection_ms, v);
        }
        writer.join().unwrap();
    }
}
