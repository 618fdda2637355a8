use crate::nvram::{FaultStore, MemoryFaultStore};
use crate::sensors::SensorReadings;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const MAX_DTC_LABEL_LEN: usize = 8;

/// Fixed-size headline code carried in snapshots. Fault codes themselves are
/// unbounded; see [`headline_label`].
pub type DtcLabel = ArrayString<MAX_DTC_LABEL_LEN>;

pub const DTC_ENGINE_OVERHEAT: &str = "P0217";
pub const DTC_ENGINE_OVERHEAT_MSG: &str = "Engine Overheat";
pub const DTC_TPS_CIRCUIT_LOW: &str = "P0120";
pub const DTC_TPS_CIRCUIT_LOW_MSG: &str = "TPS Circuit Low";

const OVERHEAT_COOLANT_C: f32 = 95.0;
const TPS_LOW_THROTTLE_PCT: f32 = 5.0;

/// Label for `code`, cut at the last char boundary that fits.
pub fn headline_label(code: &str) -> DtcLabel {
    let mut end = code.len().min(MAX_DTC_LABEL_LEN);
    while !code.is_char_boundary(end) {
        end -= 1;
    }
    let mut label = DtcLabel::new();
    label.push_str(&code[..end]);
    label
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub code: String,
    pub message: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub overheat_coolant_c: f32,
    pub tps_low_throttle_pct: f32,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            overheat_coolant_c: OVERHEAT_COOLANT_C,
            tps_low_throttle_pct: TPS_LOW_THROTTLE_PCT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiagnosticsStats {
    pub evaluations: u32,
    pub saves: u32,
    pub save_failures: u32,
}

/// Diagnostic trouble code bookkeeping.
///
/// Entries are unique per code and never removed: clearing only marks the
/// entry inactive, so the list doubles as the history of every code seen
/// since power-up (plus anything restored from the store).
pub struct DiagnosticsManager {
    faults: Vec<Fault>,
    store: Box<dyn FaultStore>,
    config: DiagnosticsConfig,
    stats: DiagnosticsStats,
}

impl DiagnosticsManager {
    /// Restores prior faults from `store`, all marked active. Repeated codes
    /// keep their first record. A store that cannot be read leaves the
    /// manager empty and purely in-memory.
    pub fn new(store: Box<dyn FaultStore>) -> Self {
        Self::new_with_config(store, DiagnosticsConfig::default())
    }

    pub fn new_with_config(mut store: Box<dyn FaultStore>, config: DiagnosticsConfig) -> Self {
        let mut faults: Vec<Fault> = Vec::new();
        match store.load() {
            Ok(records) => {
                for record in records {
                    if faults.iter().any(|f| f.code == record.code) {
                        warn!(code = %record.code, "Skipping duplicate stored fault");
                        continue;
                    }
                    faults.push(Fault {
                        code: record.code,
                        message: record.message,
                        active: true,
                    });
                }
            }
            Err(e) => {
                warn!(error = %e, "Fault store unavailable, continuing without stored faults");
            }
        }

        Self {
            faults,
            store,
            config,
            stats: DiagnosticsStats::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryFaultStore::new()))
    }

    /// Raise `code`. Returns `true` if anything changed.
    ///
    /// A known code is re-activated without touching its message and only
    /// persisted if it was inactive; an unknown code is appended and always
    /// persisted.
    pub fn add_fault(&mut self, code: &str, message: &str) -> bool {
        if let Some(fault) = self.faults.iter_mut().find(|f| f.code == code) {
            if fault.active {
                return false;
            }
            fault.active = true;
            info!(code, "DTC re-activated");
            self.persist();
            return true;
        }

        self.faults.push(Fault {
            code: code.to_string(),
            message: message.to_string(),
            active: true,
        });
        info!(code, description = message, "DTC set");
        self.persist();
        true
    }

    /// Mark `code` inactive. Returns `true` if it was active.
    pub fn clear_fault(&mut self, code: &str) -> bool {
        let mut changed = false;
        for fault in self.faults.iter_mut().filter(|f| f.code == code && f.active) {
            fault.active = false;
            changed = true;
        }

        if changed {
            info!(code, "DTC cleared");
            self.persist();
        }
        changed
    }

    /// Every fault seen, active or not. Callers filter on [`Fault::active`];
    /// use [`DiagnosticsManager::iter_active`] for the active subset.
    pub fn active_faults(&self) -> &[Fault] {
        &self.faults
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &Fault> {
        self.faults.iter().filter(|f| f.active)
    }

    /// Oldest still-active fault, shown as the headline DTC.
    pub fn first_active(&self) -> Option<&Fault> {
        self.iter_active().next()
    }

    pub fn is_active(&self, code: &str) -> bool {
        self.iter_active().any(|f| f.code == code)
    }

    /// Apply the built-in detection rules to one sensor sample. Each rule
    /// raises its code while the condition holds and clears it otherwise.
    pub fn evaluate(&mut self, readings: &SensorReadings) {
        self.stats.evaluations = self.stats.evaluations.saturating_add(1);

        if readings.coolant_c > self.config.overheat_coolant_c {
            self.add_fault(DTC_ENGINE_OVERHEAT, DTC_ENGINE_OVERHEAT_MSG);
        } else {
            self.clear_fault(DTC_ENGINE_OVERHEAT);
        }

        if readings.throttle_pct < self.config.tps_low_throttle_pct {
            self.add_fault(DTC_TPS_CIRCUIT_LOW, DTC_TPS_CIRCUIT_LOW_MSG);
        } else {
            self.clear_fault(DTC_TPS_CIRCUIT_LOW);
        }
    }

    pub fn stats(&self) -> DiagnosticsStats {
        self.stats
    }

    fn persist(&mut self) {
        match self.store.save(&self.faults) {
            Ok(()) => self.stats.saves = self.stats.saves.saturating_add(1),
            Err(e) => {
                self.stats.save_failures = self.stats.save_failures.saturating_add(1);
                warn!(error = %e, "Failed to persist DTCs, keeping them in memory only");
            }
        }
    }
}

impl core::fmt::Debug for DiagnosticsManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DiagnosticsManager")
            .field("faults", &self.faults)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for DiagnosticsManager {
    fn default() -> Self {
        Self::in_memory()
    }
}
