//! Run-time configuration.
//!
//! Every section falls back to its compiled-in defaults, so a config file only
//! needs the values it changes.

use crate::dtc::DiagnosticsConfig;
use crate::engine::{FuelConfig, PhysicsConfig};
use crate::protocol::LoadPolicy;
use crate::scheduler::FailurePolicy;
use crate::sensors::SensorConfig;
use crate::tcu::TransmissionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const PHYSICS_INTERVAL_MS: u64 = 10;
pub const CAN_TX_INTERVAL_MS: u64 = 50;
pub const TCU_INTERVAL_MS: u64 = 100;
pub const CAN_RX_INTERVAL_MS: u64 = 100;
pub const FUEL_INTERVAL_MS: u64 = 100;
pub const DIAGNOSTICS_INTERVAL_MS: u64 = 1000;
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const STATE_SYNC_INTERVAL_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Task periods in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub physics_ms: u64,
    pub can_tx_ms: u64,
    pub tcu_ms: u64,
    pub can_rx_ms: u64,
    pub fuel_ms: u64,
    pub diagnostics_ms: u64,
    pub heartbeat_ms: u64,
    pub state_sync_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            physics_ms: PHYSICS_INTERVAL_MS,
            can_tx_ms: CAN_TX_INTERVAL_MS,
            tcu_ms: TCU_INTERVAL_MS,
            can_rx_ms: CAN_RX_INTERVAL_MS,
            fuel_ms: FUEL_INTERVAL_MS,
            diagnostics_ms: DIAGNOSTICS_INTERVAL_MS,
            heartbeat_ms: HEARTBEAT_INTERVAL_MS,
            state_sync_ms: STATE_SYNC_INTERVAL_MS,
        }
    }
}

impl CadenceConfig {
    pub fn physics(&self) -> Duration {
        Duration::from_millis(self.physics_ms)
    }

    /// Integration step handed to the physics model.
    pub fn physics_dt_seconds(&self) -> f32 {
        self.physics_ms as f32 / 1000.0
    }

    fn intervals(&self) -> [(&'static str, u64); 8] {
        [
            ("cadence.physics_ms", self.physics_ms),
            ("cadence.can_tx_ms", self.can_tx_ms),
            ("cadence.tcu_ms", self.tcu_ms),
            ("cadence.can_rx_ms", self.can_rx_ms),
            ("cadence.fuel_ms", self.fuel_ms),
            ("cadence.diagnostics_ms", self.diagnostics_ms),
            ("cadence.heartbeat_ms", self.heartbeat_ms),
            ("cadence.state_sync_ms", self.state_sync_ms),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EcuConfig {
    pub physics: PhysicsConfig,
    pub fuel: FuelConfig,
    pub sensors: SensorConfig,
    pub diagnostics: DiagnosticsConfig,
    pub transmission: TransmissionConfig,
    pub load_policy: LoadPolicy,
    pub cadence: CadenceConfig,
    pub failure_policy: FailurePolicy,
}

impl EcuConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, interval_ms) in self.cadence.intervals() {
            if interval_ms == 0 {
                return Err(invalid(field, "interval must be at least 1 ms"));
            }
        }

        positive("physics.inertia_kg_m2", self.physics.inertia_kg_m2)?;
        if self.physics.min_rpm > self.physics.max_rpm {
            return Err(invalid("physics.min_rpm", "above physics.max_rpm"));
        }

        positive("fuel.displacement_l", self.fuel.displacement_l)?;
        positive("fuel.injector_flow_mg_per_ms", self.fuel.injector_flow_mg_per_ms)?;
        positive("fuel.stoichiometric_afr", self.fuel.stoichiometric_afr)?;
        positive("fuel.power_enrichment_afr", self.fuel.power_enrichment_afr)?;
        if self.fuel.cylinders == 0 {
            return Err(invalid("fuel.cylinders", "must be at least 1"));
        }

        for (field, alpha) in [
            ("sensors.rpm_alpha", self.sensors.rpm_alpha),
            ("sensors.throttle_alpha", self.sensors.throttle_alpha),
            ("sensors.coolant_alpha", self.sensors.coolant_alpha),
        ] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(invalid(field, format!("{alpha} outside (0, 1]")));
            }
        }

        let tcu = &self.transmission;
        if tcu.min_gear == 0 || tcu.min_gear > tcu.max_gear {
            return Err(invalid(
                "transmission.min_gear",
                format!("gear range {}..={} is empty", tcu.min_gear, tcu.max_gear),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} must be positive")))
    }
}
