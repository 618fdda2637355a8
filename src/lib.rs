//! # ECU Simulator
//!
//! A real-time engine control unit simulation: engine physics, speed-density
//! fuelling, noisy filtered sensors, diagnostic trouble codes and a CAN-style
//! link to a simulated transmission controller, all driven by a cooperative
//! periodic scheduler.
//!
//! ## Features
//!
//! - **Periodic scheduler**: independent task rates with drift bounded by one
//!   polling quantum, overrun detection and a configurable failure policy
//! - **Message bus**: fixed 8-byte frames with a bit-exact wire layout
//! - **Engine model**: torque-balance RPM integration and VE-based injection
//! - **Diagnostics**: deduplicated DTCs persisted through a pluggable store
//! - **Thread-safe state snapshot**: for dashboards and exporters
//!
//! ## Quick Start
//!
//! ```rust
//! use ecusim::{EcuConfig, ManualClock, MemoryFaultStore, Simulation};
//! use std::time::Duration;
//!
//! let clock = ManualClock::new();
//! let mut sim = Simulation::with_clock(
//!     EcuConfig::default(),
//!     Box::new(MemoryFaultStore::new()),
//!     clock.clone(),
//! )?;
//!
//! for _ in 0..100 {
//!     clock.advance(Duration::from_millis(10));
//!     sim.tick()?;
//! }
//!
//! let snapshot = sim.state().read();
//! println!("RPM {} | DTC {}", snapshot.rpm, snapshot.dtc_label());
//! # Ok::<(), ecusim::SimulationError>(())
//! ```
//!
//! ## Architecture
//!
//! - [`scheduler`] - Periodic task scheduler and clocks
//! - [`bus`] / [`protocol`] - Frame transport and wire layouts
//! - [`engine`] - Physics and fuel control
//! - [`sensors`] / [`filter`] - Virtual sensor front-end
//! - [`dtc`] / [`nvram`] - Fault codes and their persistence
//! - [`tcu`] - Simulated transmission controller
//! - [`ecu`] / [`simulation`] - Composition and task wiring
//! - [`state`] / [`telemetry`] - Snapshot hand-off and CSV export

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]

extern crate alloc;

pub mod bus;
pub mod config;
pub mod dtc;
pub mod ecu;
pub mod engine;
pub mod filter;
pub mod nvram;
pub mod protocol;
pub mod scheduler;
pub mod sensors;
pub mod simulation;
pub mod state;
pub mod tcu;
pub mod telemetry;

// Re-export main public types for convenience
pub use bus::{Frame, MessageBus};
pub use config::{CadenceConfig, ConfigError, EcuConfig};
pub use dtc::{DiagnosticsManager, Fault};
pub use ecu::Ecu;
pub use engine::{EnginePhysics, FuelControl};
pub use nvram::{FaultStore, FileFaultStore, MemoryFaultStore};
pub use scheduler::{Clock, FailurePolicy, ManualClock, MonotonicClock, Scheduler, TaskError};
pub use simulation::{Simulation, SimulationError};
pub use state::{EcuSnapshot, StateStore};
pub use telemetry::TelemetryLog;
