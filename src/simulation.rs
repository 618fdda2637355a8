//! Task wiring for one simulated ECU and its transmission peer.
//!
//! Everything here lives on the simulation thread. Components are shared
//! between task closures with `Rc<RefCell<_>>`; only the [`MessageBus`] and
//! the [`StateStore`] are handed out across threads.
//!
//! Registration order matters because the bus has a single drain: the TCU
//! (or the sniffer when the TCU is disabled) must drain the status frames
//! before the ECU's command receiver drains the replies.

use crate::bus::MessageBus;
use crate::config::{ConfigError, EcuConfig};
use crate::ecu::Ecu;
use crate::nvram::FaultStore;
use crate::protocol::describe_frame;
use crate::scheduler::{Clock, MonotonicClock, Scheduler, SchedulerError, TaskResult};
use crate::state::StateStore;
use crate::tcu::TransmissionController;
use crate::telemetry::{TelemetryLog, TelemetrySample};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const TASK_PHYSICS: &str = "physics";
pub const TASK_CAN_TX: &str = "can_tx";
pub const TASK_TCU: &str = "tcu";
pub const TASK_CAN_SNIFFER: &str = "can_sniffer";
pub const TASK_CAN_RX: &str = "can_rx";
pub const TASK_FUEL: &str = "fuel";
pub const TASK_DIAGNOSTICS: &str = "diagnostics";
pub const TASK_HEARTBEAT: &str = "heartbeat";
pub const TASK_STATE_SYNC: &str = "state_sync";

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

type SharedTelemetry = Rc<RefCell<Option<TelemetryLog>>>;

pub struct Simulation<C: Clock + Clone + 'static = MonotonicClock> {
    scheduler: Scheduler<C>,
    ecu: Rc<RefCell<Ecu>>,
    tcu: Option<Rc<RefCell<TransmissionController>>>,
    telemetry: SharedTelemetry,
    bus: Arc<MessageBus>,
    state: Arc<StateStore>,
}

impl Simulation<MonotonicClock> {
    pub fn new(config: EcuConfig, store: Box<dyn FaultStore>) -> Result<Self, SimulationError> {
        Self::with_clock(config, store, MonotonicClock::new())
    }
}

impl<C: Clock + Clone + 'static> Simulation<C> {
    pub fn with_clock(
        config: EcuConfig,
        store: Box<dyn FaultStore>,
        clock: C,
    ) -> Result<Self, SimulationError> {
        config.validate()?;

        let mut scheduler = Scheduler::with_clock(clock);
        scheduler.set_failure_policy(config.failure_policy);

        let mut sim = Self {
            scheduler,
            ecu: Rc::new(RefCell::new(Ecu::new(&config, store))),
            tcu: config
                .transmission
                .enabled
                .then(|| Rc::new(RefCell::new(TransmissionController::new_with_config(config.transmission.clone())))),
            telemetry: Rc::new(RefCell::new(None)),
            bus: Arc::new(MessageBus::new()),
            state: Arc::new(StateStore::new()),
        };
        sim.wire(&config);

        info!(
            tasks = sim.scheduler.tasks().len(),
            tcu = sim.tcu.is_some(),
            policy = ?config.failure_policy,
            "Simulation wired"
        );
        Ok(sim)
    }

    fn wire(&mut self, config: &EcuConfig) {
        let cadence = &config.cadence;
        let ms = Duration::from_millis;

        let ecu = Rc::clone(&self.ecu);
        self.scheduler.register(TASK_PHYSICS, cadence.physics(), move || {
            ecu.borrow_mut().step_physics();
            Ok(())
        });

        let ecu = Rc::clone(&self.ecu);
        let bus = Arc::clone(&self.bus);
        let clock = self.scheduler.clock().clone();
        self.scheduler.register(TASK_CAN_TX, ms(cadence.can_tx_ms), move || {
            ecu.borrow_mut().broadcast_status(&bus, clock.now_us());
            Ok(())
        });

        if let Some(tcu) = &self.tcu {
            let tcu = Rc::clone(tcu);
            let bus = Arc::clone(&self.bus);
            let clock = self.scheduler.clock().clone();
            self.scheduler.register(TASK_TCU, ms(cadence.tcu_ms), move || {
                tcu.borrow_mut().step(&bus, clock.now_us());
                Ok(())
            });
        } else {
            let bus = Arc::clone(&self.bus);
            self.scheduler.register(TASK_CAN_SNIFFER, ms(cadence.tcu_ms), move || {
                for frame in bus.drain() {
                    if let Some(line) = describe_frame(&frame) {
                        info!(target: "can_sniffer", "{line}");
                    }
                }
                Ok(())
            });
        }

        let ecu = Rc::clone(&self.ecu);
        let bus = Arc::clone(&self.bus);
        self.scheduler.register(TASK_CAN_RX, ms(cadence.can_rx_ms), move || {
            ecu.borrow_mut().receive_commands(&bus);
            Ok(())
        });

        let ecu = Rc::clone(&self.ecu);
        self.scheduler.register(TASK_FUEL, ms(cadence.fuel_ms), move || {
            ecu.borrow_mut().update_fuel();
            Ok(())
        });

        let ecu = Rc::clone(&self.ecu);
        self.scheduler
            .register(TASK_DIAGNOSTICS, ms(cadence.diagnostics_ms), move || {
                ecu.borrow_mut().run_diagnostics();
                Ok(())
            });

        let ecu = Rc::clone(&self.ecu);
        self.scheduler.register(TASK_HEARTBEAT, ms(cadence.heartbeat_ms), move || {
            ecu.borrow().heartbeat();
            Ok(())
        });

        let ecu = Rc::clone(&self.ecu);
        let state = Arc::clone(&self.state);
        let telemetry = Rc::clone(&self.telemetry);
        let clock = self.scheduler.clock().clone();
        self.scheduler
            .register(TASK_STATE_SYNC, ms(cadence.state_sync_ms), move || {
                let snapshot = ecu.borrow().snapshot();
                state.publish(snapshot);

                if let Some(log) = telemetry.borrow_mut().as_mut() {
                    log.record(&TelemetrySample {
                        timestamp_s: clock.now_us() as f64 / 1_000_000.0,
                        snapshot,
                    })?;
                }
                Ok(())
            });
    }

    /// Rows are written by the state-sync task from now on.
    pub fn attach_telemetry(&mut self, log: TelemetryLog) {
        *self.telemetry.borrow_mut() = Some(log);
    }

    /// Add an extra periodic task, run after the built-in ones.
    pub fn register_task<F>(&mut self, name: &str, interval: Duration, callback: F)
    where
        F: FnMut() -> TaskResult + 'static,
    {
        self.scheduler.register(name, interval, callback);
    }

    pub fn tick(&mut self) -> Result<(), SimulationError> {
        Ok(self.scheduler.tick()?)
    }

    pub fn run_until(&mut self, stop: &AtomicBool) -> Result<(), SimulationError> {
        self.scheduler.run_until(stop)?;
        info!(ticks = self.scheduler.stats().ticks, "Simulation stopped");
        Ok(())
    }

    pub fn ecu(&self) -> Rc<RefCell<Ecu>> {
        Rc::clone(&self.ecu)
    }

    pub fn tcu(&self) -> Option<Rc<RefCell<TransmissionController>>> {
        self.tcu.clone()
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn state(&self) -> Arc<StateStore> {
        Arc::clone(&self.state)
    }

    pub fn scheduler(&self) -> &Scheduler<C> {
        &self.scheduler
    }

    pub fn task_runs(&self, name: &str) -> u64 {
        self.scheduler.task_runs(name).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvram::MemoryFaultStore;
    use crate::scheduler::ManualClock;

    fn manual_sim(config: EcuConfig) -> (Simulation<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let sim =
            Simulation::with_clock(config, Box::new(MemoryFaultStore::new()), clock.clone()).unwrap();
        (sim, clock)
    }

    #[test]
    fn test_task_order_with_tcu() {
        let (sim, _) = manual_sim(EcuConfig::default());
        let names: Vec<&str> = sim.scheduler().tasks().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                TASK_PHYSICS,
                TASK_CAN_TX,
                TASK_TCU,
                TASK_CAN_RX,
                TASK_FUEL,
                TASK_DIAGNOSTICS,
                TASK_HEARTBEAT,
                TASK_STATE_SYNC
            ]
        );
    }

    #[test]
    fn test_sniffer_replaces_disabled_tcu() {
        let mut config = EcuConfig::default();
        config.transmission.enabled = false;
        let (mut sim, clock) = manual_sim(config);

        assert!(sim.tcu().is_none());
        for _ in 0..10 {
            clock.advance(Duration::from_millis(10));
            sim.tick().unwrap();
        }
        assert_eq!(sim.task_runs(TASK_CAN_SNIFFER), 1);
        assert_eq!(sim.ecu().borrow().external_load(), 0.0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EcuConfig::default();
        config.cadence.fuel_ms = 0;
        let result = Simulation::with_clock(config, Box::new(MemoryFaultStore::new()), ManualClock::new());
        assert!(matches!(result, Err(SimulationError::Config(_))));
    }
}
