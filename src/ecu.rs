use crate::bus::MessageBus;
use crate::config::EcuConfig;
use crate::dtc::{headline_label, DiagnosticsManager};
use crate::engine::{EnginePhysics, FuelControl, FuelResult};
use crate::nvram::FaultStore;
use crate::protocol::{EngineStatus, LoadPolicy, TransmissionCommand, TRANSMISSION_COMMAND_ID};
use crate::sensors::{SensorModule, SensorReadings};
use crate::state::EcuSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EcuStats {
    pub physics_steps: u64,
    pub status_frames_sent: u64,
    pub commands_applied: u64,
    pub frames_ignored: u64,
    pub fuel_cuts: u64,
}

/// The engine controller's component set. Each method is the body of one
/// periodic task; the simulation decides when they run.
#[derive(Debug)]
pub struct Ecu {
    sensors: SensorModule,
    physics: EnginePhysics,
    fuel: FuelControl,
    diagnostics: DiagnosticsManager,
    load_policy: LoadPolicy,
    physics_dt_s: f32,

    external_load_nm: f32,
    last_fuel: FuelResult,
    last_command: Option<TransmissionCommand>,
    stats: EcuStats,
}

impl Ecu {
    pub fn new(config: &EcuConfig, store: Box<dyn FaultStore>) -> Self {
        let fuel = FuelControl::new_with_config(config.fuel.clone());
        let last_fuel = FuelResult {
            pulse_width_ms: 0.0,
            afr: fuel.afr(),
            fuel_cut: false,
        };

        Self {
            sensors: SensorModule::new_with_config(config.sensors.clone()),
            physics: EnginePhysics::new_with_config(config.physics.clone()),
            fuel,
            diagnostics: DiagnosticsManager::new_with_config(store, config.diagnostics.clone()),
            load_policy: config.load_policy.clone(),
            physics_dt_s: config.cadence.physics_dt_seconds(),
            external_load_nm: 0.0,
            last_fuel,
            last_command: None,
            stats: EcuStats::default(),
        }
    }

    /// Sample sensors, integrate one physics step, feed the new speed back to
    /// the RPM sensor.
    pub fn step_physics(&mut self) -> SensorReadings {
        let readings = self.sensors.sample();
        let rpm = self
            .physics
            .update(readings.throttle_pct, self.external_load_nm, self.physics_dt_s);
        self.sensors.set_simulated_rpm(rpm);
        self.stats.physics_steps += 1;
        readings
    }

    pub fn engine_status(&self) -> EngineStatus {
        let r = self.sensors.latest();
        EngineStatus::from_readings(r.rpm, r.throttle_pct, r.coolant_c)
    }

    /// Put a `0x100` status frame on the bus.
    pub fn broadcast_status(&mut self, bus: &MessageBus, timestamp_us: u64) -> EngineStatus {
        let status = self.engine_status();
        bus.send(status.to_frame(timestamp_us));
        self.stats.status_frames_sent += 1;
        trace!(rpm = status.rpm, "Engine status sent");
        status
    }

    /// Drain the bus and apply every transmission command found, in order.
    /// Anything else is dropped.
    pub fn receive_commands(&mut self, bus: &MessageBus) -> Option<TransmissionCommand> {
        let mut applied = None;

        for frame in bus.drain() {
            if frame.id != TRANSMISSION_COMMAND_ID {
                self.stats.frames_ignored += 1;
                continue;
            }
            let Ok(command) = TransmissionCommand::decode(&frame) else {
                continue;
            };

            self.external_load_nm = self.load_policy.load_for(command.requested_torque_nm);
            self.last_command = Some(command);
            self.stats.commands_applied += 1;
            debug!(
                torque_nm = command.requested_torque_nm,
                gear = command.gear,
                load_nm = self.external_load_nm,
                "Transmission command applied"
            );
            applied = Some(command);
        }

        applied
    }

    pub fn update_fuel(&mut self) -> FuelResult {
        let r = self.sensors.latest();
        let result = self
            .fuel
            .evaluate(r.rpm as f32, r.throttle_pct, r.intake_air_temp_c);
        if result.fuel_cut {
            self.stats.fuel_cuts += 1;
        }
        self.last_fuel = result;
        result
    }

    pub fn run_diagnostics(&mut self) {
        self.diagnostics.evaluate(&self.sensors.latest());
    }

    pub fn heartbeat(&self) {
        let active = self.active_dtc_summary();
        if active.is_empty() {
            info!("Heartbeat OK");
        } else {
            info!(dtcs = %active, "Heartbeat OK");
        }
    }

    /// Active codes with their messages, e.g. `P0217 (Engine Overheat)`.
    pub fn active_dtc_summary(&self) -> String {
        self.diagnostics
            .iter_active()
            .map(|f| format!("{} ({})", f.code, f.message))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn snapshot(&self) -> EcuSnapshot {
        let r = self.sensors.latest();
        EcuSnapshot {
            rpm: r.rpm,
            throttle_pct: r.throttle_pct,
            coolant_c: r.coolant_c,
            load_nm: self.external_load_nm,
            injection_ms: self.last_fuel.pulse_width_ms,
            active_dtc: self.diagnostics.first_active().map(|f| headline_label(&f.code)),
        }
    }

    pub fn set_throttle_demand(&mut self, throttle_pct: f32) {
        self.sensors.set_throttle_demand(throttle_pct);
    }

    pub fn set_coolant_temp(&mut self, coolant_c: f32) {
        self.sensors.set_coolant_temp(coolant_c);
    }

    /// Starter-motor style override of the physics state.
    pub fn crank(&mut self, rpm: f32) {
        self.physics.set_rpm(rpm);
        self.sensors.set_simulated_rpm(self.physics.rpm());
    }

    pub fn rpm(&self) -> f32 {
        self.physics.rpm()
    }

    pub fn external_load(&self) -> f32 {
        self.external_load_nm
    }

    pub fn last_fuel(&self) -> FuelResult {
        self.last_fuel
    }

    pub fn last_command(&self) -> Option<TransmissionCommand> {
        self.last_command
    }

    pub fn readings(&self) -> SensorReadings {
        self.sensors.latest()
    }

    pub fn diagnostics(&self) -> &DiagnosticsManager {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut DiagnosticsManager {
        &mut self.diagnostics
    }

    pub fn stats(&self) -> EcuStats {
        self.stats
    }
}
