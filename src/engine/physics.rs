use serde::{Deserialize, Serialize};

pub const IDLE_RPM: f32 = 800.0;
pub const MIN_RPM: f32 = 0.0;
pub const REDLINE_RPM: f32 = 7000.0;

/// N·m of combustion torque per percent of throttle (250 N·m at WOT).
pub const TORQUE_PER_THROTTLE_PCT: f32 = 2.5;
pub const BASE_FRICTION_NM: f32 = 10.0;
pub const FRICTION_NM_PER_RPM: f32 = 0.02;
/// Flywheel + crank, kg·m².
pub const ROTATIONAL_INERTIA: f32 = 0.2;
/// rad/s² to RPM/s, 60 / 2π.
pub const RAD_S_TO_RPM: f32 = 9.549;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub initial_rpm: f32,
    pub min_rpm: f32,
    pub max_rpm: f32,
    pub torque_per_throttle_pct: f32,
    pub base_friction_nm: f32,
    pub friction_nm_per_rpm: f32,
    pub inertia_kg_m2: f32,
    pub rad_s_to_rpm: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            initial_rpm: IDLE_RPM,
            min_rpm: MIN_RPM,
            max_rpm: REDLINE_RPM,
            torque_per_throttle_pct: TORQUE_PER_THROTTLE_PCT,
            base_friction_nm: BASE_FRICTION_NM,
            friction_nm_per_rpm: FRICTION_NM_PER_RPM,
            inertia_kg_m2: ROTATIONAL_INERTIA,
            rad_s_to_rpm: RAD_S_TO_RPM,
        }
    }
}

/// Torque terms of the most recent integration step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TorqueBalance {
    pub combustion_nm: f32,
    pub friction_nm: f32,
    pub load_nm: f32,
    pub net_nm: f32,
}

/// One-dimensional crankshaft model: throttle and load in, RPM out.
///
/// Explicit Euler integration of `J·dω/dt = T_comb - T_fric - T_load`. The
/// step size must match the rate the model is driven at; larger steps are
/// accepted but lose stability.
#[derive(Debug, Clone)]
pub struct EnginePhysics {
    config: PhysicsConfig,
    rpm: f32,
    last_balance: TorqueBalance,
}

impl EnginePhysics {
    pub fn new() -> Self {
        Self::new_with_config(PhysicsConfig::default())
    }

    pub fn new_with_config(config: PhysicsConfig) -> Self {
        let rpm = config.initial_rpm.clamp(config.min_rpm, config.max_rpm);
        Self {
            config,
            rpm,
            last_balance: TorqueBalance::default(),
        }
    }

    pub fn update(&mut self, throttle_pct: f32, load_torque_nm: f32, dt_seconds: f32) -> f32 {
        let combustion_nm = throttle_pct * self.config.torque_per_throttle_pct;
        let friction_nm = self.config.base_friction_nm + self.rpm * self.config.friction_nm_per_rpm;
        let net_nm = combustion_nm - friction_nm - load_torque_nm;

        let angular_accel = net_nm / self.config.inertia_kg_m2;
        let rpm_change = angular_accel * dt_seconds * self.config.rad_s_to_rpm;

        // Stall and rev limiter
        self.rpm = (self.rpm + rpm_change).clamp(self.config.min_rpm, self.config.max_rpm);

        self.last_balance = TorqueBalance {
            combustion_nm,
            friction_nm,
            load_nm: load_torque_nm,
            net_nm,
        };

        debug_assert!(
            self.rpm >= self.config.min_rpm && self.rpm <= self.config.max_rpm,
            "Engine speed {} outside [{}, {}]",
            self.rpm,
            self.config.min_rpm,
            self.config.max_rpm
        );

        self.rpm
    }

    pub fn rpm(&self) -> f32 {
        self.rpm
    }

    /// Starter-motor style override. Clamped like an integration step.
    pub fn set_rpm(&mut self, rpm: f32) {
        self.rpm = rpm.clamp(self.config.min_rpm, self.config.max_rpm);
    }

    pub fn last_balance(&self) -> TorqueBalance {
        self.last_balance
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }
}

impl Default for EnginePhysics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_idle() {
        assert_eq!(EnginePhysics::new().rpm(), 800.0);
    }

    #[test]
    fn test_single_step_matches_torque_balance() {
        let mut engine = EnginePhysics::new();
        let rpm = engine.update(50.0, 0.0, 0.01);

        // combustion 125, friction 10 + 16 = 26, net 99
        let expected = 800.0 + (99.0 / 0.2) * 0.01 * 9.549;
        assert!((rpm - expected).abs() < 1e-3, "rpm {rpm} expected {expected}");

        let balance = engine.last_balance();
        assert_eq!(balance.combustion_nm, 125.0);
        assert!((balance.friction_nm - 26.0).abs() < 1e-4);
        assert!((balance.net_nm - 99.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_throttle_heavy_load_clamps_to_zero() {
        let mut engine = EnginePhysics::new();
        for _ in 0..100 {
            engine.update(0.0, 300.0, 0.01);
        }
        assert_eq!(engine.rpm(), 0.0);
    }

    #[test]
    fn test_full_throttle_clamps_to_redline() {
        let mut engine = EnginePhysics::new();
        for _ in 0..2000 {
            engine.update(100.0, 0.0, 0.01);
        }
        assert!(engine.rpm() <= 7000.0);
        // 250 Nm combustion balances friction at 12000 rpm, so the limiter holds
        assert_eq!(engine.rpm(), 7000.0);
    }

    #[test]
    fn test_set_rpm_is_clamped() {
        let mut engine = EnginePhysics::new();
        engine.set_rpm(9000.0);
        assert_eq!(engine.rpm(), 7000.0);
        engine.set_rpm(-5.0);
        assert_eq!(engine.rpm(), 0.0);
    }
}
