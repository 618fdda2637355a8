use crate::filter::LowPassFilter;
use serde::{Deserialize, Serialize};

pub const RPM_FILTER_ALPHA: f32 = 0.15;
pub const THROTTLE_FILTER_ALPHA: f32 = 0.20;
pub const COOLANT_FILTER_ALPHA: f32 = 0.10;

const INITIAL_RPM: f32 = 800.0;
const INITIAL_THROTTLE_PCT: f32 = 20.0;
const INITIAL_COOLANT_C: f32 = 90.0;
const INTAKE_AIR_TEMP_C: f32 = 25.0;

// Peak-to-peak noise amplitude is twice these values
const RPM_NOISE: f32 = 25.0;
const THROTTLE_NOISE_PCT: f32 = 0.4;
const COOLANT_NOISE_C: f32 = 1.5;

const NOISE_SEED: u64 = 0x1234_5678_9ABC_DEF0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub rpm_alpha: f32,
    pub throttle_alpha: f32,
    pub coolant_alpha: f32,
    pub rpm_noise: f32,
    pub throttle_noise_pct: f32,
    pub coolant_noise_c: f32,
    pub initial_rpm: f32,
    pub initial_throttle_pct: f32,
    pub initial_coolant_c: f32,
    pub intake_air_temp_c: f32,
    pub noise_seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            rpm_alpha: RPM_FILTER_ALPHA,
            throttle_alpha: THROTTLE_FILTER_ALPHA,
            coolant_alpha: COOLANT_FILTER_ALPHA,
            rpm_noise: RPM_NOISE,
            throttle_noise_pct: THROTTLE_NOISE_PCT,
            coolant_noise_c: COOLANT_NOISE_C,
            initial_rpm: INITIAL_RPM,
            initial_throttle_pct: INITIAL_THROTTLE_PCT,
            initial_coolant_c: INITIAL_COOLANT_C,
            intake_air_temp_c: INTAKE_AIR_TEMP_C,
            noise_seed: NOISE_SEED,
        }
    }
}

impl SensorConfig {
    /// Same filters and starting values, but every channel reads its true value.
    pub fn noiseless() -> Self {
        Self {
            rpm_noise: 0.0,
            throttle_noise_pct: 0.0,
            coolant_noise_c: 0.0,
            ..Self::default()
        }
    }
}

/// One filtered sample of every channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    pub rpm: i32,
    pub throttle_pct: f32,
    pub coolant_c: f32,
    pub intake_air_temp_c: f32,
}

/// Deterministic uniform noise source.
#[derive(Debug, Clone)]
pub struct NoiseSource {
    state: u64,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_random(&mut self) -> u64 {
        // 64-bit LCG (Knuth MMIX constants); only the high bits are used
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }

    /// Uniform value in `[0, 1)`.
    pub fn unit(&mut self) -> f32 {
        (self.next_random() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Uniform value in `[-amplitude, amplitude)`.
    pub fn symmetric(&mut self, amplitude: f32) -> f32 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        (self.unit() * 2.0 - 1.0) * amplitude
    }
}

/// Virtual sensor front-end: true value + noise, then low-pass filtered.
///
/// The "true" values come from elsewhere in the simulation: RPM from the
/// physics model, throttle from the driver demand, coolant from the
/// configured/overridden engine temperature.
#[derive(Debug, Clone)]
pub struct SensorModule {
    config: SensorConfig,
    rpm_filter: LowPassFilter,
    throttle_filter: LowPassFilter,
    coolant_filter: LowPassFilter,
    noise: NoiseSource,

    simulated_rpm: f32,
    throttle_demand_pct: f32,
    coolant_c: f32,

    latest: SensorReadings,
}

impl SensorModule {
    pub fn new() -> Self {
        Self::new_with_config(SensorConfig::default())
    }

    pub fn new_with_config(config: SensorConfig) -> Self {
        let latest = SensorReadings {
            rpm: config.initial_rpm as i32,
            throttle_pct: config.initial_throttle_pct,
            coolant_c: config.initial_coolant_c,
            intake_air_temp_c: config.intake_air_temp_c,
        };

        Self {
            rpm_filter: LowPassFilter::new(config.rpm_alpha),
            throttle_filter: LowPassFilter::new(config.throttle_alpha),
            coolant_filter: LowPassFilter::new(config.coolant_alpha),
            noise: NoiseSource::new(config.noise_seed),
            simulated_rpm: config.initial_rpm,
            throttle_demand_pct: config.initial_throttle_pct,
            coolant_c: config.initial_coolant_c,
            latest,
            config,
        }
    }

    /// Sample all channels once, advancing every filter by one step.
    pub fn sample(&mut self) -> SensorReadings {
        let raw_rpm = (self.simulated_rpm + self.noise.symmetric(self.config.rpm_noise)).max(0.0);
        let raw_throttle = (self.throttle_demand_pct
            + self.noise.symmetric(self.config.throttle_noise_pct))
        .clamp(0.0, 100.0);
        let raw_coolant = self.coolant_c + self.noise.symmetric(self.config.coolant_noise_c);

        self.latest = SensorReadings {
            rpm: self.rpm_filter.apply(raw_rpm) as i32,
            throttle_pct: self.throttle_filter.apply(raw_throttle),
            coolant_c: self.coolant_filter.apply(raw_coolant),
            intake_air_temp_c: self.config.intake_air_temp_c,
        };

        self.latest
    }

    /// Most recent sample without advancing the filters.
    pub fn latest(&self) -> SensorReadings {
        self.latest
    }

    /// Physics-driven RPM override.
    pub fn set_simulated_rpm(&mut self, rpm: f32) {
        self.simulated_rpm = rpm.max(0.0);
    }

    pub fn set_throttle_demand(&mut self, throttle_pct: f32) {
        self.throttle_demand_pct = throttle_pct.clamp(0.0, 100.0);
    }

    pub fn throttle_demand(&self) -> f32 {
        self.throttle_demand_pct
    }

    pub fn set_coolant_temp(&mut self, coolant_c: f32) {
        self.coolant_c = coolant_c;
    }

    pub fn intake_air_temp(&self) -> f32 {
        self.config.intake_air_temp_c
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }
}

impl Default for SensorModule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_source_range() {
        let mut noise = NoiseSource::new(42);
        for _ in 0..1000 {
            let unit = noise.unit();
            assert!((0.0..1.0).contains(&unit));
            let sym = noise.symmetric(5.0);
            assert!((-5.0..5.0).contains(&sym));
        }
        assert_eq!(noise.symmetric(0.0), 0.0);
    }

    #[test]
    fn test_noise_source_is_deterministic() {
        let mut a = NoiseSource::new(7);
        let mut b = NoiseSource::new(7);
        for _ in 0..16 {
            assert_eq!(a.unit(), b.unit());
        }
    }

    #[test]
    fn test_noiseless_first_sample_matches_true_values() {
        let mut sensors = SensorModule::new_with_config(SensorConfig::noiseless());
        let readings = sensors.sample();

        assert_eq!(readings.rpm, 800);
        assert_eq!(readings.throttle_pct, 20.0);
        assert_eq!(readings.coolant_c, 90.0);
        assert_eq!(readings.intake_air_temp_c, 25.0);
        assert_eq!(sensors.latest(), readings);
    }

    #[test]
    fn test_rpm_override_is_tracked_through_filter() {
        let mut sensors = SensorModule::new_with_config(SensorConfig::noiseless());
        sensors.sample();
        sensors.set_simulated_rpm(3000.0);

        let first = sensors.sample().rpm;
        assert!(first > 800 && first < 3000);

        for _ in 0..200 {
            sensors.sample();
        }
        assert!((sensors.latest().rpm - 3000).abs() <= 1);
    }

    #[test]
    fn test_throttle_reading_stays_in_range() {
        let mut sensors = SensorModule::new();
        sensors.set_throttle_demand(0.0);
        for _ in 0..500 {
            let throttle = sensors.sample().throttle_pct;
            assert!((0.0..=100.0).contains(&throttle));
        }

        sensors.set_throttle_demand(150.0);
        assert_eq!(sensors.throttle_demand(), 100.0);
    }

    #[test]
    fn test_noisy_coolant_stays_near_true_value() {
        let mut sensors = SensorModule::new();
        sensors.set_coolant_temp(100.0);
        for _ in 0..300 {
            sensors.sample();
        }
        let coolant = sensors.latest().coolant_c;
        assert!((coolant - 100.0).abs() < 2.0, "coolant {coolant}");
    }
}
