use serde::{Deserialize, Serialize};

pub const STOICHIOMETRIC_AFR: f32 = 14.7;
pub const POWER_ENRICHMENT_AFR: f32 = 12.5;
pub const DFCO_AFR: f32 = 20.0;

pub const DFCO_THROTTLE_PCT: f32 = 1.0;
pub const DFCO_MIN_RPM: f32 = 1500.0;
pub const POWER_ENRICHMENT_THROTTLE_PCT: f32 = 80.0;

pub const DISPLACEMENT_L: f32 = 2.0;
pub const CYLINDERS: u8 = 4;
/// Sea-level air density at 298 K, kg/m³.
pub const REFERENCE_AIR_DENSITY: f32 = 1.225;
pub const REFERENCE_TEMP_K: f32 = 298.0;
/// Injector flow, mg/ms.
pub const INJECTOR_FLOW_MG_PER_MS: f32 = 3.0;

pub const VE_BASE: f32 = 0.75;
pub const VE_RPM_GAIN: f32 = 0.15;
pub const VE_THROTTLE_GAIN: f32 = 0.10;
pub const VE_PEAK_RPM: f32 = 4000.0;

const KELVIN_OFFSET: f32 = 273.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuelConfig {
    pub displacement_l: f32,
    pub cylinders: u8,
    pub injector_flow_mg_per_ms: f32,
    pub stoichiometric_afr: f32,
    pub power_enrichment_afr: f32,
    pub power_enrichment_throttle_pct: f32,
    pub dfco_afr: f32,
    pub dfco_throttle_pct: f32,
    pub dfco_min_rpm: f32,
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self {
            displacement_l: DISPLACEMENT_L,
            cylinders: CYLINDERS,
            injector_flow_mg_per_ms: INJECTOR_FLOW_MG_PER_MS,
            stoichiometric_afr: STOICHIOMETRIC_AFR,
            power_enrichment_afr: POWER_ENRICHMENT_AFR,
            power_enrichment_throttle_pct: POWER_ENRICHMENT_THROTTLE_PCT,
            dfco_afr: DFCO_AFR,
            dfco_throttle_pct: DFCO_THROTTLE_PCT,
            dfco_min_rpm: DFCO_MIN_RPM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuelResult {
    pub pulse_width_ms: f32,
    pub afr: f32,
    pub fuel_cut: bool,
}

/// Speed-density fuelling: VE model -> air mass per cycle -> injector on-time.
#[derive(Debug, Clone)]
pub struct FuelControl {
    config: FuelConfig,
    current_afr: f32,
}

impl FuelControl {
    pub fn new() -> Self {
        Self::new_with_config(FuelConfig::default())
    }

    pub fn new_with_config(config: FuelConfig) -> Self {
        Self {
            current_afr: config.stoichiometric_afr,
            config,
        }
    }

    /// Injector pulse width in milliseconds. Updates [`FuelControl::afr`].
    pub fn calculate_injection_time(&mut self, rpm: f32, throttle_pct: f32, intake_temp_c: f32) -> f32 {
        self.evaluate(rpm, throttle_pct, intake_temp_c).pulse_width_ms
    }

    pub fn evaluate(&mut self, rpm: f32, throttle_pct: f32, intake_temp_c: f32) -> FuelResult {
        // Decel fuel cut-off: closed throttle above the recovery speed
        if throttle_pct < self.config.dfco_throttle_pct && rpm > self.config.dfco_min_rpm {
            self.current_afr = self.config.dfco_afr;
            return FuelResult {
                pulse_width_ms: 0.0,
                afr: self.current_afr,
                fuel_cut: true,
            };
        }

        let ve = volumetric_efficiency(rpm, throttle_pct);
        let density = air_density(intake_temp_c);
        let cylinder_volume_l = self.config.displacement_l / f32::from(self.config.cylinders);
        let air_mass_per_cycle = cylinder_volume_l * density * ve;

        let target_afr = if throttle_pct > self.config.power_enrichment_throttle_pct {
            self.config.power_enrichment_afr
        } else {
            self.config.stoichiometric_afr
        };

        let fuel_mass = air_mass_per_cycle / target_afr;
        let pulse_width_ms = fuel_mass * 1000.0 / self.config.injector_flow_mg_per_ms;

        self.current_afr = target_afr;

        FuelResult {
            pulse_width_ms: pulse_width_ms.max(0.0),
            afr: target_afr,
            fuel_cut: false,
        }
    }

    /// AFR used by the most recent calculation.
    pub fn afr(&self) -> f32 {
        self.current_afr
    }

    pub fn config(&self) -> &FuelConfig {
        &self.config
    }
}

impl Default for FuelControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Peaks near 4000 rpm at wide-open throttle. The RPM term is not clamped,
/// so speeds far outside 0..8000 rpm pull VE below the intended band.
pub fn volumetric_efficiency(rpm: f32, throttle_pct: f32) -> f32 {
    let rpm_term = 1.0 - (rpm - VE_PEAK_RPM).abs() / VE_PEAK_RPM;
    VE_BASE + VE_RPM_GAIN * rpm_term + VE_THROTTLE_GAIN * (throttle_pct / 100.0)
}

/// Colder intake air is denser.
pub fn air_density(intake_temp_c: f32) -> f32 {
    REFERENCE_AIR_DENSITY * (REFERENCE_TEMP_K / (intake_temp_c + KELVIN_OFFSET))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dfco_cuts_fuel() {
        let mut fuel = FuelControl::new();
        let pulse = fuel.calculate_injection_time(2000.0, 0.0, 30.0);
        assert_eq!(pulse, 0.0);
        assert_eq!(fuel.afr(), 20.0);
    }

    #[test]
    fn test_no_dfco_at_idle() {
        let mut fuel = FuelControl::new();
        let pulse = fuel.calculate_injection_time(800.0, 0.0, 30.0);
        assert!(pulse > 0.0);
        assert_eq!(fuel.afr(), 14.7);
    }

    #[test]
    fn test_ve_peaks_at_4000() {
        let peak = volumetric_efficiency(4000.0, 100.0);
        assert!((peak - 1.0).abs() < 1e-6);
        assert!(volumetric_efficiency(2000.0, 100.0) < peak);
        assert!(volumetric_efficiency(6000.0, 100.0) < peak);
    }

    #[test]
    fn test_ve_is_unclamped_far_outside_band() {
        // 12000 rpm -> rpm term is -1.0
        let ve = volumetric_efficiency(12000.0, 0.0);
        assert!((ve - 0.60).abs() < 1e-6);
    }

    #[test]
    fn test_reference_pulse_width() {
        let mut fuel = FuelControl::new();
        let pulse = fuel.calculate_injection_time(4000.0, 50.0, 24.85);

        // density 1.225, ve 0.95, air 0.5 * 1.225 * 0.95
        let expected = 0.5 * 1.225 * 0.95 / 14.7 * 1000.0 / 3.0;
        assert!((pulse - expected).abs() < 1e-2, "pulse {pulse} expected {expected}");
    }

    #[test]
    fn test_cold_air_needs_more_fuel() {
        let mut fuel = FuelControl::new();
        let cold = fuel.calculate_injection_time(3000.0, 40.0, -10.0);
        let hot = fuel.calculate_injection_time(3000.0, 40.0, 50.0);
        assert!(cold > hot);
    }
}
