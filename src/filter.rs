use serde::{Deserialize, Serialize};

pub const DEFAULT_ALPHA: f32 = 0.1;

/// Single-pole exponential smoothing filter.
///
/// The first sample seeds the filter and is returned unchanged; every later
/// sample moves the output `alpha` of the way towards the input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LowPassFilter {
    alpha: f32,
    last_value: f32,
    initialized: bool,
}

impl LowPassFilter {
    pub fn new(alpha: f32) -> Self {
        debug_assert!(
            alpha > 0.0 && alpha <= 1.0,
            "Filter alpha {} outside (0, 1]",
            alpha
        );

        Self {
            alpha,
            last_value: 0.0,
            initialized: false,
        }
    }

    pub fn apply(&mut self, input: f32) -> f32 {
        if !self.initialized {
            self.initialized = true;
            self.last_value = input;
            return input;
        }

        self.last_value += self.alpha * (input - self.last_value);
        self.last_value
    }

    /// Last filtered output, or `None` before the first sample.
    pub fn value(&self) -> Option<f32> {
        self.initialized.then_some(self.last_value)
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn reset(&mut self) {
        self.initialized = false;
        self.last_value = 0.0;
    }
}

impl Default for LowPassFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}
