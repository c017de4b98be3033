//! Single-pole high-pass filter for user acceleration.
//!
//! A slow exponential low-pass tracks the bias/drift component of the
//! signal and is subtracted from every raw sample:
//!
//! ```text
//! lp  = lp * beta + raw * (1 - beta)
//! out = raw - lp
//! ```
//!
//! Double integration amplifies any DC offset into unbounded position drift,
//! so this runs before the integrator. The accumulator starts at zero on
//! every session start; bias from a previous session is never carried over.

use crate::math;
use crate::types::Vec3;

/// Low-pass retention factor per sample.
pub const DEFAULT_BETA: f64 = 0.9;

/// Result of one filter update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HighPassStep {
    pub output: Vec3,
    /// The accumulator was re-seeded because input or state went non-finite.
    pub reset: bool,
}

#[derive(Clone, Debug)]
pub struct HighPassFilter {
    beta: f64,
    low_pass: Vec3,
}

impl HighPassFilter {
    pub fn new(beta: f64) -> Self {
        let beta = if beta.is_finite() { beta.clamp(0.0, 0.999) } else { DEFAULT_BETA };
        Self {
            beta,
            low_pass: Vec3::zeros(),
        }
    }

    pub fn update(&mut self, raw: &Vec3) -> HighPassStep {
        if !math::is_finite(raw) {
            self.reset();
            return HighPassStep {
                output: Vec3::zeros(),
                reset: true,
            };
        }

        self.low_pass = self.low_pass * self.beta + raw * (1.0 - self.beta);
        if !math::is_finite(&self.low_pass) {
            self.reset();
            return HighPassStep {
                output: Vec3::zeros(),
                reset: true,
            };
        }

        HighPassStep {
            output: raw - self.low_pass,
            reset: false,
        }
    }

    /// Re-seed the accumulator to zero.
    pub fn reset(&mut self) {
        self.low_pass = Vec3::zeros();
    }

    pub fn low_pass(&self) -> &Vec3 {
        &self.low_pass
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }
}

impl Default for HighPassFilter {
    fn default() -> Self {
        Self::new(DEFAULT_BETA)
    }
}
