use serde::{Deserialize, Serialize};

use crate::math;
use crate::types::Quat;

/// Neutral ("zero") orientation reference.
///
/// Stores the inverse of the attitude captured at calibration time; every
/// incoming attitude is pre-multiplied by it so the calibration pose reads
/// as identity. Only an explicit `calibrate` call changes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    neutral_inverse: Quat,
    calibrated: bool,
}

impl Calibration {
    pub fn new() -> Self {
        Self {
            neutral_inverse: Quat::identity(),
            calibrated: false,
        }
    }

    /// Capture `current` as the neutral pose. With no observed attitude yet
    /// this is a no-op and returns false.
    pub fn calibrate(&mut self, current: Option<&Quat>) -> bool {
        let Some(attitude) = current else {
            return false;
        };
        self.neutral_inverse = math::invert(attitude);
        self.calibrated = true;
        true
    }

    /// Re-zero a raw attitude against the neutral pose.
    pub fn apply(&self, raw: &Quat) -> Quat {
        math::multiply(&self.neutral_inverse, raw)
    }

    pub fn neutral_inverse(&self) -> &Quat {
        &self.neutral_inverse
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new()
    }
}
