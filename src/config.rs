//! Tracker configuration.
//!
//! Mirrors the settings surface the host application exposes. Values coming
//! from a file or the command line are clamped into their recognized ranges
//! by [`TrackerConfig::sanitized`] before the pipeline sees them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};
use crate::filters::DEFAULT_BETA;
use crate::integrator::{BoundaryBrakePolicy, IntegrationLimits};
use crate::smoothing::MAX_SMOOTHING;

/// Longest position trail kept for display.
pub const MAX_TRAIL_LENGTH: usize = 50;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // ── Sampling ──
    /// Requested sensor update rate, 10–120 Hz.
    pub sample_hz: f64,

    // ── Pipeline ──
    /// Orientation smoothing factor, 0–0.98.
    pub smoothing: f64,
    /// Fraction of velocity removed per sample, 0–0.1.
    pub damping: f64,
    /// Speed limit in m/s, 1–20.
    pub max_speed: f64,
    /// Per-axis position limit in meters, 0.5–10.
    pub max_range: f64,
    /// Low-pass retention of the accelerometer high-pass filter.
    pub high_pass_beta: f64,
    pub boundary_brake: BoundaryBrakePolicy,

    // ── Outputs ──
    pub logging_enabled: bool,
    /// Directory for per-session CSV logs. `None` uses the system temp dir.
    pub log_dir: Option<PathBuf>,
    pub haptics_enabled: bool,
    /// Minimum spacing between feedback pulses, in seconds of sample time.
    pub haptic_interval_secs: f64,
    pub show_trails: bool,
    pub trail_length: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sample_hz: 60.0,
            smoothing: 0.25,
            damping: 0.05,
            max_speed: 3.0,
            max_range: 1.5,
            high_pass_beta: DEFAULT_BETA,
            boundary_brake: BoundaryBrakePolicy::default(),
            logging_enabled: false,
            log_dir: None,
            haptics_enabled: true,
            haptic_interval_secs: 0.5,
            show_trails: true,
            trail_length: MAX_TRAIL_LENGTH,
        }
    }
}

impl TrackerConfig {
    /// Clamp every field into its recognized range. Non-finite values fall
    /// back to the default for that field.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            sample_hz: clamp_or(self.sample_hz, 10.0, 120.0, defaults.sample_hz),
            smoothing: clamp_or(self.smoothing, 0.0, MAX_SMOOTHING, defaults.smoothing),
            damping: clamp_or(self.damping, 0.0, 0.1, defaults.damping),
            max_speed: clamp_or(self.max_speed, 1.0, 20.0, defaults.max_speed),
            max_range: clamp_or(self.max_range, 0.5, 10.0, defaults.max_range),
            high_pass_beta: clamp_or(self.high_pass_beta, 0.0, 0.999, defaults.high_pass_beta),
            boundary_brake: self.boundary_brake.sanitized(),
            haptic_interval_secs: clamp_or(
                self.haptic_interval_secs,
                0.0,
                60.0,
                defaults.haptic_interval_secs,
            ),
            trail_length: self.trail_length.min(MAX_TRAIL_LENGTH),
            ..self
        }
    }

    /// Time between requested samples.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / clamp_or(self.sample_hz, 10.0, 120.0, 60.0))
    }

    pub fn limits(&self) -> IntegrationLimits {
        IntegrationLimits {
            max_speed: self.max_speed,
            max_range: self.max_range,
            damping: self.damping,
            brake: self.boundary_brake,
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&contents).map_err(|e| {
            TrackerError::InvalidConfig(format!("{}: {}", path.display(), e))
        })?;
        Ok(config.sanitized())
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> TrackerResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TrackerError::InvalidConfig(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}
