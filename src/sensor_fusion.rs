// sensor_fusion.rs: pure per-sample pipeline
//
// Nothing in here knows about threads, channels or the sensor source.
// One raw sample goes in; calibrated attitude, integrated kinematics, a
// smoothed display orientation and a list of events come out. The session
// layer owns the I/O around it, and tests can drive it sample by sample.
//
// Per sample:
//   calibration → Δt bookkeeping → high-pass → rotate to world → integrate
//   → trail → smoothing

use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::filters::HighPassFilter;
use crate::integrator::{clamp_dt, KinematicIntegrator, StepReport};
use crate::math;
use crate::smoothing::OrientationSmoother;
use crate::types::{Quat, RunState, Sample, Vec3, GRAVITY};

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    SpeedClamped { from_speed: f64, limit: f64 },
    RangeClamped { position: Vec3 },
    BoundaryBrake { distance: f64 },
    VelocityReset,
    FilterReset,
}

impl FusionEvent {
    /// Speed or range saturation, the trigger for user feedback.
    pub fn is_saturation(&self) -> bool {
        matches!(
            self,
            FusionEvent::SpeedClamped { .. } | FusionEvent::RangeClamped { .. }
        )
    }
}

// ─── Per-sample output ───────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct FusionOutput {
    /// Integration interval actually used, already clamped to [0, 1] s.
    pub dt: f64,
    /// Attitude after re-zeroing against the neutral pose.
    pub calibrated: Quat,
    pub report: StepReport,
    pub events: Vec<FusionEvent>,
}

impl FusionOutput {
    pub fn saturated(&self) -> bool {
        self.report.saturated()
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Immutable view of the pipeline handed to the presentation side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: RunState,
    /// Timestamp of the last processed sample, 0 before the first one.
    pub timestamp: f64,
    /// Smoothed display orientation.
    pub orientation: Quat,
    pub position: Vec3,
    pub velocity: Vec3,
    pub sample_latency_ms: f64,
    pub status: String,
    /// Most recent positions, oldest first. `None` while trails are off.
    pub trail: Option<Vec<Vec3>>,
    /// The last sample hit a speed or range limit.
    pub saturated: bool,
    pub sample_count: u64,
}

impl Snapshot {
    pub fn idle(status: impl Into<String>) -> Self {
        Self {
            state: RunState::Idle,
            timestamp: 0.0,
            orientation: Quat::identity(),
            position: Vec3::zeros(),
            velocity: Vec3::zeros(),
            sample_latency_ms: 0.0,
            status: status.into(),
            trail: None,
            saturated: false,
            sample_count: 0,
        }
    }

    /// Write the snapshot as pretty JSON, for external status readers.
    pub fn save(&self, path: impl AsRef<Path>) -> TrackerResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TrackerError::Internal(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}

// ─── The pipeline ────────────────────────────────────────────────────────────

pub struct SensorFusion {
    config: TrackerConfig,

    calibration: Calibration,
    high_pass: HighPassFilter,
    integrator: KinematicIntegrator,
    smoother: OrientationSmoother,

    trail: VecDeque<Vec3>,

    // Sequencing
    last_timestamp: Option<f64>,
    last_raw_attitude: Option<Quat>,
    sample_count: u64,
    last_report: StepReport,
}

impl SensorFusion {
    pub fn new(config: TrackerConfig) -> Self {
        let config = config.sanitized();
        Self {
            calibration: Calibration::new(),
            high_pass: HighPassFilter::new(config.high_pass_beta),
            integrator: KinematicIntegrator::new(),
            smoother: OrientationSmoother::new(config.smoothing),
            trail: VecDeque::with_capacity(config.trail_length),
            last_timestamp: None,
            last_raw_attitude: None,
            sample_count: 0,
            last_report: StepReport::default(),
            config,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Begin a session: fresh kinematics, filter, trail and Δt bookkeeping.
    /// The calibration reference is kept.
    pub fn start_session(&mut self) {
        self.integrator.start();
        self.high_pass.reset();
        self.smoother.reset();
        self.trail.clear();
        self.last_timestamp = None;
        self.sample_count = 0;
        self.last_report = StepReport::default();
    }

    pub fn stop_session(&mut self) {
        self.integrator.stop();
        self.trail.clear();
        self.last_timestamp = None;
        self.last_report = StepReport::default();
    }

    /// Zero velocity, position and trail without touching orientation or
    /// calibration.
    pub fn recenter(&mut self) {
        self.integrator.recenter();
        self.trail.clear();
    }

    /// Use the most recent raw attitude as the neutral pose. Returns false if
    /// no sample has been seen yet.
    pub fn calibrate(&mut self) -> bool {
        self.calibration.calibrate(self.last_raw_attitude.as_ref())
    }

    /// Swap in a new configuration between samples.
    pub fn apply_config(&mut self, config: TrackerConfig) {
        let config = config.sanitized();
        if config.high_pass_beta != self.config.high_pass_beta {
            self.high_pass = HighPassFilter::new(config.high_pass_beta);
        }
        self.smoother.set_smoothing(config.smoothing);
        if !config.show_trails {
            self.trail.clear();
        }
        while self.trail.len() > config.trail_length {
            self.trail.pop_front();
        }
        self.config = config;
    }

    // ── Sample feed ──────────────────────────────────────────────────────

    pub fn feed_sample(&mut self, sample: &Sample) -> FusionOutput {
        let mut events = Vec::new();

        self.last_raw_attitude = Some(sample.attitude);
        let calibrated = self.calibration.apply(&sample.attitude);

        let dt = self.advance_clock(sample.timestamp);
        self.sample_count += 1;

        let report = if dt > 0.0 {
            let filtered = self.high_pass.update(&sample.user_accel);
            if filtered.reset {
                debug!("high-pass filter re-seeded after non-finite input");
                events.push(FusionEvent::FilterReset);
            }

            let world_accel = math::rotate(&calibrated, &filtered.output) * GRAVITY;
            let report = self
                .integrator
                .step(&world_accel, dt, &self.config.limits());

            if report.integrated {
                self.push_trail();
            }
            events.extend(self.report_events(&report));
            report
        } else {
            StepReport::default()
        };
        self.last_report = report;

        self.smoother.update(&calibrated);

        FusionOutput {
            dt,
            calibrated,
            report,
            events,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn snapshot(&self, status: &str, sample_latency_ms: f64) -> Snapshot {
        Snapshot {
            state: self.integrator.state(),
            timestamp: self.last_timestamp.unwrap_or(0.0),
            orientation: self.smoother.displayed(),
            position: *self.integrator.position(),
            velocity: *self.integrator.velocity(),
            sample_latency_ms,
            status: status.to_string(),
            trail: self
                .config
                .show_trails
                .then(|| self.trail.iter().copied().collect()),
            saturated: self.last_report.saturated(),
            sample_count: self.sample_count,
        }
    }

    pub fn state(&self) -> RunState {
        self.integrator.state()
    }

    pub fn position(&self) -> &Vec3 {
        self.integrator.position()
    }

    pub fn velocity(&self) -> &Vec3 {
        self.integrator.velocity()
    }

    pub fn displayed_orientation(&self) -> Quat {
        self.smoother.displayed()
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn last_raw_attitude(&self) -> Option<&Quat> {
        self.last_raw_attitude.as_ref()
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// Δt against the previous sample; zero for the first sample of a session.
    fn advance_clock(&mut self, timestamp: f64) -> f64 {
        let dt = match self.last_timestamp {
            Some(previous) => clamp_dt(timestamp - previous),
            None => 0.0,
        };
        if timestamp.is_finite() {
            self.last_timestamp = Some(timestamp);
        }
        dt
    }

    fn push_trail(&mut self) {
        if !self.config.show_trails || self.config.trail_length == 0 {
            return;
        }
        self.trail.push_back(*self.integrator.position());
        while self.trail.len() > self.config.trail_length {
            self.trail.pop_front();
        }
    }

    fn report_events(&self, report: &StepReport) -> Vec<FusionEvent> {
        let mut events = Vec::new();
        if report.velocity_reset {
            events.push(FusionEvent::VelocityReset);
        }
        if let Some(from_speed) = report.speed_clamped {
            debug!("speed clamped {:.3} -> {:.3} m/s", from_speed, self.config.max_speed);
            events.push(FusionEvent::SpeedClamped {
                from_speed,
                limit: self.config.max_speed,
            });
        }
        if report.range_clamped {
            let position = *self.integrator.position();
            debug!("position clamped to {:?}", position);
            events.push(FusionEvent::RangeClamped { position });
        }
        if report.braked {
            events.push(FusionEvent::BoundaryBrake {
                distance: self.integrator.position().norm(),
            });
        }
        events
    }
}
