//! Session lifecycle and per-sample sequencing.
//!
//! The controller lives on the presentation side. Pipeline state sits behind
//! one mutex that the sensor worker takes once per sample; after each sample
//! an immutable [`Snapshot`] is swapped into a `watch` channel, so readers
//! never see a half-updated state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::feedback::{FeedbackGate, FeedbackSink, LogFeedback};
use crate::log_sink::{self, CsvLogSink};
use crate::sensor_fusion::{SensorFusion, Snapshot};
use crate::sensors::{Clock, MonotonicClock, SampleCallback, SensorSource};
use crate::types::{RunState, SensorEvent};

pub const STATUS_IDLE: &str = "Idle";
pub const STATUS_RUNNING: &str = "Running";
pub const STATUS_STOPPED: &str = "Stopped";

/// Everything the sensor worker touches.
struct SessionCore {
    fusion: SensorFusion,
    status: String,
    gate: FeedbackGate,
    log: Option<CsvLogSink>,
    last_latency_ms: f64,
}

impl SessionCore {
    fn snapshot(&self) -> Snapshot {
        self.fusion.snapshot(&self.status, self.last_latency_ms)
    }
}

/// State shared with the sensor callback.
#[derive(Clone)]
struct Shared {
    core: Arc<Mutex<SessionCore>>,
    publisher: Arc<watch::Sender<Arc<Snapshot>>>,
    clock: Arc<dyn Clock>,
    feedback: Arc<dyn FeedbackSink>,
}

impl Shared {
    fn publish(&self, core: &SessionCore) {
        self.publisher.send_replace(Arc::new(core.snapshot()));
    }

    /// Process one delivered event on the sensor worker.
    fn on_event(&self, event: SensorEvent) {
        let Ok(mut core) = self.core.lock() else {
            debug!("session lock poisoned, dropping sample");
            return;
        };

        let sample = match event {
            Ok(sample) => sample,
            Err(message) => {
                if core.fusion.state() == RunState::Running {
                    let err = TrackerError::SampleDelivery(message);
                    warn!("sensor delivery failed: {}", err);
                    core.fusion.stop_session();
                    core.status = err.status_text();
                    self.publish(&core);
                }
                return;
            }
        };

        if core.fusion.state() != RunState::Running {
            return;
        }

        let output = core.fusion.feed_sample(&sample);

        if output.report.integrated {
            let position = *core.fusion.position();
            if let Some(log) = core.log.as_mut() {
                log.append(sample.timestamp, &output.calibrated, &sample.user_accel, &position);
            }
        }

        if output.saturated()
            && core.fusion.config().haptics_enabled
            && core.gate.ready_and_touch(sample.timestamp)
        {
            self.feedback.pulse();
        }

        let latency = (self.clock.now_secs() - sample.timestamp) * 1000.0;
        core.last_latency_ms = if latency.is_finite() { latency.max(0.0) } else { 0.0 };

        self.publish(&core);
    }
}

pub struct SessionController {
    shared: Shared,
    source: Box<dyn SensorSource>,
    /// The source has been started and not yet stopped.
    source_active: bool,
}

impl SessionController {
    pub fn new(config: TrackerConfig, source: Box<dyn SensorSource>) -> Self {
        let config = config.sanitized();
        let core = SessionCore {
            gate: FeedbackGate::new(config.haptic_interval_secs),
            fusion: SensorFusion::new(config),
            status: STATUS_IDLE.to_string(),
            log: None,
            last_latency_ms: 0.0,
        };
        let (publisher, _) = watch::channel(Arc::new(core.snapshot()));

        Self {
            shared: Shared {
                core: Arc::new(Mutex::new(core)),
                publisher: Arc::new(publisher),
                clock: Arc::new(MonotonicClock),
                feedback: Arc::new(LogFeedback),
            },
            source,
            source_active: false,
        }
    }

    /// Clock used for the latency estimate. Takes effect on the next start.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.shared.clock = clock;
        self
    }

    /// Actuator for saturation pulses. Takes effect on the next start.
    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackSink>) -> Self {
        self.shared.feedback = feedback;
        self
    }

    fn lock_core(&self) -> TrackerResult<MutexGuard<'_, SessionCore>> {
        self.shared
            .core
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire session lock".to_string()))
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Idle → Running. A no-op while already running.
    pub fn start(&mut self) -> TrackerResult<()> {
        if self.source_active && self.state()? == RunState::Running {
            debug!("start ignored, session already running");
            return Ok(());
        }
        if self.source_active {
            // Left over from a delivery error.
            self.source.stop();
            self.source_active = false;
        }
        // Joining the writer happens outside the core lock.
        let stale_log = self.lock_core()?.log.take();
        if let Some(log) = stale_log {
            log.close();
        }

        if !self.source.is_available() {
            return self.refuse(TrackerError::SensorUnavailable);
        }
        if let Err(err) = self.source.authorization().check() {
            return self.refuse(err);
        }

        let log = open_log(&self.config()?);
        let interval = {
            let mut core = self.lock_core()?;
            core.fusion.start_session();
            core.gate.reset();
            core.last_latency_ms = 0.0;
            core.log = log;
            core.status = STATUS_RUNNING.to_string();
            self.shared.publish(&core);
            core.fusion.config().sample_interval()
        };

        let shared = self.shared.clone();
        let callback: SampleCallback = Box::new(move |event| shared.on_event(event));
        if let Err(err) = self.source.start(interval, callback) {
            let log = {
                let mut core = self.lock_core()?;
                core.fusion.stop_session();
                core.status = err.status_text();
                self.shared.publish(&core);
                core.log.take()
            };
            if let Some(log) = log {
                log.close();
            }
            warn!("sensor source failed to start: {}", err);
            return Err(err);
        }

        self.source_active = true;
        info!("session started at {:.0} Hz", 1.0 / interval.as_secs_f64());
        Ok(())
    }

    fn refuse(&mut self, err: TrackerError) -> TrackerResult<()> {
        warn!("session not started: {}", err);
        let mut core = self.lock_core()?;
        core.status = err.status_text();
        self.shared.publish(&core);
        Err(err)
    }

    /// Running → Idle. Idempotent.
    pub fn stop(&mut self) -> TrackerResult<()> {
        if self.source_active {
            // Never under the core lock: the worker may be waiting on it.
            self.source.stop();
            self.source_active = false;
        }

        let log = {
            let mut core = self.lock_core()?;
            let was_running = core.fusion.state() == RunState::Running;
            let log = core.log.take();
            if was_running {
                core.fusion.stop_session();
                core.status = STATUS_STOPPED.to_string();
                self.shared.publish(&core);
                info!("session stopped after {} samples", core.fusion.sample_count());
            }
            log
        };
        if let Some(log) = log {
            log.close();
        }
        Ok(())
    }

    /// Stop if running, start otherwise. Returns the resulting state.
    pub fn toggle(&mut self) -> TrackerResult<RunState> {
        if self.is_running()? {
            self.stop()?;
        } else {
            self.start()?;
        }
        self.state()
    }

    // ── Between-sample operations ────────────────────────────────────────

    pub fn recenter(&self) -> TrackerResult<()> {
        let mut core = self.lock_core()?;
        core.fusion.recenter();
        self.shared.publish(&core);
        info!("recentered");
        Ok(())
    }

    /// Take the last observed attitude as the neutral pose. Returns false if
    /// nothing has been observed yet.
    pub fn calibrate(&self) -> TrackerResult<bool> {
        let mut core = self.lock_core()?;
        let calibrated = core.fusion.calibrate();
        if calibrated {
            info!("calibrated to current attitude");
        } else {
            debug!("calibrate ignored, no sample observed yet");
        }
        Ok(calibrated)
    }

    /// Change the sample rate; a running session restarts to apply it.
    pub fn apply_sample_rate(&mut self, sample_hz: f64) -> TrackerResult<()> {
        let config = TrackerConfig {
            sample_hz,
            ..self.config()?
        };
        self.apply_config(config)
    }

    /// Swap in a new configuration between samples.
    pub fn apply_config(&mut self, config: TrackerConfig) -> TrackerResult<()> {
        let config = config.sanitized();
        let restart = {
            let mut core = self.lock_core()?;
            let rate_changed = core.fusion.config().sample_hz != config.sample_hz;
            core.gate.set_interval(config.haptic_interval_secs);
            core.fusion.apply_config(config);
            rate_changed && core.fusion.state() == RunState::Running
        };
        if restart {
            info!("sample rate changed, restarting session");
            self.stop()?;
            self.start()?;
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.shared.publisher.subscribe()
    }

    pub fn latest(&self) -> Arc<Snapshot> {
        self.shared.publisher.borrow().clone()
    }

    pub fn state(&self) -> TrackerResult<RunState> {
        Ok(self.lock_core()?.fusion.state())
    }

    pub fn is_running(&self) -> TrackerResult<bool> {
        Ok(self.state()? == RunState::Running)
    }

    pub fn status(&self) -> TrackerResult<String> {
        Ok(self.lock_core()?.status.clone())
    }

    pub fn config(&self) -> TrackerResult<TrackerConfig> {
        Ok(self.lock_core()?.fusion.config().clone())
    }

    /// Path of the current session log, if one is open.
    pub fn log_path(&self) -> TrackerResult<Option<PathBuf>> {
        Ok(self
            .lock_core()?
            .log
            .as_ref()
            .map(|log| log.path().to_path_buf()))
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Open the session log if logging is on. Failure degrades to no logging.
fn open_log(config: &TrackerConfig) -> Option<CsvLogSink> {
    if !config.logging_enabled {
        return None;
    }
    let dir = config.log_dir.clone().unwrap_or_else(std::env::temp_dir);
    match CsvLogSink::create(&dir, &log_sink::session_id_now()) {
        Ok(sink) => Some(sink),
        Err(err) => {
            warn!("session log unavailable: {}", err);
            None
        }
    }
}
