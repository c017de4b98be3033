//! Saturation feedback.
//!
//! When the integrator clamps speed or position the host may buzz the device.
//! The pulse itself is an external actuator; this module only decides when
//! to fire it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::info;

/// Fire-and-forget feedback actuator.
pub trait FeedbackSink: Send + Sync {
    fn pulse(&self);
}

/// Reports pulses through the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn pulse(&self) {
        info!("[haptic] saturation pulse");
    }
}

/// Counts pulses; handy for tests and status output.
#[derive(Clone, Debug, Default)]
pub struct CountingFeedback {
    count: Arc<AtomicU64>,
}

impl CountingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl FeedbackSink for CountingFeedback {
    fn pulse(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

/// At most one pulse per `interval_secs` of sample time.
#[derive(Clone, Debug)]
pub struct FeedbackGate {
    last_pulse: f64,
    interval_secs: f64,
}

impl FeedbackGate {
    pub fn new(interval_secs: f64) -> Self {
        Self {
            last_pulse: f64::NEG_INFINITY,
            interval_secs: interval_secs.max(0.0),
        }
    }

    /// Whether a pulse may fire at `now`; if so, the cooldown restarts.
    pub fn ready_and_touch(&mut self, now: f64) -> bool {
        if now - self.last_pulse >= self.interval_secs {
            self.last_pulse = now;
            true
        } else {
            false
        }
    }

    /// Forget the last pulse so the next saturation fires immediately.
    pub fn reset(&mut self) {
        self.last_pulse = f64::NEG_INFINITY;
    }

    pub fn set_interval(&mut self, interval_secs: f64) {
        self.interval_secs = interval_secs.max(0.0);
    }
}
