//! Sensor source capability.
//!
//! The pipeline never talks to hardware directly. A [`SensorSource`] is
//! injected into the session and delivers [`SensorEvent`]s one at a time on
//! its own worker thread. Two implementations live here: a simulated device
//! for the live binary and a manual source that tests and replay drive by
//! hand.

use std::f64::consts::PI;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, select, tick, Sender};
use log::{debug, info};

use crate::error::{TrackerError, TrackerResult};
use crate::types::{Quat, Sample, SensorEvent, Vec3};

/// Callback invoked for every delivered event.
pub type SampleCallback = Box<dyn FnMut(SensorEvent) + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Authorized,
    NotDetermined,
    Denied,
    Restricted,
}

impl AuthorizationStatus {
    /// Refusal to start, if this status forbids it.
    pub fn check(self) -> TrackerResult<()> {
        match self {
            AuthorizationStatus::Authorized | AuthorizationStatus::NotDetermined => Ok(()),
            AuthorizationStatus::Denied => Err(TrackerError::AuthorizationDenied),
            AuthorizationStatus::Restricted => Err(TrackerError::AuthorizationRestricted),
        }
    }
}

pub trait SensorSource: Send {
    fn is_available(&self) -> bool;

    fn authorization(&self) -> AuthorizationStatus;

    /// Begin delivering events at roughly `interval`. Events arrive strictly
    /// one at a time.
    fn start(&mut self, interval: Duration, callback: SampleCallback) -> TrackerResult<()>;

    /// Stop delivery. Returns once no callback is running or will run again.
    /// Must not be called from inside the callback.
    fn stop(&mut self);
}

// ─── Clocks ──────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    /// Seconds on the same time base as sample timestamps.
    fn now_secs(&self) -> f64;
}

/// Process-relative monotonic seconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

impl Clock for MonotonicClock {
    fn now_secs(&self) -> f64 {
        process_epoch().elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to.
#[derive(Clone, Debug, Default)]
pub struct FixedClock {
    now: Arc<Mutex<f64>>,
}

impl FixedClock {
    pub fn new(now: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: f64) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now_secs(&self) -> f64 {
        self.now.lock().map(|guard| *guard).unwrap_or(0.0)
    }
}

// ─── Simulated device ────────────────────────────────────────────────────────

/// Deterministic motion: a slow yaw with a small pitch wobble and sinusoidal
/// user acceleration, sampled at time `t` seconds.
pub fn simulated_motion(t: f64) -> (Quat, Vec3) {
    let yaw = (t * 0.25).sin() * PI / 4.0;
    let pitch = (t * 0.5).sin() * 0.1;
    let attitude = Quat::from_euler_angles(0.0, pitch, yaw);
    let accel = Vec3::new(
        (t * 2.0 * PI * 0.5).sin() * 0.15,
        (t * 2.0 * PI * 0.25).cos() * 0.10,
        (t * PI).sin() * 0.05,
    );
    (attitude, accel)
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Ticks on a worker thread and synthesizes samples.
pub struct SimulatedSource {
    available: bool,
    authorization: AuthorizationStatus,
    /// Deliver an error instead of the sample after this many samples.
    fail_after: Option<u64>,
    worker: Option<Worker>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            available: true,
            authorization: AuthorizationStatus::Authorized,
            fail_after: None,
            worker: None,
        }
    }

    pub fn unavailable() -> Self {
        let mut source = Self::new();
        source.available = false;
        source
    }

    pub fn with_authorization(mut self, status: AuthorizationStatus) -> Self {
        self.authorization = status;
        self
    }

    pub fn failing_after(mut self, samples: u64) -> Self {
        self.fail_after = Some(samples);
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedSource {
    fn is_available(&self) -> bool {
        self.available
    }

    fn authorization(&self) -> AuthorizationStatus {
        self.authorization
    }

    fn start(&mut self, interval: Duration, mut callback: SampleCallback) -> TrackerResult<()> {
        if !self.available {
            return Err(TrackerError::SensorUnavailable);
        }
        self.authorization.check()?;
        self.stop();

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let fail_after = self.fail_after;
        let clock = MonotonicClock;
        let origin = clock.now_secs();

        let handle = thread::Builder::new()
            .name("simulated-sensor".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                let mut sample_count = 0u64;
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let now = clock.now_secs();
                            if fail_after.map_or(false, |n| sample_count >= n) {
                                callback(Err("simulated device fault".to_string()));
                                break;
                            }
                            let (attitude, accel) = simulated_motion(now - origin);
                            callback(Ok(Sample::new(now, attitude, accel)));
                            sample_count += 1;
                            if sample_count % 600 == 0 {
                                debug!("[sensor] {} samples", sample_count);
                            }
                        }
                    }
                }
                debug!("[sensor] worker exiting after {} samples", sample_count);
            })
            .map_err(|e| TrackerError::Internal(format!("sensor thread: {}", e)))?;

        info!("simulated sensor started at {:.1} Hz", 1.0 / interval.as_secs_f64());
        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.try_send(());
            if worker.handle.join().is_err() {
                debug!("[sensor] worker panicked");
            }
            info!("simulated sensor stopped");
        }
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Manual source ───────────────────────────────────────────────────────────

#[derive(Default)]
struct ManualInner {
    available: bool,
    authorization: Option<AuthorizationStatus>,
    callback: Option<SampleCallback>,
    requested_interval: Option<Duration>,
    starts: u32,
}

/// Delivers pushed events synchronously on the caller's thread.
///
/// Clones share one source, so a test can keep a handle after moving another
/// into the session.
#[derive(Clone)]
pub struct ManualSource {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualInner {
                available: true,
                authorization: Some(AuthorizationStatus::Authorized),
                ..ManualInner::default()
            })),
        }
    }

    pub fn set_available(&self, available: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.available = available;
        }
    }

    pub fn set_authorization(&self, status: AuthorizationStatus) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.authorization = Some(status);
        }
    }

    /// Deliver one event. Returns false when the source is not started.
    ///
    /// The callback is taken out of the shared slot while it runs so it may
    /// touch the session without deadlocking on this source.
    pub fn push(&self, event: SensorEvent) -> bool {
        let callback = match self.inner.lock() {
            Ok(mut inner) => inner.callback.take(),
            Err(_) => None,
        };
        let Some(mut callback) = callback else {
            return false;
        };
        callback(event);
        if let Ok(mut inner) = self.inner.lock() {
            // A stop or restart during the callback wins.
            if inner.callback.is_none() && inner.requested_interval.is_some() {
                inner.callback = Some(callback);
            }
        }
        true
    }

    pub fn push_sample(&self, sample: Sample) -> bool {
        self.push(Ok(sample))
    }

    pub fn is_started(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.requested_interval.is_some())
            .unwrap_or(false)
    }

    pub fn requested_interval(&self) -> Option<Duration> {
        self.inner.lock().ok().and_then(|inner| inner.requested_interval)
    }

    /// How many times `start` succeeded.
    pub fn start_count(&self) -> u32 {
        self.inner.lock().map(|inner| inner.starts).unwrap_or(0)
    }
}

impl Default for ManualSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for ManualSource {
    fn is_available(&self) -> bool {
        self.inner.lock().map(|inner| inner.available).unwrap_or(false)
    }

    fn authorization(&self) -> AuthorizationStatus {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.authorization)
            .unwrap_or(AuthorizationStatus::NotDetermined)
    }

    fn start(&mut self, interval: Duration, callback: SampleCallback) -> TrackerResult<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| TrackerError::Internal("manual source lock poisoned".to_string()))?;
        if !inner.available {
            return Err(TrackerError::SensorUnavailable);
        }
        inner
            .authorization
            .unwrap_or(AuthorizationStatus::NotDetermined)
            .check()?;
        inner.callback = Some(callback);
        inner.requested_interval = Some(interval);
        inner.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.callback = None;
            inner.requested_interval = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_authorization_check() {
        assert!(AuthorizationStatus::Authorized.check().is_ok());
        assert!(AuthorizationStatus::NotDetermined.check().is_ok());
        assert_eq!(
            AuthorizationStatus::Denied.check(),
            Err(TrackerError::AuthorizationDenied)
        );
        assert_eq!(
            AuthorizationStatus::Restricted.check(),
            Err(TrackerError::AuthorizationRestricted)
        );
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(3.0);
        assert_eq!(clock.now_secs(), 3.0);
        let shared = clock.clone();
        shared.set(4.5);
        assert_eq!(clock.now_secs(), 4.5);
    }

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock;
        let a = clock.now_secs();
        let b = clock.now_secs();
        assert!(b >= a);
    }

    #[test]
    fn test_simulated_motion_is_finite_and_unit() {
        for i in 0..1000 {
            let (q, a) = simulated_motion(i as f64 * 0.0167);
            assert!((q.quaternion().norm() - 1.0).abs() < 1e-9);
            assert!(a.iter().all(|c| c.is_finite()));
        }
    }

    #[test]
    fn test_simulated_source_delivers_and_stops() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let mut source = SimulatedSource::new();
        source
            .start(
                Duration::from_millis(2),
                Box::new(move |event| {
                    assert!(event.is_ok());
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        source.stop();
        assert!(!source.is_running());

        let after_stop = delivered.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(delivered.load(Ordering::SeqCst), after_stop);
    }

    fn noop() -> SampleCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_simulated_source_refuses_when_unavailable_or_denied() {
        assert_eq!(
            SimulatedSource::unavailable().start(Duration::from_millis(10), noop()),
            Err(TrackerError::SensorUnavailable)
        );
        assert_eq!(
            SimulatedSource::new()
                .with_authorization(AuthorizationStatus::Denied)
                .start(Duration::from_millis(10), noop()),
            Err(TrackerError::AuthorizationDenied)
        );
    }

    #[test]
    fn test_simulated_source_reports_fault() {
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let mut source = SimulatedSource::new().failing_after(3);
        source
            .start(
                Duration::from_millis(1),
                Box::new(move |event| {
                    if event.is_err() {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        source.stop();
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_source_push_requires_start() {
        let source = ManualSource::new();
        assert!(!source.push_sample(Sample::new(0.0, Quat::identity(), Vec3::zeros())));
    }

    #[test]
    fn test_manual_source_delivers_synchronously() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let handle = ManualSource::new();
        let mut source = handle.clone();
        source
            .start(
                Duration::from_millis(16),
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert!(handle.is_started());
        assert_eq!(handle.requested_interval(), Some(Duration::from_millis(16)));

        for i in 0..5 {
            assert!(handle.push_sample(Sample::new(i as f64, Quat::identity(), Vec3::zeros())));
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 5);

        source.stop();
        assert!(!handle.push(Err("late".to_string())));
        assert_eq!(delivered.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_manual_source_denied() {
        let handle = ManualSource::new();
        handle.set_authorization(AuthorizationStatus::Restricted);
        let mut source = handle.clone();
        assert_eq!(
            source.start(Duration::from_millis(16), Box::new(|_| {})),
            Err(TrackerError::AuthorizationRestricted)
        );
        assert_eq!(handle.start_count(), 0);
    }
}
