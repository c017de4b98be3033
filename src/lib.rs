//! Real-time pose tracking from a motion sensor.
//!
//! Raw `(attitude, user acceleration)` samples go through calibration, a
//! high-pass filter and a bounded Euler integrator to produce a smoothed
//! orientation and a position that stays inside a configured volume.
//! [`SensorFusion`] is the pure per-sample pipeline; [`SessionController`]
//! wires it to a [`SensorSource`] and publishes [`Snapshot`]s.

pub mod calibration;
pub mod config;
pub mod error;
pub mod feedback;
pub mod filters;
pub mod integrator;
pub mod log_sink;
pub mod math;
pub mod sensor_fusion;
pub mod sensors;
pub mod session;
pub mod smoothing;
pub mod types;

pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use sensor_fusion::{FusionEvent, FusionOutput, SensorFusion, Snapshot};
pub use sensors::{AuthorizationStatus, Clock, ManualSource, SensorSource, SimulatedSource};
pub use session::SessionController;
pub use types::{Quat, RunState, Sample, SensorEvent, Vec3};
