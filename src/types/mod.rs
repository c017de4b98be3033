pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

use crate::math;

/// One raw reading from the motion sensor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic timestamp in seconds.
    pub timestamp: f64,
    /// Device attitude as delivered by the source.
    pub attitude: Quat,
    /// Gravity-compensated user acceleration in the device frame, in g.
    pub user_accel: Vec3,
}

impl Sample {
    pub fn new(timestamp: f64, attitude: Quat, user_accel: Vec3) -> Self {
        Self {
            timestamp,
            attitude,
            user_accel,
        }
    }

    /// Build a sample from the raw `(x, y, z, w)` tuple the source hands over.
    /// A degenerate quaternion becomes identity.
    pub fn from_raw(timestamp: f64, attitude_xyzw: [f64; 4], accel_xyz: [f64; 3]) -> Self {
        let [x, y, z, w] = attitude_xyzw;
        Self {
            timestamp,
            attitude: math::quat_from_xyzw(x, y, z, w),
            user_accel: Vec3::new(accel_xyz[0], accel_xyz[1], accel_xyz[2]),
        }
    }
}

/// Lifecycle state shared by the integrator, the session and every snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
}

/// What the sensor source delivers per callback: a sample, or a delivery error
/// described as text.
pub type SensorEvent = Result<Sample, String>;
