//! Linear algebra aliases for the pose tracker
//!
//! Everything runs in f64; the sensor source may deliver f32 but samples are
//! widened on the way in.

use nalgebra::{UnitQuaternion, Vector3};

/// 3-vector in meters, m/s or m/s² depending on context.
pub type Vec3 = Vector3<f64>;

/// Unit-norm orientation quaternion.
pub type Quat = UnitQuaternion<f64>;

/// Standard gravity, used to convert g-units to m/s².
pub const GRAVITY: f64 = 9.81;

/// Tolerance for the unit-norm invariant on orientations.
pub const UNIT_NORM_TOLERANCE: f64 = 1e-5;
