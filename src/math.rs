//! Orientation algebra for the tracking pipeline.
//!
//! All functions are pure and total: degenerate input (zero-length or
//! non-finite quaternions, NaN vectors) yields identity or zero instead of
//! an error, so the per-sample path never has to branch on failure.

use nalgebra::{Quaternion, UnitQuaternion, Vector4};

use crate::types::{Quat, Vec3};

/// Quaternions shorter than this are treated as degenerate.
const DEGENERATE_NORM: f64 = 1e-9;

/// Above this |dot| slerp falls back to normalized lerp.
const NLERP_THRESHOLD: f64 = 0.9995;

/// Normalize a raw quaternion, falling back to identity when it has no
/// usable direction.
pub fn normalize_or_identity(q: Quaternion<f64>) -> Quat {
    let norm = q.norm();
    if !norm.is_finite() || norm < DEGENERATE_NORM {
        return Quat::identity();
    }
    UnitQuaternion::new_unchecked(Quaternion::from(q.coords / norm))
}

/// Build an orientation from `(x, y, z, w)` components.
pub fn quat_from_xyzw(x: f64, y: f64, z: f64, w: f64) -> Quat {
    normalize_or_identity(Quaternion::new(w, x, y, z))
}

/// `(x, y, z, w)` components of an orientation.
pub fn quat_to_xyzw(q: &Quat) -> [f64; 4] {
    let c = &q.quaternion().coords;
    [c.x, c.y, c.z, c.w]
}

/// Hamilton product `a * b`, renormalized.
pub fn multiply(a: &Quat, b: &Quat) -> Quat {
    normalize_or_identity(a.quaternion() * b.quaternion())
}

/// Inverse rotation.
pub fn invert(q: &Quat) -> Quat {
    normalize_or_identity(q.quaternion().conjugate())
}

/// Rotate `v` by `q`. Non-finite results collapse to zero.
pub fn rotate(q: &Quat, v: &Vec3) -> Vec3 {
    let rotated = q * v;
    if is_finite(&rotated) {
        rotated
    } else {
        Vec3::zeros()
    }
}

/// Spherical linear interpolation from `a` (t = 0) to `b` (t = 1) along the
/// shortest arc. `t` is clamped to [0, 1]; the result is always unit-norm.
pub fn slerp(a: &Quat, b: &Quat, t: f64) -> Quat {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    if t <= 0.0 {
        return normalize_or_identity(*a.quaternion());
    }
    if t >= 1.0 {
        return normalize_or_identity(*b.quaternion());
    }

    let from: Vector4<f64> = a.quaternion().coords;
    let mut to: Vector4<f64> = b.quaternion().coords;
    let mut dot = from.dot(&to);
    if !dot.is_finite() {
        return normalize_or_identity(*b.quaternion());
    }

    // q and -q are the same rotation; flip to take the short way round.
    if dot < 0.0 {
        to = -to;
        dot = -dot;
    }

    let blended = if dot > NLERP_THRESHOLD {
        from + (to - from) * t
    } else {
        let theta_0 = dot.min(1.0).acos();
        let theta = theta_0 * t;
        let sin_theta_0 = theta_0.sin();
        let s0 = (theta_0 - theta).sin() / sin_theta_0;
        let s1 = theta.sin() / sin_theta_0;
        from * s0 + to * s1
    };

    normalize_or_identity(Quaternion::from(blended))
}

/// Scale `v` down to length `max` if it is longer; no-op otherwise.
pub fn clamp_magnitude(v: &Vec3, max: f64) -> Vec3 {
    let max = if max.is_finite() { max.max(0.0) } else { 0.0 };
    let norm = v.norm();
    if !norm.is_finite() {
        return Vec3::zeros();
    }
    if norm <= max {
        return *v;
    }
    v * (max / norm)
}

/// Clamp each component into `[min, max]`. NaN components become the value
/// closest to zero inside the range.
pub fn clamp_components(v: &Vec3, min: f64, max: f64) -> Vec3 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    v.map(|c| {
        let c = if c.is_nan() { 0.0 } else { c };
        c.max(lo).min(hi)
    })
}

pub fn is_finite(v: &Vec3) -> bool {
    v.iter().all(|c| c.is_finite())
}
