//! Explicit-Euler velocity/position integration with saturation.
//!
//! One `step` per sample:
//!
//! 1. `v' = v + a * dt`; a non-finite `v'` is treated as a sensor glitch and
//!    zeroed.
//! 2. `|v'|` is clamped to `max_speed`.
//! 3. Damping removes a fixed fraction of `v'`.
//! 4. `p' = p + v' * dt`, each component clamped to `[-max_range, max_range]`.
//! 5. Boundary braking: past a fraction of `max_range` the committed velocity
//!    is scaled down once more.
//!
//! Braking is a stability policy for visualization, not a physical model.
//! Its threshold and scale live in [`BoundaryBrakePolicy`].

use log::debug;
use serde::{Deserialize, Serialize};

use crate::math;
use crate::types::{RunState, Vec3};

/// Upper bound on a single integration interval, in seconds.
pub const MAX_DT: f64 = 1.0;

/// Clamp a raw timestamp difference into `[0, MAX_DT]`. Backwards jumps and
/// NaN map to zero.
pub fn clamp_dt(dt: f64) -> f64 {
    if dt.is_nan() {
        return 0.0;
    }
    dt.clamp(0.0, MAX_DT)
}

/// Soft braking near the edge of the allowed volume.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryBrakePolicy {
    /// Fraction of `max_range` (by position magnitude) where braking starts.
    pub threshold_fraction: f64,
    /// Extra velocity scale applied while past the threshold.
    pub velocity_scale: f64,
}

impl BoundaryBrakePolicy {
    /// A policy that never changes velocity.
    pub fn disabled() -> Self {
        Self {
            threshold_fraction: 1.0,
            velocity_scale: 1.0,
        }
    }

    /// Keep both knobs inside [0, 1] so braking can only slow things down.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let fraction = |value: f64, fallback: f64| {
            if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                fallback
            }
        };
        Self {
            threshold_fraction: fraction(self.threshold_fraction, defaults.threshold_fraction),
            velocity_scale: fraction(self.velocity_scale, defaults.velocity_scale),
        }
    }

    pub fn applies(&self, position: &Vec3, max_range: f64) -> bool {
        position.norm() > self.threshold_fraction * max_range
    }
}

impl Default for BoundaryBrakePolicy {
    fn default() -> Self {
        Self {
            threshold_fraction: 0.9,
            velocity_scale: 0.5,
        }
    }
}

/// Per-step limits, derived from the tracker configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegrationLimits {
    pub max_speed: f64,
    pub max_range: f64,
    /// Fraction of velocity removed per step.
    pub damping: f64,
    pub brake: BoundaryBrakePolicy,
}

impl IntegrationLimits {
    /// Velocity retention factor after damping, never negative.
    pub fn retention(&self) -> f64 {
        (1.0 - self.damping).clamp(0.0, 1.0)
    }
}

/// What happened during one integration step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepReport {
    /// An integration step actually ran (running and dt > 0).
    pub integrated: bool,
    /// Speed before the clamp, if it had to be clamped.
    pub speed_clamped: Option<f64>,
    pub range_clamped: bool,
    pub braked: bool,
    /// Velocity went non-finite and was zeroed.
    pub velocity_reset: bool,
}

impl StepReport {
    /// Speed or range limit was hit.
    pub fn saturated(&self) -> bool {
        self.speed_clamped.is_some() || self.range_clamped
    }
}

/// Owns velocity and position for one tracking session.
#[derive(Clone, Debug)]
pub struct KinematicIntegrator {
    state: RunState,
    velocity: Vec3,
    position: Vec3,
}

impl KinematicIntegrator {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            velocity: Vec3::zeros(),
            position: Vec3::zeros(),
        }
    }

    /// Idle → Running with zeroed kinematics.
    pub fn start(&mut self) {
        self.state = RunState::Running;
        self.recenter();
    }

    /// Running → Idle with zeroed kinematics.
    pub fn stop(&mut self) {
        self.state = RunState::Idle;
        self.recenter();
    }

    /// Zero velocity and position in any state.
    pub fn recenter(&mut self) {
        self.velocity = Vec3::zeros();
        self.position = Vec3::zeros();
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn velocity(&self) -> &Vec3 {
        &self.velocity
    }

    pub fn position(&self) -> &Vec3 {
        &self.position
    }

    /// Advance by `dt` seconds under world-frame acceleration `accel` (m/s²).
    /// A no-op while idle or when `dt` clamps to zero.
    pub fn step(&mut self, accel: &Vec3, dt: f64, limits: &IntegrationLimits) -> StepReport {
        let mut report = StepReport::default();
        let dt = clamp_dt(dt);
        if self.state != RunState::Running || dt <= 0.0 {
            return report;
        }
        report.integrated = true;

        let mut velocity = self.velocity + accel * dt;
        if !math::is_finite(&velocity) {
            debug!("non-finite velocity candidate, zeroing");
            velocity = Vec3::zeros();
            report.velocity_reset = true;
        }

        let speed = velocity.norm();
        if speed > limits.max_speed {
            velocity = math::clamp_magnitude(&velocity, limits.max_speed);
            report.speed_clamped = Some(speed);
        }

        velocity *= limits.retention();

        let unclamped = self.position + velocity * dt;
        let position = math::clamp_components(&unclamped, -limits.max_range, limits.max_range);
        report.range_clamped = position != unclamped;

        if limits.brake.applies(&position, limits.max_range) {
            velocity *= limits.brake.velocity_scale;
            report.braked = true;
        }

        self.velocity = velocity;
        self.position = position;
        report
    }
}

impl Default for KinematicIntegrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn limits(max_speed: f64, max_range: f64, damping: f64) -> IntegrationLimits {
        IntegrationLimits {
            max_speed,
            max_range,
            damping,
            brake: BoundaryBrakePolicy::default(),
        }
    }

    fn running() -> KinematicIntegrator {
        let mut engine = KinematicIntegrator::new();
        engine.start();
        engine
    }

    /// Small deterministic generator so the invariant checks see varied input.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> f64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        }

        fn vec(&mut self, scale: f64) -> Vec3 {
            Vec3::new(self.next() * scale, self.next() * scale, self.next() * scale)
        }
    }

    #[test]
    fn test_clamp_dt() {
        assert_eq!(clamp_dt(0.016), 0.016);
        assert_eq!(clamp_dt(-3.0), 0.0);
        assert_eq!(clamp_dt(42.0), 1.0);
        assert_eq!(clamp_dt(f64::NAN), 0.0);
        assert_eq!(clamp_dt(f64::INFINITY), 1.0);
    }

    #[test]
    fn test_idle_engine_does_not_move() {
        let mut engine = KinematicIntegrator::new();
        let report = engine.step(&Vec3::new(1.0, 0.0, 0.0), 0.1, &limits(5.0, 2.0, 0.0));
        assert!(!report.integrated);
        assert_eq!(*engine.velocity(), Vec3::zeros());
        assert_eq!(*engine.position(), Vec3::zeros());
    }

    #[test]
    fn test_zero_dt_is_bookkeeping_only() {
        let mut engine = running();
        let report = engine.step(&Vec3::new(3.0, 0.0, 0.0), 0.0, &limits(5.0, 2.0, 0.0));
        assert!(!report.integrated);
        assert_eq!(*engine.velocity(), Vec3::zeros());
    }

    #[test]
    fn test_plain_euler_step() {
        let mut engine = running();
        let l = IntegrationLimits {
            brake: BoundaryBrakePolicy::disabled(),
            ..limits(10.0, 10.0, 0.0)
        };
        engine.step(&Vec3::new(1.0, 0.0, 0.0), 0.5, &l);
        assert_abs_diff_eq!(*engine.velocity(), Vec3::new(0.5, 0.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(*engine.position(), Vec3::new(0.25, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_damping_removes_fraction() {
        let mut engine = running();
        engine.step(&Vec3::new(1.0, 0.0, 0.0), 1.0, &limits(10.0, 10.0, 0.1));
        assert_abs_diff_eq!(engine.velocity().x, 0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_excess_damping_never_reverses_velocity() {
        let mut engine = running();
        engine.step(&Vec3::new(1.0, 0.0, 0.0), 1.0, &limits(10.0, 10.0, 3.0));
        assert_eq!(*engine.velocity(), Vec3::zeros());
    }

    #[test]
    fn test_speed_saturates_and_reports() {
        let mut engine = running();
        let l = limits(1.5, 100.0, 0.0);
        let mut saw_clamp = false;
        for _ in 0..10 {
            let report = engine.step(&Vec3::new(0.0, 0.0, 5.0 * 9.81), 0.1, &l);
            saw_clamp |= report.speed_clamped.is_some();
            assert!(engine.velocity().norm() <= 1.5 + 1e-9);
        }
        assert!(saw_clamp);
        assert_abs_diff_eq!(engine.velocity().norm(), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_position_clamps_to_range() {
        let mut engine = running();
        let l = limits(5.0, 0.8, 0.0);
        let mut clamped = false;
        for _ in 0..20 {
            clamped |= engine.step(&Vec3::new(0.0, 0.0, 9.81), 0.1, &l).range_clamped;
        }
        assert!(clamped);
        assert_abs_diff_eq!(*engine.position(), Vec3::new(0.0, 0.0, 0.8), epsilon = 1e-12);
    }

    #[test]
    fn test_boundary_brake_halves_velocity() {
        let mut engine = running();
        let l = limits(10.0, 1.0, 0.0);
        // 0.95 m in one step, past 0.9 * max_range.
        let report = engine.step(&Vec3::new(0.95, 0.0, 0.0), 1.0, &l);
        assert!(report.braked);
        assert!(!report.range_clamped);
        assert_abs_diff_eq!(engine.velocity().x, 0.475, epsilon = 1e-12);
        assert_abs_diff_eq!(engine.position().x, 0.95, epsilon = 1e-12);
    }

    #[test]
    fn test_no_brake_inside_threshold() {
        let mut engine = running();
        let report = engine.step(&Vec3::new(0.5, 0.0, 0.0), 1.0, &limits(10.0, 1.0, 0.0));
        assert!(!report.braked);
        assert_abs_diff_eq!(engine.velocity().x, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_acceleration_zeroes_velocity() {
        let mut engine = running();
        let l = limits(5.0, 2.0, 0.0);
        engine.step(&Vec3::new(1.0, 0.0, 0.0), 0.1, &l);
        let position = *engine.position();

        let report = engine.step(&Vec3::new(f64::NAN, 0.0, 0.0), 0.1, &l);
        assert!(report.velocity_reset);
        assert_eq!(*engine.velocity(), Vec3::zeros());
        assert_eq!(*engine.position(), position);

        let report = engine.step(&Vec3::new(f64::INFINITY, 0.0, 0.0), 0.1, &l);
        assert!(report.velocity_reset);
        assert!(math::is_finite(engine.velocity()));
    }

    #[test]
    fn test_recenter_zeroes_in_any_state() {
        let mut engine = running();
        engine.step(&Vec3::new(2.0, 1.0, 0.0), 0.5, &limits(5.0, 2.0, 0.0));
        engine.recenter();
        assert_eq!(*engine.velocity(), Vec3::zeros());
        assert_eq!(*engine.position(), Vec3::zeros());
        assert_eq!(engine.state(), RunState::Running);

        engine.stop();
        engine.recenter();
        assert_eq!(engine.state(), RunState::Idle);
        assert_eq!(*engine.position(), Vec3::zeros());
    }

    #[test]
    fn test_limits_hold_for_arbitrary_input() {
        let mut rng = Lcg(7);
        for round in 0..50 {
            let l = IntegrationLimits {
                max_speed: 1.0 + rng.next().abs() * 19.0,
                max_range: 0.5 + rng.next().abs() * 9.5,
                damping: rng.next().abs() * 0.1,
                brake: BoundaryBrakePolicy::default(),
            };
            let mut engine = running();
            for _ in 0..200 {
                let accel = rng.vec(200.0);
                let dt = rng.next() * 2.0 + if round % 2 == 0 { 0.5 } else { 0.0 };
                engine.step(&accel, dt, &l);
                assert!(engine.velocity().norm() <= l.max_speed + 1e-9);
                for c in engine.position().iter() {
                    assert!(c.abs() <= l.max_range);
                }
            }
        }
    }

    #[test]
    fn test_brake_policy_sanitized() {
        let policy = BoundaryBrakePolicy {
            threshold_fraction: 4.0,
            velocity_scale: f64::NAN,
        }
        .sanitized();
        assert_eq!(policy.threshold_fraction, 1.0);
        assert_eq!(policy.velocity_scale, 0.5);
    }
}
