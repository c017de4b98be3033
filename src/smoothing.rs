use crate::math;
use crate::types::Quat;

/// Largest smoothing factor accepted; above this the display would barely move.
pub const MAX_SMOOTHING: f64 = 0.98;

/// Exponential slerp smoothing of the displayed orientation.
///
/// `displayed = slerp(displayed, target, 1 - alpha)`. Purely cosmetic: the
/// integrator never sees the smoothed orientation.
#[derive(Clone, Debug)]
pub struct OrientationSmoother {
    alpha: f64,
    displayed: Option<Quat>,
}

impl OrientationSmoother {
    pub fn new(smoothing: f64) -> Self {
        Self {
            alpha: clamp_smoothing(smoothing),
            displayed: None,
        }
    }

    /// Blend toward `target` and return the new displayed orientation.
    /// The first call after a reset snaps straight to `target`.
    pub fn update(&mut self, target: &Quat) -> Quat {
        let next = match &self.displayed {
            Some(previous) => math::slerp(previous, target, 1.0 - self.alpha),
            None => math::normalize_or_identity(*target.quaternion()),
        };
        self.displayed = Some(next);
        next
    }

    pub fn set_smoothing(&mut self, smoothing: f64) {
        self.alpha = clamp_smoothing(smoothing);
    }

    pub fn smoothing(&self) -> f64 {
        self.alpha
    }

    /// Current displayed orientation, identity before the first sample.
    pub fn displayed(&self) -> Quat {
        self.displayed.unwrap_or_else(Quat::identity)
    }

    pub fn reset(&mut self) {
        self.displayed = None;
    }
}

fn clamp_smoothing(smoothing: f64) -> f64 {
    if smoothing.is_finite() {
        smoothing.clamp(0.0, MAX_SMOOTHING)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;
    use approx::assert_abs_diff_eq;

    fn yaw(angle: f64) -> Quat {
        Quat::from_axis_angle(&Vec3::z_axis(), angle)
    }

    #[test]
    fn test_zero_smoothing_tracks_exactly() {
        let mut smoother = OrientationSmoother::new(0.0);
        for i in 0..20 {
            let target = yaw(i as f64 * 0.17);
            let shown = smoother.update(&target);
            assert_abs_diff_eq!(shown.angle_to(&target), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_first_update_snaps() {
        let mut smoother = OrientationSmoother::new(0.9);
        let shown = smoother.update(&yaw(1.0));
        assert_abs_diff_eq!(shown.angle_to(&yaw(1.0)), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_heavy_smoothing_lags() {
        let mut smoother = OrientationSmoother::new(0.9);
        smoother.update(&yaw(0.0));
        let shown = smoother.update(&yaw(1.0));
        // One step covers 10% of the arc.
        assert_abs_diff_eq!(shown.angle(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_converges_to_constant_target() {
        let mut smoother = OrientationSmoother::new(0.5);
        smoother.update(&yaw(0.0));
        let target = yaw(0.8);
        let mut shown = Quat::identity();
        for _ in 0..60 {
            shown = smoother.update(&target);
        }
        assert_abs_diff_eq!(shown.angle_to(&target), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_smoothing_is_clamped() {
        assert_eq!(OrientationSmoother::new(1.5).smoothing(), MAX_SMOOTHING);
        assert_eq!(OrientationSmoother::new(-1.0).smoothing(), 0.0);
        assert_eq!(OrientationSmoother::new(f64::NAN).smoothing(), 0.0);
    }

    #[test]
    fn test_reset_returns_to_identity() {
        let mut smoother = OrientationSmoother::new(0.3);
        smoother.update(&yaw(0.4));
        smoother.reset();
        assert_eq!(smoother.displayed(), Quat::identity());
    }
}
