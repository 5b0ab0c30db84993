//! Bound policies for the physical quantities of the smoother
//!
//! A `BoundPolicy` clamps a value into `[lower, upper]` and checks values
//! against the bounds widened by a tolerance. The quantity is part of the
//! type so that a jerk bound cannot be applied to a curvature.

use std::fmt;
use std::marker::PhantomData;

/// Marker for a bounded physical quantity
pub trait Quantity {
    const NAME: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jerk;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvatureRate;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acceleration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curvature;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity;

impl Quantity for Jerk {
    const NAME: &'static str = "jerk";
}

impl Quantity for CurvatureRate {
    const NAME: &'static str = "curvature rate";
}

impl Quantity for Acceleration {
    const NAME: &'static str = "acceleration";
}

impl Quantity for Curvature {
    const NAME: &'static str = "curvature";
}

impl Quantity for Velocity {
    const NAME: &'static str = "velocity";
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundPolicy<Q> {
    pub lower: f64,
    pub upper: f64,
    pub tolerance: f64,
    _quantity: PhantomData<Q>,
}

impl<Q: Quantity> BoundPolicy<Q> {
    pub fn new(lower: f64, upper: f64, tolerance: f64) -> Self {
        Self { lower, upper, tolerance, _quantity: PhantomData }
    }

    /// Clamp `value` into `[lower, upper]`
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.lower).min(self.upper)
    }

    /// Whether `value` lies within the bounds widened by the tolerance
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower - self.tolerance && value <= self.upper + self.tolerance
    }

    pub fn name(&self) -> &'static str {
        Q::NAME
    }
}

impl<Q: Quantity> fmt::Display for BoundPolicy<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in [{}, {}] +/- {}", Q::NAME, self.lower, self.upper, self.tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn check_policy<Q: Quantity>(policy: BoundPolicy<Q>, rng: &mut StdRng) {
        for _ in 0..200 {
            let v: f64 = rng.gen_range(-100.0..100.0);
            let clamped = policy.clamp(v);
            assert!(clamped >= policy.lower && clamped <= policy.upper);
            assert!(policy.contains(clamped));
        }
        assert!(!policy.contains(policy.lower - policy.tolerance - 1e-6));
        assert!(!policy.contains(policy.upper + policy.tolerance + 1e-6));
        assert!(policy.contains(policy.lower - 0.5 * policy.tolerance));
    }

    #[test]
    fn test_all_families() {
        let mut rng = StdRng::seed_from_u64(7);
        check_policy(BoundPolicy::<Jerk>::new(-5.0, 5.0, 1e-2), &mut rng);
        check_policy(BoundPolicy::<CurvatureRate>::new(-5.0, 5.0, 1e-2), &mut rng);
        check_policy(BoundPolicy::<Acceleration>::new(-8.0, 4.0, 1e-2), &mut rng);
        check_policy(BoundPolicy::<Curvature>::new(-0.2, 0.2, 1e-2), &mut rng);
        check_policy(BoundPolicy::<Velocity>::new(0.0, 15.0, 1e-2), &mut rng);
    }

    #[test]
    fn test_clamp_inside_is_identity() {
        let policy = BoundPolicy::<Velocity>::new(0.0, 15.0, 1e-2);
        assert_eq!(policy.clamp(3.5), 3.5);
        assert_eq!(policy.clamp(-1.0), 0.0);
        assert_eq!(policy.clamp(20.0), 15.0);
        assert_eq!(format!("{}", policy), "velocity in [0, 15] +/- 0.01");
    }
}
