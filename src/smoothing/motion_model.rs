//! Kinematic step model of the smoother
//!
//! Continuous dynamics on the state (x, y, theta, v, a, kappa) driven by
//! jerk and curvature rate:
//!
//! ```text
//! dx/dt = v cos(theta)    dtheta/dt = v kappa    da/dt     = j
//! dy/dt = v sin(theta)    dv/dt     = a          dkappa/dt = xi
//! ```
//!
//! discretized with one Heun (trapezoidal) step. Both Jacobians are given
//! in closed form.

use nalgebra::{Matrix6, Matrix6x2, Vector2, Vector6};

pub const STATE_SIZE: usize = 6;
pub const INPUT_SIZE: usize = 2;

// state indices
pub const X: usize = 0;
pub const Y: usize = 1;
pub const THETA: usize = 2;
pub const V: usize = 3;
pub const A: usize = 4;
pub const KAPPA: usize = 5;

// input indices
pub const J: usize = 0;
pub const XI: usize = 1;

pub type StateVector = Vector6<f64>;
pub type InputVector = Vector2<f64>;
pub type StateJacobian = Matrix6<f64>;
pub type InputJacobian = Matrix6x2<f64>;

/// Intermediate terms shared by the step and its Jacobians
struct Predictor {
    c1: f64,
    c2: f64,
    c3: f64,
    c4: f64,
}

impl Predictor {
    fn new(x: &StateVector, u: &InputVector, h: f64) -> Self {
        Self {
            c1: x[V] + h * x[A],
            c2: x[THETA] + h * x[V] * x[KAPPA],
            c3: x[KAPPA] + h * u[XI],
            c4: x[A] + h * u[J],
        }
    }
}

/// Heun discretization of the jerk / curvature rate vehicle model
#[derive(Debug, Clone, Copy, Default)]
pub struct KinematicStepModel;

impl KinematicStepModel {
    pub fn new() -> Self {
        KinematicStepModel
    }

    /// Advance `x` by one step of size `h` with input `u`
    pub fn step(&self, x: &StateVector, u: &InputVector, h: f64) -> StateVector {
        let p = Predictor::new(x, u, h);
        let hh = 0.5 * h;
        StateVector::new(
            x[X] + hh * x[V] * x[THETA].cos() + hh * p.c1 * p.c2.cos(),
            x[Y] + hh * x[V] * x[THETA].sin() + hh * p.c1 * p.c2.sin(),
            x[THETA] + hh * x[V] * x[KAPPA] + hh * p.c1 * p.c3,
            x[V] + hh * x[A] + hh * p.c4,
            p.c4,
            p.c3,
        )
    }

    /// Jacobian of `step` with respect to the state
    pub fn dfdx(&self, x: &StateVector, u: &InputVector, h: f64) -> StateJacobian {
        let p = Predictor::new(x, u, h);
        let hh = 0.5 * h;
        let (sin_th, cos_th) = x[THETA].sin_cos();
        let (sin_c2, cos_c2) = p.c2.sin_cos();

        let mut jac = StateJacobian::identity();

        jac[(X, THETA)] = -hh * x[V] * sin_th - hh * p.c1 * sin_c2;
        jac[(X, V)] = hh * cos_th + hh * cos_c2 - hh * p.c1 * sin_c2 * h * x[KAPPA];
        jac[(X, A)] = hh * h * cos_c2;
        jac[(X, KAPPA)] = -hh * p.c1 * sin_c2 * h * x[V];

        jac[(Y, THETA)] = hh * x[V] * cos_th + hh * p.c1 * cos_c2;
        jac[(Y, V)] = hh * sin_th + hh * sin_c2 + hh * p.c1 * cos_c2 * h * x[KAPPA];
        jac[(Y, A)] = hh * h * sin_c2;
        jac[(Y, KAPPA)] = hh * p.c1 * cos_c2 * h * x[V];

        jac[(THETA, V)] = hh * x[KAPPA] + hh * p.c3;
        jac[(THETA, A)] = hh * h * p.c3;
        jac[(THETA, KAPPA)] = hh * x[V] + hh * p.c1;

        jac[(V, A)] = h;

        jac
    }

    /// Jacobian of `step` with respect to the input
    pub fn dfdu(&self, x: &StateVector, _u: &InputVector, h: f64) -> InputJacobian {
        let c1 = x[V] + h * x[A];
        let mut jac = InputJacobian::zeros();
        jac[(THETA, XI)] = 0.5 * h * h * c1;
        jac[(V, J)] = 0.5 * h * h;
        jac[(A, J)] = h;
        jac[(KAPPA, XI)] = h;
        jac
    }
}
