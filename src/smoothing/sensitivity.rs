//! Forward simulation with first order sensitivity propagation
//!
//! For a stacked input vector `u = [u_0, ..., u_{N-1}]` (each block is
//! (jerk, curvature rate)) the integrator produces the stacked states
//! `X = [x_0, ..., x_{N-1}]` with `x_{i} = f(x_{i-1}, u_{i-1})` and the
//! Jacobian `dX/du` of size `6N x 2N`:
//!
//! ```text
//! dx_i/du_{i-1} = dfdu(x_{i-1}, u_{i-1})
//! dx_i/du_k     = dfdx(x_{i-1}, u_{i-1}) * dx_{i-1}/du_k    for k < i - 1
//! ```
//!
//! Blocks for k >= i stay zero. The last input block does not influence
//! the states.

use nalgebra::{DMatrix, DVector};

use super::motion_model::{
    InputVector, KinematicStepModel, StateVector, INPUT_SIZE, STATE_SIZE,
};

/// States and sensitivities of one integration
#[derive(Debug, Clone)]
pub struct Integration {
    /// Stacked states, `STATE_SIZE` entries per point
    pub states: DVector<f64>,
    /// Stacked Jacobian of the states w.r.t. the inputs
    pub sensitivity: DMatrix<f64>,
}

impl Integration {
    pub fn num_points(&self) -> usize {
        self.states.len() / STATE_SIZE
    }

    pub fn state(&self, i: usize) -> StateVector {
        self.states.fixed_rows::<STATE_SIZE>(i * STATE_SIZE).into_owned()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SensitivityIntegrator {
    model: KinematicStepModel,
}

fn input_block(u: &[f64], i: usize) -> InputVector {
    InputVector::new(u[i * INPUT_SIZE], u[i * INPUT_SIZE + 1])
}

impl SensitivityIntegrator {
    pub fn new(model: KinematicStepModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &KinematicStepModel {
        &self.model
    }

    /// Simulate the states only
    pub fn simulate(&self, x0: &StateVector, u: &[f64], h: f64) -> DVector<f64> {
        let n = u.len() / INPUT_SIZE;
        let mut states = DVector::zeros(STATE_SIZE * n);
        if n == 0 {
            return states;
        }
        states.fixed_rows_mut::<STATE_SIZE>(0).copy_from(x0);
        let mut x = *x0;
        for i in 1..n {
            x = self.model.step(&x, &input_block(u, i - 1), h);
            states.fixed_rows_mut::<STATE_SIZE>(i * STATE_SIZE).copy_from(&x);
        }
        states
    }

    /// Simulate the states and propagate `dX/du`
    pub fn integrate(&self, x0: &StateVector, u: &[f64], h: f64) -> Integration {
        let n = u.len() / INPUT_SIZE;
        let mut states = DVector::zeros(STATE_SIZE * n);
        let mut sensitivity = DMatrix::zeros(STATE_SIZE * n, INPUT_SIZE * n);
        if n == 0 {
            return Integration { states, sensitivity };
        }
        states.fixed_rows_mut::<STATE_SIZE>(0).copy_from(x0);

        let mut x_before = *x0;
        for i in 1..n {
            let row = i * STATE_SIZE;
            let row_before = (i - 1) * STATE_SIZE;
            let u_before = input_block(u, i - 1);

            let dfdx = self.model.dfdx(&x_before, &u_before, h);
            let dfdu = self.model.dfdu(&x_before, &u_before, h);
            let x = self.model.step(&x_before, &u_before, h);

            states.fixed_rows_mut::<STATE_SIZE>(row).copy_from(&x);
            sensitivity
                .fixed_view_mut::<STATE_SIZE, INPUT_SIZE>(row, (i - 1) * INPUT_SIZE)
                .copy_from(&dfdu);

            for k in 0..i - 1 {
                let col = k * INPUT_SIZE;
                let chained = dfdx
                    * sensitivity.fixed_view::<STATE_SIZE, INPUT_SIZE>(row_before, col);
                sensitivity
                    .fixed_view_mut::<STATE_SIZE, INPUT_SIZE>(row, col)
                    .copy_from(&chained);
            }
            x_before = x;
        }

        Integration { states, sensitivity }
    }
}
