//! Nonlinear trajectory smoother
//!
//! The planned trajectory is resampled on a fine grid: between two input
//! points `subsampling` intermediate steps are inserted. The decision
//! vector holds (jerk, curvature rate) for every fine point. The states
//! are obtained by forward simulation with `KinematicStepModel` and the
//! cost gradient is assembled from the propagated sensitivities.

use log::{debug, error, info, warn};
use nalgebra::DVector;
use serde::Deserialize;

use crate::common::error::SmoothingError;
use crate::common::traits::{NonlinearOptimizer, NonlinearProblem};
use crate::common::types::{DiscretizedTrajectory, MapOffset, Point2D, TrajectoryPoint};
use crate::smoothing::bounds::{
    Acceleration, BoundPolicy, Curvature, CurvatureRate, Jerk, Velocity,
};
use crate::smoothing::motion_model::{
    StateVector, A, INPUT_SIZE, J, KAPPA, STATE_SIZE, THETA, V, X, XI, Y,
};
use crate::smoothing::optimizer::{OptimizerError, OptimizerStatus, SolverParameters};
use crate::smoothing::sensitivity::{Integration, SensitivityIntegrator};

/// Constraints per fine point: upper and lower bound of a, kappa and v
const CONSTRAINTS_PER_POINT: usize = 6;

/// Cost weights and bounds of the smoothing problem
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProblemParameters {
    // deviation from the input trajectory
    pub cost_offset_x: f64,
    pub cost_offset_y: f64,
    pub cost_offset_theta: f64,
    pub cost_offset_v: f64,
    // absolute values
    pub cost_curvature: f64,
    pub cost_acceleration: f64,
    // inputs
    pub cost_curvature_change: f64,
    pub cost_acceleration_change: f64,

    pub lower_bound_acceleration: f64,
    pub upper_bound_acceleration: f64,
    pub tol_acceleration: f64,
    pub lower_bound_curvature: f64,
    pub upper_bound_curvature: f64,
    pub tol_curvature: f64,
    pub lower_bound_velocity: f64,
    pub upper_bound_velocity: f64,
    pub tol_velocity: f64,
    pub lower_bound_jerk: f64,
    pub upper_bound_jerk: f64,
    pub tol_jerk: f64,
    pub lower_bound_curvature_change: f64,
    pub upper_bound_curvature_change: f64,
    pub tol_curvature_change: f64,
}

impl Default for ProblemParameters {
    fn default() -> Self {
        Self {
            cost_offset_x: 1e1,
            cost_offset_y: 1e1,
            cost_offset_theta: 0.0,
            cost_offset_v: 1e1,
            cost_curvature: 1e2,
            cost_acceleration: 0.0,
            cost_curvature_change: 2e1,
            cost_acceleration_change: 2e0,
            lower_bound_acceleration: -8.0,
            upper_bound_acceleration: 4.0,
            tol_acceleration: 1e-2,
            lower_bound_curvature: -0.2,
            upper_bound_curvature: 0.2,
            tol_curvature: 1e-2,
            lower_bound_velocity: 0.0,
            upper_bound_velocity: 15.0,
            tol_velocity: 1e-2,
            lower_bound_jerk: -5.0,
            upper_bound_jerk: 5.0,
            tol_jerk: 1e-2,
            lower_bound_curvature_change: -5.0,
            upper_bound_curvature_change: 5.0,
            tol_curvature_change: 1e-2,
        }
    }
}

impl ProblemParameters {
    pub fn jerk_bounds(&self) -> BoundPolicy<Jerk> {
        BoundPolicy::new(self.lower_bound_jerk, self.upper_bound_jerk, self.tol_jerk)
    }

    pub fn curvature_change_bounds(&self) -> BoundPolicy<CurvatureRate> {
        BoundPolicy::new(
            self.lower_bound_curvature_change,
            self.upper_bound_curvature_change,
            self.tol_curvature_change,
        )
    }

    pub fn acceleration_bounds(&self) -> BoundPolicy<Acceleration> {
        BoundPolicy::new(
            self.lower_bound_acceleration,
            self.upper_bound_acceleration,
            self.tol_acceleration,
        )
    }

    pub fn curvature_bounds(&self) -> BoundPolicy<Curvature> {
        BoundPolicy::new(self.lower_bound_curvature, self.upper_bound_curvature, self.tol_curvature)
    }

    pub fn velocity_bounds(&self) -> BoundPolicy<Velocity> {
        BoundPolicy::new(self.lower_bound_velocity, self.upper_bound_velocity, self.tol_velocity)
    }

    /// Whether every fine state after the initial one respects a, kappa and v bounds
    pub fn states_within_bounds(&self, states: &DVector<f64>) -> bool {
        let (acc, kappa, vel) = (self.acceleration_bounds(), self.curvature_bounds(), self.velocity_bounds());
        states
            .as_slice()
            .chunks(STATE_SIZE)
            .skip(1)
            .all(|x| acc.contains(x[A]) && kappa.contains(x[KAPPA]) && vel.contains(x[V]))
    }

    /// Whether every (jerk, curvature rate) block respects its bounds
    pub fn inputs_within_bounds(&self, u: &[f64]) -> bool {
        let (jerk, xi) = (self.jerk_bounds(), self.curvature_change_bounds());
        u.chunks(INPUT_SIZE).all(|b| jerk.contains(b[J]) && xi.contains(b[XI]))
    }
}

/// One smoothing problem, built from a planned trajectory
#[derive(Debug, Clone)]
pub struct SmoothingProblem {
    params: ProblemParameters,
    integrator: SensitivityIntegrator,
    /// Reference states, `STATE_SIZE` entries per input point
    x_ref: DVector<f64>,
    x0: StateVector,
    stepsize: f64,
    /// Fine steps per input interval
    steps_per_interval: usize,
    num_points: usize,
    lower_bound: Vec<f64>,
    upper_bound: Vec<f64>,
    constraint_tol: Vec<f64>,
    cache: Option<(Vec<f64>, Integration)>,
}

impl SmoothingProblem {
    /// Build the problem for `trajectory` in origin-shifted coordinates
    ///
    /// Returns the problem and the initial decision vector.
    pub fn new(
        params: ProblemParameters,
        subsampling: usize,
        trajectory: &DiscretizedTrajectory,
        offset: &MapOffset,
    ) -> Result<(Self, Vec<f64>), SmoothingError> {
        let size = trajectory.len();
        if size < 2 {
            return Err(SmoothingError::TooFewPoints(size));
        }
        let steps_per_interval = subsampling + 1;
        let num_points = (size - 1) * steps_per_interval + 1;
        let duration = trajectory[size - 1].relative_time - trajectory[0].relative_time;
        let stepsize = duration / ((size - 1) * steps_per_interval) as f64;
        if stepsize.is_nan() || stepsize <= 0.0 {
            return Err(SmoothingError::InvalidTimeStep(stepsize));
        }

        let shifted_state = |p: &TrajectoryPoint| {
            let mut x = p.kinematic_state().to_vector();
            x[X] -= offset.x;
            x[Y] -= offset.y;
            x
        };
        let mut x_ref = DVector::zeros(size * STATE_SIZE);
        for (i, p) in trajectory.iter().enumerate() {
            x_ref.fixed_rows_mut::<STATE_SIZE>(i * STATE_SIZE).copy_from(&shifted_state(p));
        }
        let x0 = shifted_state(&trajectory[0]);

        let (jerk, xi) = (params.jerk_bounds(), params.curvature_change_bounds());
        let mut lower_bound = Vec::with_capacity(num_points * INPUT_SIZE);
        let mut upper_bound = Vec::with_capacity(num_points * INPUT_SIZE);
        let mut u = Vec::with_capacity(num_points * INPUT_SIZE);
        for k in 0..num_points {
            // hold the input of the segment's first point
            let p = &trajectory[(k / steps_per_interval).min(size - 1)];
            u.push(jerk.clamp(p.da));
            u.push(xi.clamp(p.dkappa));
            lower_bound.extend_from_slice(&[jerk.lower, xi.lower]);
            upper_bound.extend_from_slice(&[jerk.upper, xi.upper]);
        }

        let constraint_tol = (1..num_points)
            .flat_map(|_| {
                vec![
                    params.tol_acceleration,
                    params.tol_acceleration,
                    params.tol_curvature,
                    params.tol_curvature,
                    params.tol_velocity,
                    params.tol_velocity,
                ]
            })
            .collect();

        let problem = Self {
            params,
            integrator: SensitivityIntegrator::default(),
            x_ref,
            x0,
            stepsize,
            steps_per_interval,
            num_points,
            lower_bound,
            upper_bound,
            constraint_tol,
            cache: None,
        };

        if !problem.check_bounds_after_integration(&u) {
            debug!("initial input guess leaves the state bounds, starting from zero inputs");
            u.iter_mut().for_each(|v| *v = 0.0);
        }
        Ok((problem, u))
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn stepsize(&self) -> f64 {
        self.stepsize
    }

    pub fn initial_state(&self) -> &StateVector {
        &self.x0
    }

    pub fn params(&self) -> &ProblemParameters {
        &self.params
    }

    /// Simulate `u` and check the state bounds on the result
    pub fn check_bounds_after_integration(&self, u: &[f64]) -> bool {
        let states = self.integrator.simulate(&self.x0, u, self.stepsize);
        self.params.states_within_bounds(&states)
    }

    pub fn simulate(&self, u: &[f64]) -> DVector<f64> {
        self.integrator.simulate(&self.x0, u, self.stepsize)
    }

    /// Integrate only if `u` changed since the last call
    fn integration(&mut self, u: &[f64]) -> &Integration {
        if self.cache.as_ref().map_or(true, |(cached_u, _)| cached_u.as_slice() != u) {
            self.cache = None;
        }
        let (integrator, x0, h) = (self.integrator, self.x0, self.stepsize);
        &self.cache.get_or_insert_with(|| (u.to_vec(), integrator.integrate(&x0, u, h))).1
    }

    /// Weighted cost and its gradient w.r.t. the stacked states
    fn state_cost(&self, states: &DVector<f64>) -> (f64, DVector<f64>) {
        let p = &self.params;
        let mut cost = 0.0;
        let mut grad = DVector::zeros(states.len());

        for k in 0..self.num_points {
            let r = k * STATE_SIZE;
            let (kappa, a) = (states[r + KAPPA], states[r + A]);
            cost += p.cost_curvature * kappa * kappa + p.cost_acceleration * a * a;
            grad[r + KAPPA] += 2.0 * p.cost_curvature * kappa;
            grad[r + A] += 2.0 * p.cost_acceleration * a;

            if k % self.steps_per_interval == 0 {
                let rr = (k / self.steps_per_interval) * STATE_SIZE;
                for &(idx, w) in &[
                    (X, p.cost_offset_x),
                    (Y, p.cost_offset_y),
                    (THETA, p.cost_offset_theta),
                    (V, p.cost_offset_v),
                ] {
                    let d = states[r + idx] - self.x_ref[rr + idx];
                    cost += w * d * d;
                    grad[r + idx] += 2.0 * w * d;
                }
            }
        }
        (cost, grad)
    }
}

impl NonlinearProblem for SmoothingProblem {
    fn dimension(&self) -> usize {
        self.num_points * INPUT_SIZE
    }

    fn lower_bounds(&self) -> &[f64] {
        &self.lower_bound
    }

    fn upper_bounds(&self) -> &[f64] {
        &self.upper_bound
    }

    fn objective(&mut self, u: &[f64], grad: Option<&mut [f64]>) -> f64 {
        let (w_j, w_xi) = (self.params.cost_acceleration_change, self.params.cost_curvature_change);
        let input_cost: f64 = u.chunks(INPUT_SIZE).map(|b| w_j * b[J] * b[J] + w_xi * b[XI] * b[XI]).sum();

        let (state_cost, dcost_dx) = {
            let states = self.integration(u).states.clone();
            self.state_cost(&states)
        };

        if let Some(g) = grad {
            let sensitivity = &self.integration(u).sensitivity;
            let dcost_du = sensitivity.tr_mul(&dcost_dx);
            for (k, gk) in g.iter_mut().enumerate() {
                let w = if k % INPUT_SIZE == J { w_j } else { w_xi };
                *gk = dcost_du[k] + 2.0 * w * u[k];
            }
        }
        state_cost + input_cost
    }

    fn num_inequality_constraints(&self) -> usize {
        (self.num_points - 1) * CONSTRAINTS_PER_POINT
    }

    fn inequality_tolerances(&self) -> &[f64] {
        &self.constraint_tol
    }

    fn inequality_constraints(&mut self, u: &[f64], result: &mut [f64], jacobian: Option<&mut [f64]>) {
        let p = self.params.clone();
        let n = u.len();
        let families = [
            (A, p.lower_bound_acceleration, p.upper_bound_acceleration),
            (KAPPA, p.lower_bound_curvature, p.upper_bound_curvature),
            (V, p.lower_bound_velocity, p.upper_bound_velocity),
        ];
        let integration = self.integration(u);

        for k in 1..integration.num_points() {
            let base = (k - 1) * CONSTRAINTS_PER_POINT;
            for (f, &(idx, lb, ub)) in families.iter().enumerate() {
                let value = integration.states[k * STATE_SIZE + idx];
                result[base + 2 * f] = value - ub;
                result[base + 2 * f + 1] = lb - value;
            }
        }

        if let Some(jac) = jacobian {
            for k in 1..integration.num_points() {
                let base = (k - 1) * CONSTRAINTS_PER_POINT;
                for (f, &(idx, _, _)) in families.iter().enumerate() {
                    let row = integration.sensitivity.row(k * STATE_SIZE + idx);
                    let upper = (base + 2 * f) * n;
                    let lower = (base + 2 * f + 1) * n;
                    for c in 0..n {
                        jac[upper + c] = row[c];
                        jac[lower + c] = -row[c];
                    }
                }
            }
        }
    }
}

/// Smooths planned trajectories with a `NonlinearOptimizer`
#[derive(Debug)]
pub struct TrajectorySmoother<O> {
    optimizer: O,
    problem_params: ProblemParameters,
    solver_params: SolverParameters,
    offset: MapOffset,
    problem: Option<SmoothingProblem>,
    u: Vec<f64>,
    initial_time: f64,
    status: Option<OptimizerStatus>,
    num_evals: usize,
}

impl<O: NonlinearOptimizer> TrajectorySmoother<O> {
    pub fn new(
        optimizer: O,
        problem_params: ProblemParameters,
        solver_params: SolverParameters,
        offset: MapOffset,
    ) -> Self {
        Self {
            optimizer,
            problem_params,
            solver_params,
            offset,
            problem: None,
            u: Vec::new(),
            initial_time: 0.0,
            status: None,
            num_evals: 0,
        }
    }

    pub fn problem_params(&self) -> &ProblemParameters {
        &self.problem_params
    }

    pub fn solver_params(&self) -> &SolverParameters {
        &self.solver_params
    }

    pub fn set_solver_params(&mut self, params: SolverParameters) {
        self.solver_params = params;
    }

    pub fn input_vector(&self) -> &[f64] {
        &self.u
    }

    pub fn status(&self) -> Option<OptimizerStatus> {
        self.status
    }

    pub fn num_evals(&self) -> usize {
        self.num_evals
    }

    pub fn initialize_problem(
        &mut self,
        subsampling: usize,
        trajectory: &DiscretizedTrajectory,
    ) -> Result<(), SmoothingError> {
        self.problem = None;
        self.status = None;
        let (problem, u) =
            SmoothingProblem::new(self.problem_params.clone(), subsampling, trajectory, &self.offset)?;
        debug!(
            "smoothing problem: {} input points, {} fine points, step {:.4} s",
            trajectory.len(),
            problem.num_points(),
            problem.stepsize()
        );
        self.initial_time = trajectory[0].relative_time;
        self.u = u;
        self.problem = Some(problem);
        Ok(())
    }

    /// Run the optimizer on the initialized problem
    ///
    /// A roundoff limited run keeps its result and counts as success.
    pub fn optimize(&mut self) -> Result<OptimizerStatus, SmoothingError> {
        let problem = self.problem.as_mut().ok_or(SmoothingError::NotInitialized)?;

        let status = match self.optimizer.optimize(problem, &mut self.u, &self.solver_params) {
            Ok(outcome) => {
                self.num_evals = outcome.evaluations;
                match outcome.status {
                    OptimizerStatus::Success => info!("Generic success return value."),
                    OptimizerStatus::StopvalReached => info!("Optimization stopped because stopval was reached."),
                    OptimizerStatus::FtolReached => info!("Optimization stopped because ftol_rel or ftol_abs was reached."),
                    OptimizerStatus::XtolReached => info!("Optimization stopped because xtol_rel or xtol_abs was reached."),
                    OptimizerStatus::MaxevalReached => info!("Optimization stopped because maxeval was reached."),
                    OptimizerStatus::MaxtimeReached => info!("Optimization stopped because maxtime was reached."),
                    other => warn!("Optimizer returned status {:?}", other),
                }
                outcome.status
            }
            Err(OptimizerError::RoundoffLimited { objective }) => {
                warn!("Halted because roundoff errors limited progress, objective {}", objective);
                OptimizerStatus::RoundoffLimited
            }
            Err(e) => {
                error!("Unhandled error while optimizing: {}", e);
                self.status = Some(e.status());
                return Err(e.into());
            }
        };
        self.status = Some(status);

        if status.is_usable() {
            info!("Smoothing optimization successful. Status: {}", status.code());
            Ok(status)
        } else {
            error!("Smoothing optimization failed. Status: {}", status.code());
            Err(SmoothingError::Status(status))
        }
    }

    /// Trajectory on the fine grid for the current input vector
    pub fn optimized_trajectory(&self) -> Result<DiscretizedTrajectory, SmoothingError> {
        let problem = self.problem.as_ref().ok_or(SmoothingError::NotInitialized)?;
        let states = problem.simulate(&self.u);
        let h = problem.stepsize();

        let mut trajectory = DiscretizedTrajectory::new();
        let mut s = 0.0;
        let mut last: Option<Point2D> = None;
        for (k, (x, u)) in states.as_slice().chunks(STATE_SIZE).zip(self.u.chunks(INPUT_SIZE)).enumerate() {
            let position = Point2D::new(x[X] + self.offset.x, x[Y] + self.offset.y);
            if let Some(prev) = last {
                s += prev.distance(&position);
            }
            last = Some(position);
            trajectory.push(TrajectoryPoint {
                s,
                x: position.x,
                y: position.y,
                theta: x[THETA],
                kappa: x[KAPPA],
                dkappa: u[XI],
                v: x[V],
                a: x[A],
                da: u[J],
                relative_time: self.initial_time + k as f64 * h,
            });
        }
        Ok(trajectory)
    }

    /// Re-check input and state bounds of the current solution
    pub fn validate_solution(&self) -> bool {
        match &self.problem {
            Some(problem) => {
                let inputs_ok = self.problem_params.inputs_within_bounds(&self.u);
                let states_ok = problem.check_bounds_after_integration(&self.u);
                if !inputs_ok || !states_ok {
                    warn!("Smoothed trajectory violates bounds (inputs ok: {}, states ok: {})", inputs_ok, states_ok);
                }
                inputs_ok && states_ok
            }
            None => false,
        }
    }

    /// Initialize, optimize and rebuild in one call
    ///
    /// Trajectories with a single point are returned unchanged.
    pub fn smooth(
        &mut self,
        subsampling: usize,
        trajectory: &DiscretizedTrajectory,
    ) -> Result<DiscretizedTrajectory, SmoothingError> {
        if trajectory.len() == 1 {
            info!("Input trajectory has only one point, no need for smoothing");
            return Ok(trajectory.clone());
        }
        self.initialize_problem(subsampling, trajectory)?;
        self.optimize()?;
        self.validate_solution();
        self.optimized_trajectory()
    }
}
