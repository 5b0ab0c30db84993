//! Gradient based nonlinear optimizer with box bounds
//!
//! `ProjectedGradientOptimizer` minimizes a quadratic penalty merit
//! function
//!
//! ```text
//! phi(u) = f(u) + rho * sum_i max(0, c_i(u))^2
//! ```
//!
//! by projected gradient steps with Armijo backtracking. Whenever the
//! steps stall and a constraint is still violated beyond its tolerance,
//! `rho` is increased and the inner loop restarts from the current point.
//!
//! Return values follow the classic NLopt codes so results can be
//! classified the same way regardless of the engine behind the trait.

use std::time::{Duration, Instant};

use log::{debug, trace};
use serde::Deserialize;
use thiserror::Error;

use crate::common::traits::{NonlinearOptimizer, NonlinearProblem};

const ARMIJO_C: f64 = 1e-4;
const MIN_STEP: f64 = 1e-14;
const MAX_STEP: f64 = 1e6;
const PENALTY_GROWTH: f64 = 10.0;
const MAX_PENALTY: f64 = 1e12;

/// Optimization algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    ProjectedGradient,
}

/// Solver configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SolverParameters {
    pub algorithm: Algorithm,
    /// Relative tolerance on the change of the decision vector
    pub x_tol_rel: f64,
    /// Absolute tolerance on the change of the decision vector
    pub x_tol_abs: f64,
    /// Maximum number of objective evaluations
    pub max_num_evals: usize,
    /// Maximum wall time [s]
    pub max_time: f64,
    /// Penalty weight of the first outer iteration
    pub initial_penalty: f64,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::ProjectedGradient,
            x_tol_rel: 1e-6,
            x_tol_abs: 1e-6,
            max_num_evals: 1000,
            max_time: 0.15,
            initial_penalty: 1e2,
        }
    }
}

/// Termination status, codes match NLopt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerStatus {
    Failure,
    InvalidArgs,
    OutOfMemory,
    RoundoffLimited,
    ForcedStop,
    Success,
    StopvalReached,
    FtolReached,
    XtolReached,
    MaxevalReached,
    MaxtimeReached,
}

/// Coarse classification of a termination status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    SuccessFamily,
    ToleranceReached,
    BudgetExhausted,
    InvalidInput,
    /// Progress was limited by roundoff, the result is still usable
    NumericallyLimited,
    Fatal,
}

impl OptimizerStatus {
    pub fn code(&self) -> i32 {
        match self {
            OptimizerStatus::Failure => -1,
            OptimizerStatus::InvalidArgs => -2,
            OptimizerStatus::OutOfMemory => -3,
            OptimizerStatus::RoundoffLimited => -4,
            OptimizerStatus::ForcedStop => -5,
            OptimizerStatus::Success => 1,
            OptimizerStatus::StopvalReached => 2,
            OptimizerStatus::FtolReached => 3,
            OptimizerStatus::XtolReached => 4,
            OptimizerStatus::MaxevalReached => 5,
            OptimizerStatus::MaxtimeReached => 6,
        }
    }

    pub fn class(&self) -> StatusClass {
        match self {
            OptimizerStatus::Success | OptimizerStatus::StopvalReached => StatusClass::SuccessFamily,
            OptimizerStatus::FtolReached | OptimizerStatus::XtolReached => {
                StatusClass::ToleranceReached
            }
            OptimizerStatus::MaxevalReached | OptimizerStatus::MaxtimeReached => {
                StatusClass::BudgetExhausted
            }
            OptimizerStatus::InvalidArgs => StatusClass::InvalidInput,
            OptimizerStatus::RoundoffLimited => StatusClass::NumericallyLimited,
            OptimizerStatus::Failure | OptimizerStatus::OutOfMemory | OptimizerStatus::ForcedStop => {
                StatusClass::Fatal
            }
        }
    }

    /// Whether the decision vector holds a usable result
    pub fn is_usable(&self) -> bool {
        !matches!(self.class(), StatusClass::InvalidInput | StatusClass::Fatal)
    }
}

/// Errors raised instead of returning a status
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Roundoff stopped progress, the decision vector is still usable
    #[error("Halted because roundoff errors limited progress (objective {objective})")]
    RoundoffLimited { objective: f64 },

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Objective or constraints evaluated to a non finite value")]
    NonFiniteEvaluation,
}

impl OptimizerError {
    pub fn status(&self) -> OptimizerStatus {
        match self {
            OptimizerError::RoundoffLimited { .. } => OptimizerStatus::RoundoffLimited,
            OptimizerError::InvalidArgs(_) => OptimizerStatus::InvalidArgs,
            OptimizerError::NonFiniteEvaluation => OptimizerStatus::Failure,
        }
    }
}

/// Result of a regular termination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationOutcome {
    pub status: OptimizerStatus,
    pub objective: f64,
    pub evaluations: usize,
}

/// Merit function evaluator shared by the inner and outer loop
struct Merit<'a> {
    problem: &'a mut dyn NonlinearProblem,
    constraints: Vec<f64>,
    jacobian: Vec<f64>,
    evaluations: usize,
}

impl<'a> Merit<'a> {
    fn new(problem: &'a mut dyn NonlinearProblem) -> Self {
        let m = problem.num_inequality_constraints();
        let n = problem.dimension();
        Self { problem, constraints: vec![0.0; m], jacobian: vec![0.0; m * n], evaluations: 0 }
    }

    fn eval(&mut self, u: &[f64], rho: f64, grad: Option<&mut [f64]>) -> Result<f64, OptimizerError> {
        self.evaluations += 1;
        let n = u.len();
        let m = self.constraints.len();
        let with_grad = grad.is_some();

        let value = match grad {
            Some(g) => {
                let f = self.problem.objective(u, Some(&mut *g));
                if m > 0 {
                    self.problem.inequality_constraints(u, &mut self.constraints, Some(&mut self.jacobian));
                    for (i, &c) in self.constraints.iter().enumerate() {
                        if c > 0.0 {
                            let row = &self.jacobian[i * n..(i + 1) * n];
                            for (gj, &dj) in g.iter_mut().zip(row) {
                                *gj += 2.0 * rho * c * dj;
                            }
                        }
                    }
                }
                if g.iter().any(|v| !v.is_finite()) {
                    return Err(OptimizerError::NonFiniteEvaluation);
                }
                f
            }
            None => {
                let f = self.problem.objective(u, None);
                if m > 0 {
                    self.problem.inequality_constraints(u, &mut self.constraints, None);
                }
                f
            }
        };

        let penalty: f64 = self.constraints.iter().filter(|&&c| c > 0.0).map(|c| c * c).sum();
        let merit = value + rho * penalty;
        if !merit.is_finite() {
            return Err(OptimizerError::NonFiniteEvaluation);
        }
        trace!("merit eval {}: f = {}, penalty = {}, grad = {}", self.evaluations, value, penalty, with_grad);
        Ok(merit)
    }

    /// Largest violation relative to the tolerance of the last evaluation
    fn worst_violation(&self) -> f64 {
        let tol = self.problem.inequality_tolerances();
        self.constraints
            .iter()
            .zip(tol)
            .map(|(&c, &t)| c - t)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Projected gradient descent on a quadratic penalty merit function
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectedGradientOptimizer;

impl ProjectedGradientOptimizer {
    pub fn new() -> Self {
        ProjectedGradientOptimizer
    }

    fn validate(
        problem: &dyn NonlinearProblem,
        u: &[f64],
        params: &SolverParameters,
    ) -> Result<(), OptimizerError> {
        let n = problem.dimension();
        if n == 0 {
            return Err(OptimizerError::InvalidArgs("empty decision vector".to_string()));
        }
        if u.len() != n || problem.lower_bounds().len() != n || problem.upper_bounds().len() != n {
            return Err(OptimizerError::InvalidArgs(format!(
                "dimension mismatch: problem {}, start {}, bounds {}/{}",
                n,
                u.len(),
                problem.lower_bounds().len(),
                problem.upper_bounds().len()
            )));
        }
        if problem.inequality_tolerances().len() != problem.num_inequality_constraints() {
            return Err(OptimizerError::InvalidArgs(
                "one tolerance per inequality constraint required".to_string(),
            ));
        }
        let bad_bound = problem
            .lower_bounds()
            .iter()
            .zip(problem.upper_bounds())
            .position(|(lb, ub)| lb > ub || lb.is_nan() || ub.is_nan());
        if let Some(i) = bad_bound {
            return Err(OptimizerError::InvalidArgs(format!("lower bound above upper bound at {}", i)));
        }
        if u.iter().any(|v| !v.is_finite()) {
            return Err(OptimizerError::InvalidArgs("non finite start point".to_string()));
        }
        if params.max_num_evals == 0 || params.max_time <= 0.0 {
            return Err(OptimizerError::InvalidArgs("empty evaluation budget".to_string()));
        }
        Ok(())
    }
}

fn project(u: &mut [f64], lower: &[f64], upper: &[f64]) {
    for ((v, &lb), &ub) in u.iter_mut().zip(lower).zip(upper) {
        *v = v.max(lb).min(ub);
    }
}

impl NonlinearOptimizer for ProjectedGradientOptimizer {
    fn optimize(
        &self,
        problem: &mut dyn NonlinearProblem,
        u: &mut [f64],
        params: &SolverParameters,
    ) -> Result<OptimizationOutcome, OptimizerError> {
        Self::validate(problem, u, params)?;

        let n = u.len();
        let lower = problem.lower_bounds().to_vec();
        let upper = problem.upper_bounds().to_vec();
        let has_constraints = problem.num_inequality_constraints() > 0;
        project(u, &lower, &upper);

        let budget = Duration::from_secs_f64(params.max_time);
        let start = Instant::now();
        let mut merit = Merit::new(problem);

        let mut rho = params.initial_penalty;
        let mut step = 1.0;
        let mut grad = vec![0.0; n];
        let mut candidate = vec![0.0; n];

        let status = 'outer: loop {
            // inner loop: projected gradient until the step stalls
            loop {
                if merit.evaluations >= params.max_num_evals {
                    break 'outer OptimizerStatus::MaxevalReached;
                }
                if start.elapsed() >= budget {
                    break 'outer OptimizerStatus::MaxtimeReached;
                }

                let phi = merit.eval(u, rho, Some(&mut grad))?;

                let mut accepted = false;
                while step >= MIN_STEP {
                    for i in 0..n {
                        candidate[i] = u[i] - step * grad[i];
                    }
                    project(&mut candidate, &lower, &upper);
                    let decrease: f64 = grad.iter().zip(u.iter()).zip(&candidate).map(|((g, a), b)| g * (a - b)).sum();
                    let phi_c = merit.eval(&candidate, rho, None)?;
                    if phi_c <= phi - ARMIJO_C * decrease {
                        accepted = true;
                        break;
                    }
                    step *= 0.5;
                    if merit.evaluations >= params.max_num_evals {
                        break 'outer OptimizerStatus::MaxevalReached;
                    }
                }
                if !accepted {
                    debug!("line search failed, step {} below {}", step, MIN_STEP);
                    return Err(OptimizerError::RoundoffLimited { objective: phi });
                }

                let converged = u.iter().zip(&candidate).all(|(a, b)| {
                    let dx = (a - b).abs();
                    dx <= params.x_tol_abs || dx <= params.x_tol_rel * a.abs()
                });
                u.copy_from_slice(&candidate);
                step = (step * 2.0).min(MAX_STEP);
                if converged {
                    break;
                }
            }

            if !has_constraints {
                break OptimizerStatus::XtolReached;
            }
            // constraint values of the accepted point
            merit.eval(u, rho, None)?;
            if merit.worst_violation() <= 0.0 || rho >= MAX_PENALTY {
                break OptimizerStatus::XtolReached;
            }
            rho *= PENALTY_GROWTH;
            step = 1.0;
            debug!("constraints violated, penalty raised to {}", rho);
        };

        let objective = merit.problem.objective(u, None);
        Ok(OptimizationOutcome { status, objective, evaluations: merit.evaluations })
    }
}
