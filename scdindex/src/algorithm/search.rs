//! Multi-start rotation search.
//!
//! Fits the three Euler angles of the crystal orientation to a small set
//! of seed Q-vectors by Levenberg-Marquardt, restarted from many random
//! starting angles. The residual for one Q-vector is the signed offset of
//! its fractional Miller triple from the nearest integers, so a perfect
//! orientation drives every residual to zero.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{Const, DVector, Dim, Dyn, Matrix3, OMatrix, Vector3, U3};
use ordered_float::OrderedFloat;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::residual;
use crate::data::lattice::LatticeConstants;
use crate::data::orientation::{self, Orientation};

/// Settings for the multi-start rotation search.
///
/// # Arguments
///
/// * `restarts` - number of random Euler-angle starting points
/// * `fit_tolerance` - relative reduction threshold passed to the optimizer
/// * `patience` - maximum residual evaluations per starting point
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SearchConfig {
    pub restarts: usize,
    pub fit_tolerance: f64,
    pub patience: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            restarts: 200,
            fit_tolerance: 1.0e-10,
            patience: 200,
        }
    }
}

/// Least-squares problem over the three Euler angles (degrees).
///
/// Holds the seed Q-vectors and the inverse reciprocal cell, and caches
/// the matrix that maps Q to fractional Miller indices for the current
/// angles. Residuals come in blocks of three per Q-vector.
pub struct OrientationProblem {
    qs: Vec<Vector3<f64>>,
    b_inverse: Matrix3<f64>,
    angles: Vector3<f64>,
    ub_inverse: Matrix3<f64>,
}

impl OrientationProblem {
    pub fn new(qs: Vec<Vector3<f64>>, b_inverse: Matrix3<f64>, start: Vector3<f64>) -> Self {
        let mut problem = OrientationProblem {
            qs,
            b_inverse,
            angles: start,
            ub_inverse: Matrix3::zeros(),
        };
        problem.update();
        problem
    }

    fn update(&mut self) {
        let rotation = orientation::euler_rotation(self.angles.x, self.angles.y, self.angles.z);
        self.ub_inverse = self.b_inverse * rotation.transpose();
    }
}

impl LeastSquaresProblem<f64, Dyn, U3> for OrientationProblem {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, U3>;
    type ParameterStorage = Owned<f64, U3>;

    fn set_params(&mut self, angles: &Vector3<f64>) {
        self.angles.copy_from(angles);
        self.update();
    }

    fn params(&self) -> Vector3<f64> {
        self.angles
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut residuals = DVector::zeros(3 * self.qs.len());
        for (i, q) in self.qs.iter().enumerate() {
            let fractional = self.ub_inverse * q;
            let offsets = residual::nearest_integer_offsets(&fractional);
            residuals.fixed_rows_mut::<3>(3 * i).copy_from(&offsets);
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<OMatrix<f64, Dyn, U3>> {
        // the rounding in the residual is locally constant, so the
        // derivative of each block is that of the fractional indices
        let partials =
            orientation::euler_rotation_partials(self.angles.x, self.angles.y, self.angles.z);
        let mut jacobian =
            OMatrix::zeros_generic(Dyn::from_usize(3 * self.qs.len()), Const::<3>);
        for (i, q) in self.qs.iter().enumerate() {
            let columns = partials.map(|partial| self.b_inverse * partial.transpose() * q);
            let block = Matrix3::from_columns(&columns);
            jacobian
                .view_range_mut(3 * i..3 * (i + 1), ..)
                .copy_from(&block);
        }
        Some(jacobian)
    }
}

/// Best orientation found by the multi-start search.
#[derive(Clone, Copy, Debug)]
pub struct SearchOutcome {
    pub orientation: Orientation,
    /// sum of squared integer offsets at the fitted angles
    pub chi_square: f64,
}

/// Fit an orientation to the seed Q-vectors by restarted least squares.
///
/// Draws `config.restarts` random Euler-angle triples, refines each one
/// against the seeds and keeps the solution with the smallest sum of
/// squared offsets. Starting angles are drawn up front so results only
/// depend on the state of `rng`, not on scheduling. Returns `None` for
/// an empty seed set or a degenerate unit cell.
pub fn bootstrap_orientation(
    seeds: &[Vector3<f64>],
    lattice: &LatticeConstants,
    config: &SearchConfig,
    rng: &mut StdRng,
) -> Option<SearchOutcome> {
    if seeds.is_empty() {
        return None;
    }
    let b = lattice.b_matrix()?;
    let b_inverse = b.try_inverse()?;

    let full_turn = Uniform::new(0.0, 360.0);
    let quarter_turn = Uniform::new(0.0, 90.0);
    let starts: Vec<Vector3<f64>> = (0..config.restarts)
        .map(|_| {
            Vector3::new(
                full_turn.sample(rng),
                quarter_turn.sample(rng),
                full_turn.sample(rng),
            )
        })
        .collect();

    let solutions: Vec<(Vector3<f64>, f64)> = starts
        .into_par_iter()
        .map(|start| run_restart(seeds, &b_inverse, start, config))
        .collect();

    let (angles, chi_square) = solutions
        .into_iter()
        .filter(|(angles, chi_square)| {
            chi_square.is_finite() && angles.iter().all(|v| v.is_finite())
        })
        .min_by_key(|(_, chi_square)| OrderedFloat(*chi_square))?;

    let rotation = orientation::euler_rotation(angles.x, angles.y, angles.z);
    Some(SearchOutcome {
        orientation: Orientation {
            ub: rotation * b,
            ub_inverse: b_inverse * rotation.transpose(),
        },
        chi_square,
    })
}

fn run_restart(
    qs: &[Vector3<f64>],
    b_inverse: &Matrix3<f64>,
    start: Vector3<f64>,
    config: &SearchConfig,
) -> (Vector3<f64>, f64) {
    let problem = OrientationProblem::new(qs.to_vec(), *b_inverse, start);
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(config.fit_tolerance)
        .with_patience(config.patience)
        .minimize(problem);
    // the optimizer reports half the squared residual norm
    (problem.params(), 2.0 * report.objective_function)
}
