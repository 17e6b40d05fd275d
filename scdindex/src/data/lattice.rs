use std::f64::consts::PI;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Real-space unit cell of the material being indexed.
///
/// Edge lengths are in Angstrom, angles in degrees. The cell is a known,
/// immutable input to an indexing run; only the orientation of the
/// crystal is unknown.
///
/// # Arguments (fields)
///
/// * `a`, `b`, `c` - cell edge lengths.
/// * `alpha` - angle between b and c.
/// * `beta` - angle between a and c.
/// * `gamma` - angle between a and b.
///
/// # Examples
///
/// ```
/// use scdindex::data::lattice::LatticeConstants;
///
/// let cell = LatticeConstants::quartz();
/// let b = cell.b_matrix().unwrap();
/// // the first direct axis lies along x, so B_00 is 2 pi / a
/// assert!((b[(0, 0)] - 2.0 * std::f64::consts::PI / 4.9138).abs() < 1e-9);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeConstants {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl LatticeConstants {
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Self {
        LatticeConstants { a, b, c, alpha, beta, gamma }
    }

    /// Hexagonal quartz cell, the standard test material.
    pub fn quartz() -> Self {
        LatticeConstants::new(4.9138, 4.9138, 5.4051, 90.0, 90.0, 120.0)
    }

    /// Monoclinic oxalic acid dihydrate cell.
    pub fn oxalic_acid() -> Self {
        LatticeConstants::new(6.094, 3.601, 11.915, 90.0, 103.2, 90.0)
    }

    /// Cubic iron silicide (FeSi) cell.
    pub fn iron_silicide() -> Self {
        LatticeConstants::new(4.486, 4.486, 4.486, 90.0, 90.0, 90.0)
    }

    /// Matrix whose rows are the direct cell vectors: a along x, b in the
    /// x-y plane. `None` when the six constants do not describe a real
    /// cell (non-positive edge, degenerate gamma, or angle combination
    /// leaving no room for the third axis).
    pub fn direct_cell_matrix(&self) -> Option<Matrix3<f64>> {
        if self.a <= 0.0 || self.b <= 0.0 || self.c <= 0.0 {
            return None;
        }
        let alpha = self.alpha.to_radians();
        let beta = self.beta.to_radians();
        let gamma = self.gamma.to_radians();
        let sin_gamma = gamma.sin();
        if sin_gamma.abs() < 1.0e-10 {
            return None;
        }
        let cx = self.c * beta.cos();
        let cy = self.c * (alpha.cos() - beta.cos() * gamma.cos()) / sin_gamma;
        let cz_squared = self.c * self.c - cx * cx - cy * cy;
        if cz_squared <= 0.0 {
            return None;
        }
        Some(Matrix3::new(
            self.a,
            0.0,
            0.0,
            self.b * gamma.cos(),
            self.b * sin_gamma,
            0.0,
            cx,
            cy,
            cz_squared.sqrt(),
        ))
    }

    /// Reciprocal metric `B = 2 pi * A^-1`, mapping Miller indices of the
    /// unrotated crystal to Q positions. `None` for an invalid cell.
    pub fn b_matrix(&self) -> Option<Matrix3<f64>> {
        let direct = self.direct_cell_matrix()?;
        let inverse = direct.try_inverse()?;
        Some(inverse * (2.0 * PI))
    }

    pub fn is_valid(&self) -> bool {
        self.b_matrix().is_some()
    }
}

/// Cell parameters read back from a UB matrix in the 2 pi convention:
/// `[a, b, c, alpha, beta, gamma, volume]`. Diagnostic companion to the
/// forward construction; `None` when UB is singular.
pub fn lattice_parameters_of_ub(ub: &Matrix3<f64>) -> Option<[f64; 7]> {
    let reciprocal_metric = ub.transpose() * ub;
    let metric = reciprocal_metric.try_inverse()?;

    let a = metric[(0, 0)].sqrt();
    let b = metric[(1, 1)].sqrt();
    let c = metric[(2, 2)].sqrt();
    if !(a.is_finite() && b.is_finite() && c.is_finite()) || a == 0.0 || b == 0.0 || c == 0.0 {
        return None;
    }
    let alpha = (metric[(1, 2)] / (b * c)).clamp(-1.0, 1.0).acos().to_degrees();
    let beta = (metric[(0, 2)] / (a * c)).clamp(-1.0, 1.0).acos().to_degrees();
    let gamma = (metric[(0, 1)] / (a * b)).clamp(-1.0, 1.0).acos().to_degrees();
    let volume = metric.determinant().abs().sqrt();

    let two_pi = 2.0 * PI;
    Some([
        a * two_pi,
        b * two_pi,
        c * two_pi,
        alpha,
        beta,
        gamma,
        volume * two_pi.powi(3),
    ])
}
