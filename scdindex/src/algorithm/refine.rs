//! Orientation refinement against an indexed peak set.
//!
//! Once a candidate orientation rounds enough peaks to integer Miller
//! triples, the matrix itself is re-estimated by solving the linear
//! least-squares system hkl * UB^T = q over those peaks. This replaces
//! the three-angle rotation fit with a full nine-component fit, so the
//! refined matrix can also absorb small cell-parameter errors.

use std::fmt;

use log::debug;
use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::algorithm::residual;
use crate::data::orientation::Orientation;
use crate::data::peak::Peak;

/// Singular values below this threshold are treated as zero when ranking
/// and solving. Miller triples are small integers, so the informative
/// singular values sit many orders of magnitude above it.
pub const RANK_EPS: f64 = 1.0e-8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefineError {
    /// No peak indexed below the tolerance, nothing to fit against.
    NoInliers,
    /// The indexed peaks do not span three dimensions.
    SingularSystem,
}

impl fmt::Display for RefineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefineError::NoInliers => write!(f, "no peaks indexed below the tolerance"),
            RefineError::SingularSystem => write!(f, "indexed peaks span fewer than three dimensions"),
        }
    }
}

impl std::error::Error for RefineError {}

/// Result of one refinement round.
#[derive(Clone, Debug)]
pub struct Refinement {
    pub orientation: Orientation,
    /// rounded Miller triples of every input peak under the refined matrix
    pub hkl: Vec<Vector3<f64>>,
    /// peaks that entered the least-squares fit
    pub num_inliers: usize,
    /// peaks left out of the fit
    pub num_rejected: usize,
    /// squared residual norm of the linear system at the solution
    pub fit_residual: f64,
}

/// Solve hkl * UB^T = q for UB in the least-squares sense.
///
/// Both slices must have equal length and at least three entries, and
/// the Miller triples must span three dimensions. Returns the fitted
/// matrix together with the squared residual norm of the system.
pub fn best_fit_ub(
    hkls: &[Vector3<f64>],
    qs: &[Vector3<f64>],
) -> Option<(Matrix3<f64>, f64)> {
    if hkls.len() < 3 || hkls.len() != qs.len() {
        return None;
    }
    let n = hkls.len();
    let h = DMatrix::from_fn(n, 3, |row, col| hkls[row][col]);
    let rhs = DMatrix::from_fn(n, 3, |row, col| qs[row][col]);

    let svd = h.clone().svd(true, true);
    if svd.rank(RANK_EPS) < 3 {
        return None;
    }
    let solution = svd.solve(&rhs, RANK_EPS).ok()?;
    let ub = solution.fixed_view::<3, 3>(0, 0).transpose();
    let fit_residual = (&h * &solution - &rhs).norm_squared();
    Some((ub, fit_residual))
}

/// Re-estimate the orientation from the peaks it currently indexes.
///
/// The inlier set is frozen up front: every peak whose indexing residual
/// under `ub_inverse` stays below `tolerance` enters the fit with its
/// rounded Miller triple, except peaks that round to the origin. The
/// returned Miller table covers every input peak under the refined
/// matrix, whether or not it was an inlier.
pub fn refine_orientation(
    peaks: &[Peak],
    ub_inverse: &Matrix3<f64>,
    tolerance: f64,
) -> Result<Refinement, RefineError> {
    let mut hkls = Vec::new();
    let mut qs = Vec::new();
    for peak in peaks {
        if residual::peak_residual(&peak.q, ub_inverse) < tolerance {
            let rounded = residual::rounded_hkl(&peak.q, ub_inverse);
            if rounded != Vector3::zeros() {
                hkls.push(rounded);
                qs.push(peak.q);
            }
        }
    }
    if hkls.is_empty() {
        return Err(RefineError::NoInliers);
    }

    let (ub, fit_residual) = best_fit_ub(&hkls, &qs).ok_or(RefineError::SingularSystem)?;
    if !ub.iter().all(|v| v.is_finite()) {
        return Err(RefineError::SingularSystem);
    }
    let orientation = Orientation::from_ub(ub).ok_or(RefineError::SingularSystem)?;

    let num_inliers = hkls.len();
    debug!(
        "refined orientation from {} of {} peaks, fit residual {:.3e}",
        num_inliers,
        peaks.len(),
        fit_residual
    );

    Ok(Refinement {
        hkl: residual::rounded_hkl_table(peaks, &orientation.ub_inverse),
        orientation,
        num_inliers,
        num_rejected: peaks.len() - num_inliers,
        fit_residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::data::lattice::LatticeConstants;
    use crate::data::orientation::ub_from_angles;

    fn quartz_setup() -> (Vec<Peak>, Matrix3<f64>, Matrix3<f64>) {
        let b = LatticeConstants::quartz().b_matrix().unwrap();
        let ub = ub_from_angles(&b, 12.0, 34.0, 56.0);
        let ub_inverse = ub.try_inverse().unwrap();

        let mut peaks = Vec::new();
        for h in -2..=2 {
            for k in -2..=2 {
                for l in -2..=2 {
                    if h == 0 && k == 0 && l == 0 {
                        continue;
                    }
                    let hkl = Vector3::new(h as f64, k as f64, l as f64);
                    peaks.push(Peak::new(ub * hkl, 1.0));
                }
            }
        }
        (peaks, ub, ub_inverse)
    }

    #[test]
    fn test_refinement_is_a_fixed_point_on_exact_peaks() {
        let (peaks, ub, ub_inverse) = quartz_setup();
        let refined = refine_orientation(&peaks, &ub_inverse, 0.12).unwrap();

        assert_eq!(refined.num_inliers, peaks.len());
        assert_eq!(refined.num_rejected, 0);
        assert!(refined.fit_residual < 1e-16);
        assert_relative_eq!(refined.orientation.ub, ub, epsilon = 1e-8);

        // a second pass does not move the solution
        let again = refine_orientation(&peaks, &refined.orientation.ub_inverse, 0.12).unwrap();
        assert!((again.orientation.ub - refined.orientation.ub).amax() < 1e-10);
    }

    #[test]
    fn test_refinement_recovers_from_a_perturbed_matrix() {
        let (peaks, ub, ub_inverse) = quartz_setup();
        let mut perturbed = ub_inverse;
        perturbed[(0, 1)] += 0.002;

        let refined = refine_orientation(&peaks, &perturbed, 0.12).unwrap();
        assert_eq!(refined.num_inliers, peaks.len());
        assert_relative_eq!(refined.orientation.ub, ub, epsilon = 1e-9);

        // the Miller table matches the generating triples
        for (peak, hkl) in peaks.iter().zip(refined.hkl.iter()) {
            let expected = residual::rounded_hkl(&peak.q, &ub_inverse);
            assert_eq!(*hkl, expected);
        }
    }

    #[test]
    fn test_no_inliers_under_a_wrong_matrix() {
        let (peaks, _, ub_inverse) = quartz_setup();
        let wrong = ub_inverse * 0.4317;
        assert_eq!(
            refine_orientation(&peaks, &wrong, 0.01).unwrap_err(),
            RefineError::NoInliers
        );
    }

    #[test]
    fn test_too_few_peaks_is_singular() {
        let (peaks, _, ub_inverse) = quartz_setup();
        assert_eq!(
            refine_orientation(&peaks[..2], &ub_inverse, 0.12).unwrap_err(),
            RefineError::SingularSystem
        );
    }

    #[test]
    fn test_collinear_triples_are_singular() {
        let b = LatticeConstants::quartz().b_matrix().unwrap();
        let ub = ub_from_angles(&b, 5.0, 15.0, 25.0);
        let ub_inverse = ub.try_inverse().unwrap();
        let peaks: Vec<Peak> = [1.0, 2.0, 3.0]
            .iter()
            .map(|s| Peak::new(ub * Vector3::new(*s, *s, 0.0), 1.0))
            .collect();

        assert_eq!(
            refine_orientation(&peaks, &ub_inverse, 0.12).unwrap_err(),
            RefineError::SingularSystem
        );
    }
}
