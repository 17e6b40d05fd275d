//! Distance-to-lattice-point residual model shared by the orientation
//! search, the inlier tests and the refinement gate.

use nalgebra::{Matrix3, Vector3};

use crate::data::peak::Peak;

/// Maximum component distance from `hkl` to the nearest integer triple.
/// One badly indexed coordinate disqualifies a peak, so the metric is the
/// worst component, not the Euclidean norm.
pub fn distance_to_nearest_integers(hkl: &Vector3<f64>) -> f64 {
    let mut worst = 0.0f64;
    for k in 0..3 {
        let mut distance = hkl[k] - hkl[k].floor();
        if distance > 0.5 {
            distance = 1.0 - distance;
        }
        worst = worst.max(distance);
    }
    worst
}

/// Signed per-component offset from the nearest integer, each component
/// in `[-0.5, 0.5]`. The magnitude of the largest component equals
/// `distance_to_nearest_integers`.
pub fn nearest_integer_offsets(hkl: &Vector3<f64>) -> Vector3<f64> {
    hkl.map(|v| v - v.round())
}

/// Fractional Miller index predicted for `q` under `ub_inverse`.
pub fn fractional_hkl(q: &Vector3<f64>, ub_inverse: &Matrix3<f64>) -> Vector3<f64> {
    ub_inverse * q
}

/// Nearest-integer Miller index predicted for `q` under `ub_inverse`.
pub fn rounded_hkl(q: &Vector3<f64>, ub_inverse: &Matrix3<f64>) -> Vector3<f64> {
    fractional_hkl(q, ub_inverse).map(|v| v.round())
}

/// Indexing residual of a single peak position under `ub_inverse`.
pub fn peak_residual(q: &Vector3<f64>, ub_inverse: &Matrix3<f64>) -> f64 {
    distance_to_nearest_integers(&fractional_hkl(q, ub_inverse))
}

/// Rounded Miller indices for a whole peak list under one `ub_inverse`.
pub fn rounded_hkl_table(peaks: &[Peak], ub_inverse: &Matrix3<f64>) -> Vec<Vector3<f64>> {
    peaks.iter().map(|peak| rounded_hkl(&peak.q, ub_inverse)).collect()
}
