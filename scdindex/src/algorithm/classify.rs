//! Inlier counting and the orderings used for seed and neighbor
//! selection.

use std::cmp::Reverse;

use nalgebra::{Matrix3, Vector3};
use ordered_float::OrderedFloat;

use crate::algorithm::residual;
use crate::data::peak::Peak;

/// Number of peaks whose indexing residual under `ub_inverse` stays
/// below `tolerance`.
pub fn count_indexed(peaks: &[Peak], ub_inverse: &Matrix3<f64>, tolerance: f64) -> usize {
    peaks
        .iter()
        .filter(|peak| residual::peak_residual(&peak.q, ub_inverse) < tolerance)
        .count()
}

/// Sort strongest first, strict descending order on intensity.
pub fn sort_by_intensity_descending(peaks: &mut [Peak]) {
    peaks.sort_by_key(|peak| Reverse(OrderedFloat(peak.intensity)));
}

/// Sort by squared distance in Q to a fixed position, nearest first.
pub fn sort_by_distance_to_peak(peaks: &mut [Peak], fixed_q: &Vector3<f64>) {
    peaks.sort_by_key(|peak| OrderedFloat((peak.q - fixed_q).norm_squared()));
}

/// Sort by the smaller of the squared distances in Q to two fixed
/// positions, nearest first. Builds the local neighborhood around a seed
/// pair: nearby peaks are the most likely to belong to the same
/// crystallite as the seeds.
pub fn sort_by_min_distance_to_pair(
    peaks: &mut [Peak],
    first_q: &Vector3<f64>,
    second_q: &Vector3<f64>,
) {
    peaks.sort_by_key(|peak| {
        let d1 = (peak.q - first_q).norm_squared();
        let d2 = (peak.q - second_q).norm_squared();
        OrderedFloat(d1.min(d2))
    });
}

/// Size of the strong-peak subset for `total` peaks: the first fraction
/// in `fractions` whose subset reaches `min_count`, otherwise all of
/// them.
pub fn strong_subset_len(total: usize, min_count: usize, fractions: &[f64]) -> usize {
    for &fraction in fractions {
        let len = (total as f64 * fraction) as usize;
        if len >= min_count {
            return len.min(total);
        }
    }
    total
}

/// Whether two Q-vectors lie within `min_angle_deg` degrees of one line
/// through the origin (parallel or anti-parallel). Such a pair cannot
/// constrain all three rotation parameters.
pub fn nearly_collinear(first_q: &Vector3<f64>, second_q: &Vector3<f64>, min_angle_deg: f64) -> bool {
    let n1 = first_q.norm();
    let n2 = second_q.norm();
    if n1 == 0.0 || n2 == 0.0 {
        return true;
    }
    let threshold = min_angle_deg.to_radians().cos();
    (first_q.dot(second_q) / (n1 * n2)).abs() > threshold
}
