use itertools::Itertools;
use nalgebra::{Matrix3, Vector3};

use crate::algorithm::residual;

/// A Bragg peak reduced to reciprocal space.
///
/// # Arguments (fields)
///
/// * `q` - observed reciprocal-space position, 2 pi convention.
/// * `intensity` - observed intensity; used for priority ordering only,
///   never for geometry.
/// * `hkl` - assigned Miller index. `(0, 0, 0)` marks an unindexed peak;
///   once accepted it holds the nearest-integer index under the UB in
///   force at assignment time.
#[derive(Clone, Debug)]
pub struct Peak {
    pub q: Vector3<f64>,
    pub intensity: f64,
    pub hkl: Vector3<f64>,
}

impl Peak {
    pub fn new(q: Vector3<f64>, intensity: f64) -> Self {
        Peak { q, intensity, hkl: Vector3::zeros() }
    }

    /// Whether the peak carries an index assignment. The origin triple is
    /// the unindexed marker, so a (0,0,0) reflection is never reported as
    /// indexed.
    pub fn is_indexed(&self) -> bool {
        self.hkl != Vector3::zeros()
    }
}

/// Reset every assignment to the unindexed marker.
pub fn clear_assignments(peaks: &mut [Peak]) {
    for peak in peaks.iter_mut() {
        peak.hkl = Vector3::zeros();
    }
}

/// Write rounded Miller indices for peaks within `tolerance` of an
/// integer triple under `ub_inverse`, the unindexed marker for the rest.
/// Returns the number of peaks that received an index.
pub fn commit_assignments(peaks: &mut [Peak], ub_inverse: &Matrix3<f64>, tolerance: f64) -> usize {
    let mut indexed = 0;
    for peak in peaks.iter_mut() {
        let fractional = residual::fractional_hkl(&peak.q, ub_inverse);
        let rounded = fractional.map(|v| v.round());
        if residual::distance_to_nearest_integers(&fractional) < tolerance
            && rounded != Vector3::zeros()
        {
            peak.hkl = rounded;
            indexed += 1;
        } else {
            peak.hkl = Vector3::zeros();
        }
    }
    indexed
}

/// Positions of the peaks still carrying the unindexed marker.
pub fn unindexed_indices(peaks: &[Peak]) -> Vec<usize> {
    peaks.iter().positions(|peak| !peak.is_indexed()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_peaks() -> Vec<Peak> {
        vec![
            Peak::new(Vector3::new(1.98, 0.01, 0.0), 120.0),
            Peak::new(Vector3::new(0.0, 1.02, 1.0), 80.0),
            Peak::new(Vector3::new(0.37, 0.41, 0.52), 45.0),
        ]
    }

    #[test]
    fn test_commit_assigns_within_tolerance() {
        let mut peaks = sample_peaks();
        let identity = Matrix3::identity();

        let indexed = commit_assignments(&mut peaks, &identity, 0.1);
        assert_eq!(indexed, 2);
        assert_eq!(peaks[0].hkl, Vector3::new(2.0, 0.0, 0.0));
        assert_eq!(peaks[1].hkl, Vector3::new(0.0, 1.0, 1.0));
        assert!(!peaks[2].is_indexed());
        assert_eq!(unindexed_indices(&peaks), vec![2]);
    }

    #[test]
    fn test_clear_resets_assignments() {
        let mut peaks = sample_peaks();
        let identity = Matrix3::identity();
        commit_assignments(&mut peaks, &identity, 0.1);

        clear_assignments(&mut peaks);
        assert!(peaks.iter().all(|p| !p.is_indexed()));
        assert_eq!(unindexed_indices(&peaks).len(), 3);
    }

    #[test]
    fn test_origin_triple_stays_unindexed() {
        let mut peaks = vec![Peak::new(Vector3::new(0.02, -0.01, 0.0), 500.0)];
        let indexed = commit_assignments(&mut peaks, &Matrix3::identity(), 0.1);
        assert_eq!(indexed, 0);
        assert!(!peaks[0].is_indexed());
    }
}
