use std::fs::File;
use std::io::{BufReader, BufWriter};

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::algorithm::index::{AttemptRecord, IndexOutcome};
use crate::data::lattice::LatticeConstants;
use crate::data::peak::Peak;

pub const REPORT_VERSION: u32 = 1;

/// One peak flattened for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakRow {
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub intensity: f64,
    pub h: f64,
    pub k: f64,
    pub l: f64,
    pub indexed: bool,
}

impl From<&Peak> for PeakRow {
    fn from(peak: &Peak) -> Self {
        PeakRow {
            qx: peak.q.x,
            qy: peak.q.y,
            qz: peak.q.z,
            intensity: peak.intensity,
            h: peak.hkl.x,
            k: peak.hkl.y,
            l: peak.hkl.z,
            indexed: peak.is_indexed(),
        }
    }
}

impl PeakRow {
    pub fn to_peak(&self) -> Peak {
        Peak {
            q: Vector3::new(self.qx, self.qy, self.qz),
            intensity: self.intensity,
            hkl: Vector3::new(self.h, self.k, self.l),
        }
    }
}

/// Full record of a successful indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingReport {
    pub version: u32,
    pub lattice: LatticeConstants,
    pub tolerance: f64,
    pub ub: [[f64; 3]; 3],
    pub ub_inverse: [[f64; 3]; 3],
    pub num_indexed: usize,
    pub unindexed: Vec<usize>,
    pub attempts: Vec<AttemptRecord>,
    pub peaks: Vec<PeakRow>,
}

impl IndexingReport {
    /// Build a report from a finished run. Returns `None` when the run
    /// did not end in an indexed state, since there is no orientation to
    /// record.
    pub fn from_outcome(
        outcome: &IndexOutcome,
        lattice: &LatticeConstants,
        peaks: &[Peak],
    ) -> Option<Self> {
        if !outcome.is_indexed() {
            return None;
        }
        let orientation = outcome.orientation.as_ref()?;
        Some(IndexingReport {
            version: REPORT_VERSION,
            lattice: *lattice,
            tolerance: outcome.tolerance,
            ub: matrix_rows(&orientation.ub),
            ub_inverse: matrix_rows(&orientation.ub_inverse),
            num_indexed: outcome.num_indexed,
            unindexed: outcome.unindexed.clone(),
            attempts: outcome.attempts.clone(),
            peaks: peaks.iter().map(PeakRow::from).collect(),
        })
    }
}

fn matrix_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

// --- JSON (human-readable) ---
pub fn save_json(path: &str, report: &IndexingReport) -> std::io::Result<()> {
    let f = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(f, report)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

pub fn load_json(path: &str) -> std::io::Result<IndexingReport> {
    let f = BufReader::new(File::open(path)?);
    serde_json::from_reader(f).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

pub fn save_peaks_json(path: &str, peaks: &[Peak]) -> std::io::Result<()> {
    let rows: Vec<PeakRow> = peaks.iter().map(PeakRow::from).collect();
    let f = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(f, &rows)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

pub fn load_peaks_json(path: &str) -> std::io::Result<Vec<Peak>> {
    let f = BufReader::new(File::open(path)?);
    let rows: Vec<PeakRow> = serde_json::from_reader(f)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(rows.iter().map(|r| r.to_peak()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::index::IndexStatus;
    use crate::data::orientation::{ub_from_angles, Orientation};

    fn sample_run() -> (LatticeConstants, IndexOutcome, Vec<Peak>) {
        let lattice = LatticeConstants::quartz();
        let b = lattice.b_matrix().unwrap();
        let ub = ub_from_angles(&b, 10.0, 20.0, 30.0);
        let orientation = Orientation::from_ub(ub).unwrap();

        let triples = [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 1.0),
            Vector3::new(1.0, -1.0, 2.0),
        ];
        let mut peaks: Vec<Peak> = triples
            .iter()
            .map(|hkl| Peak {
                q: ub * hkl,
                intensity: 42.0,
                hkl: *hkl,
            })
            .collect();
        peaks.push(Peak::new(Vector3::new(0.11, 0.22, 0.33), 1.5));

        let outcome = IndexOutcome {
            status: IndexStatus::Indexed,
            orientation: Some(orientation),
            hkl: peaks.iter().map(|p| p.hkl).collect(),
            num_indexed: 3,
            unindexed: vec![3],
            attempts: vec![AttemptRecord {
                first_seed: 0,
                second_seed: 2,
                chi_square: 1.2e-14,
                num_indexed: 3,
                num_neighbors: 3,
                accepted: true,
            }],
            tolerance: 0.12,
        };
        (lattice, outcome, peaks)
    }

    #[test]
    fn test_report_round_trip() {
        let (lattice, outcome, peaks) = sample_run();
        let report = IndexingReport::from_outcome(&outcome, &lattice, &peaks).unwrap();

        let path = std::env::temp_dir().join("scdindex_report_round_trip.json");
        let path = path.to_str().unwrap();
        save_json(path, &report).unwrap();
        let loaded = load_json(path).unwrap();

        assert_eq!(loaded.version, REPORT_VERSION);
        assert_eq!(loaded.lattice, lattice);
        assert_eq!(loaded.tolerance, 0.12);
        assert_eq!(loaded.ub, report.ub);
        assert_eq!(loaded.num_indexed, 3);
        assert_eq!(loaded.unindexed, vec![3]);
        assert_eq!(loaded.attempts.len(), 1);
        assert!(loaded.attempts[0].accepted);
        assert_eq!(loaded.peaks.len(), peaks.len());
        assert!(loaded.peaks[0].indexed);
        assert!(!loaded.peaks[3].indexed);
    }

    #[test]
    fn test_report_requires_an_indexed_outcome() {
        let (lattice, outcome, peaks) = sample_run();
        let failed = IndexOutcome {
            status: IndexStatus::AttemptBudgetExhausted,
            orientation: None,
            hkl: Vec::new(),
            num_indexed: 0,
            unindexed: Vec::new(),
            attempts: outcome.attempts.clone(),
            tolerance: outcome.tolerance,
        };
        assert!(IndexingReport::from_outcome(&failed, &lattice, &peaks).is_none());
    }

    #[test]
    fn test_peaks_round_trip() {
        let (_, _, peaks) = sample_run();
        let path = std::env::temp_dir().join("scdindex_peaks_round_trip.json");
        let path = path.to_str().unwrap();

        save_peaks_json(path, &peaks).unwrap();
        let loaded = load_peaks_json(path).unwrap();

        assert_eq!(loaded.len(), peaks.len());
        for (a, b) in peaks.iter().zip(loaded.iter()) {
            assert_eq!(a.q, b.q);
            assert_eq!(a.intensity, b.intensity);
            assert_eq!(a.hkl, b.hkl);
        }
    }

    #[test]
    fn test_round_trip_preserves_full_float_precision() {
        // the writer emits the shortest digits that identify each value;
        // the reader must take them back to the identical bits
        let peaks = vec![Peak::new(
            Vector3::new(0.19879150610565002, -0.30901699437494745, 2.4674011002723395),
            0.30000000000000004,
        )];
        let path = std::env::temp_dir().join("scdindex_precision_round_trip.json");
        let path = path.to_str().unwrap();

        save_peaks_json(path, &peaks).unwrap();
        let loaded = load_peaks_json(path).unwrap();
        assert_eq!(loaded[0].q, peaks[0].q);
        assert_eq!(loaded[0].intensity, peaks[0].intensity);
    }
}
