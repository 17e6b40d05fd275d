//! End-to-end auto-indexing.
//!
//! The controller walks three phases. SEEDING fits candidate
//! orientations to a pair of strong peaks and validates each candidate
//! against the peaks nearest that pair. EXPANDING re-fits the accepted
//! orientation on a growing subset of the strong peaks, nearest first.
//! The final global rounds re-fit against every peak and commit integer
//! Miller triples to the ones that index.

use log::{debug, info, warn};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::algorithm::search::SearchConfig;
use crate::algorithm::{classify, refine, search};
use crate::data::lattice::LatticeConstants;
use crate::data::orientation::Orientation;
use crate::data::peak::{self, Peak};

/// Settings for the indexing controller.
///
/// # Arguments
///
/// * `tolerance` - maximum distance to the nearest integer triple for a
///   peak to count as indexed
/// * `required_fraction` - fraction of the neighbor window that must
///   index for a candidate orientation to be accepted
/// * `max_attempts` - total bootstrap budget across all seed pairs
/// * `retries_per_pair` - bootstrap attempts per seed pair
/// * `num_neighbors` - size of the validation window around a seed pair
/// * `min_strong_peaks` - smallest useful strong-peak subset
/// * `subset_fractions` - candidate strong-subset sizes as fractions of
///   the peak list, tried smallest first
/// * `growth_fraction` - per-round growth of the expanding subset
/// * `global_rounds` - refinement rounds over the whole peak list
/// * `min_seed_angle` - minimum angle in degrees between seed Q-vectors
/// * `seed` - fixed RNG seed, or `None` to draw one from the system
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IndexConfig {
    pub tolerance: f64,
    pub required_fraction: f64,
    pub max_attempts: usize,
    pub retries_per_pair: usize,
    pub num_neighbors: usize,
    pub min_strong_peaks: usize,
    pub subset_fractions: Vec<f64>,
    pub growth_fraction: f64,
    pub global_rounds: usize,
    pub min_seed_angle: f64,
    pub search: SearchConfig,
    pub seed: Option<u64>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            tolerance: 0.12,
            required_fraction: 0.4,
            max_attempts: 25,
            retries_per_pair: 3,
            num_neighbors: 20,
            min_strong_peaks: 50,
            subset_fractions: vec![0.01, 0.02, 0.05, 0.1, 0.5],
            growth_fraction: 0.2,
            global_rounds: 5,
            min_seed_angle: 3.0,
            search: SearchConfig::default(),
            seed: None,
        }
    }
}

impl IndexConfig {
    /// Tighter acceptance for clean, well-centered peak lists.
    pub fn strict() -> Self {
        IndexConfig {
            tolerance: 0.10,
            ..IndexConfig::default()
        }
    }

    /// Looser acceptance for noisy or poorly centered peak lists.
    pub fn loose() -> Self {
        IndexConfig {
            tolerance: 0.15,
            ..IndexConfig::default()
        }
    }
}

/// Terminal state of an indexing run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexStatus {
    /// An orientation was accepted, refined and committed.
    Indexed,
    /// No candidate orientation passed neighbor validation, or no seed
    /// pair with usable geometry could be drawn.
    AttemptBudgetExhausted,
    /// Refinement hit a rank-deficient or empty inlier set.
    SingularRefit,
    /// Fewer than two peaks were supplied.
    TooFewPeaks,
    /// The unit cell has no valid reciprocal basis.
    InvalidCell,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::Indexed => write!(f, "indexed"),
            IndexStatus::AttemptBudgetExhausted => write!(f, "attempt budget exhausted"),
            IndexStatus::SingularRefit => write!(f, "singular refit"),
            IndexStatus::TooFewPeaks => write!(f, "too few peaks"),
            IndexStatus::InvalidCell => write!(f, "invalid cell"),
        }
    }
}

/// One bootstrap attempt during the seeding phase.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct AttemptRecord {
    /// position of the first seed in the strong list, always 0
    pub first_seed: usize,
    /// position of the second seed in the strong list
    pub second_seed: usize,
    /// best squared offset sum over the rotation restarts
    pub chi_square: f64,
    /// neighbors indexed by the candidate orientation
    pub num_indexed: usize,
    /// size of the validation window
    pub num_neighbors: usize,
    pub accepted: bool,
}

/// Everything an indexing run produced.
///
/// The Miller table and the unindexed index list are only populated when
/// `status` is [`IndexStatus::Indexed`]; the attempt log is kept in every
/// case.
#[derive(Clone, Debug)]
pub struct IndexOutcome {
    pub status: IndexStatus,
    pub orientation: Option<Orientation>,
    /// committed Miller triple per input peak, the origin for unindexed ones
    pub hkl: Vec<Vector3<f64>>,
    pub num_indexed: usize,
    /// positions of the peaks left unindexed
    pub unindexed: Vec<usize>,
    pub attempts: Vec<AttemptRecord>,
    pub tolerance: f64,
}

impl IndexOutcome {
    fn failure(status: IndexStatus, attempts: Vec<AttemptRecord>, tolerance: f64) -> Self {
        IndexOutcome {
            status,
            orientation: None,
            hkl: Vec::new(),
            num_indexed: 0,
            unindexed: Vec::new(),
            attempts,
            tolerance,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.status == IndexStatus::Indexed
    }
}

/// Index a peak list against known unit cell constants.
///
/// Clears any previous assignments, then runs the seeding, expanding and
/// global phases. On success the integer Miller triples are written back
/// into `peaks` and reported in the outcome.
///
/// # Arguments
///
/// * `peaks` - measured peaks, Q-vectors in inverse Angstrom
/// * `lattice` - unit cell constants of the crystal
/// * `config` - controller settings
pub fn auto_index(
    peaks: &mut [Peak],
    lattice: &LatticeConstants,
    config: &IndexConfig,
) -> IndexOutcome {
    peak::clear_assignments(peaks);

    if peaks.len() < 2 {
        return IndexOutcome::failure(IndexStatus::TooFewPeaks, Vec::new(), config.tolerance);
    }
    if lattice.b_matrix().is_none() {
        return IndexOutcome::failure(IndexStatus::InvalidCell, Vec::new(), config.tolerance);
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    // most intense first, truncated to the strong subset
    let mut strong: Vec<Peak> = peaks.to_vec();
    classify::sort_by_intensity_descending(&mut strong);
    let keep = classify::strong_subset_len(
        strong.len(),
        config.min_strong_peaks,
        &config.subset_fractions,
    );
    // keep at least a seed pair
    strong.truncate(keep.max(2));

    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut validated: Option<(Orientation, Vec<Peak>)> = None;
    let mut redraws = 0usize;

    'seeding: while attempts.len() < config.max_attempts {
        let second = rng.gen_range(1..strong.len());
        let first_q = strong[0].q;
        let second_q = strong[second].q;
        if classify::nearly_collinear(&first_q, &second_q, config.min_seed_angle) {
            warn!("seed pair 0/{} is nearly collinear, redrawing", second);
            redraws += 1;
            if redraws > 4 * config.max_attempts {
                warn!("no seed pair with usable geometry after {} redraws", redraws);
                break 'seeding;
            }
            continue;
        }
        let seeds = [first_q, second_q];

        let mut neighborhood = strong.clone();
        classify::sort_by_min_distance_to_pair(&mut neighborhood, &first_q, &second_q);
        // the first two entries are the seeds themselves
        let window_end = (2 + config.num_neighbors).min(neighborhood.len());
        let neighbors = &neighborhood[2..window_end];

        for _retry in 0..config.retries_per_pair {
            if attempts.len() >= config.max_attempts {
                break 'seeding;
            }
            let Some(outcome) =
                search::bootstrap_orientation(&seeds, lattice, &config.search, &mut rng)
            else {
                attempts.push(AttemptRecord {
                    first_seed: 0,
                    second_seed: second,
                    chi_square: f64::INFINITY,
                    num_indexed: 0,
                    num_neighbors: neighbors.len(),
                    accepted: false,
                });
                continue;
            };

            let num_indexed =
                classify::count_indexed(neighbors, &outcome.orientation.ub_inverse, config.tolerance);
            let accepted =
                num_indexed as f64 >= config.required_fraction * neighbors.len() as f64;
            debug!(
                "seed pair 0/{}: chi2 {:.3e}, {} of {} neighbors indexed",
                second,
                outcome.chi_square,
                num_indexed,
                neighbors.len()
            );
            attempts.push(AttemptRecord {
                first_seed: 0,
                second_seed: second,
                chi_square: outcome.chi_square,
                num_indexed,
                num_neighbors: neighbors.len(),
                accepted,
            });
            if accepted {
                validated = Some((outcome.orientation, neighborhood.clone()));
                break 'seeding;
            }
        }
        warn!(
            "seed pair 0/{} rejected after {} bootstrap attempts",
            second, config.retries_per_pair
        );
    }

    let Some((mut current, strong)) = validated else {
        return IndexOutcome::failure(IndexStatus::AttemptBudgetExhausted, attempts, config.tolerance);
    };

    // grow the fit subset outward from the seeds
    let mut subset_len = config.num_neighbors.min(strong.len());
    loop {
        match refine::refine_orientation(&strong[..subset_len], &current.ub_inverse, config.tolerance)
        {
            Ok(refinement) => current = refinement.orientation,
            Err(err) => {
                warn!("refinement over {} strong peaks failed: {}", subset_len, err);
                return IndexOutcome::failure(IndexStatus::SingularRefit, attempts, config.tolerance);
            }
        }
        if subset_len == strong.len() {
            break;
        }
        let grow = ((subset_len as f64 * config.growth_fraction) as usize).max(1);
        subset_len = (subset_len + grow).min(strong.len());
    }

    for round in 0..config.global_rounds {
        match refine::refine_orientation(peaks, &current.ub_inverse, config.tolerance) {
            Ok(refinement) => {
                debug!(
                    "global round {}: {} inliers, fit residual {:.3e}",
                    round, refinement.num_inliers, refinement.fit_residual
                );
                current = refinement.orientation;
            }
            Err(err) => {
                warn!("global refinement failed: {}", err);
                return IndexOutcome::failure(IndexStatus::SingularRefit, attempts, config.tolerance);
            }
        }
    }

    let num_indexed = peak::commit_assignments(peaks, &current.ub_inverse, config.tolerance);
    let unindexed = peak::unindexed_indices(peaks);
    let hkl: Vec<Vector3<f64>> = peaks.iter().map(|p| p.hkl).collect();

    if let Some(cell) = current.lattice_parameters() {
        info!(
            "indexed {} of {} peaks; cell {:.4} {:.4} {:.4} / {:.2} {:.2} {:.2}",
            num_indexed,
            peaks.len(),
            cell[0],
            cell[1],
            cell[2],
            cell[3],
            cell[4],
            cell[5]
        );
    }

    IndexOutcome {
        status: IndexStatus::Indexed,
        orientation: Some(current),
        hkl,
        num_indexed,
        unindexed,
        attempts,
        tolerance: config.tolerance,
    }
}
