use std::env;
use std::path::{Path, PathBuf};

use nalgebra::Vector3;

use scdindex::algorithm::index::{auto_index, IndexConfig};
use scdindex::data::lattice::LatticeConstants;
use scdindex::data::orientation::ub_from_angles;
use scdindex::data::peak::Peak;
use scdindex::io::report::{self, IndexingReport};

/// Peaks of a quartz crystal in a fixed orientation, strongest at low Q.
fn synthetic_quartz_peaks(lattice: &LatticeConstants) -> Vec<Peak> {
    let b = lattice.b_matrix().unwrap();
    let ub = ub_from_angles(&b, 31.0, 47.0, 112.0);
    let mut peaks = Vec::new();
    for h in -2..=2 {
        for k in -2..=2 {
            for l in -2..=2 {
                if h == 0 && k == 0 && l == 0 {
                    continue;
                }
                let q = ub * Vector3::new(h as f64, k as f64, l as f64);
                peaks.push(Peak::new(q, 1000.0 / (1.0 + q.norm_squared())));
            }
        }
    }
    peaks
}

/// Where the report lands: next to the input peak list, or in the temp
/// directory for the synthetic scenario.
fn report_path(input: Option<&str>) -> PathBuf {
    match input {
        Some(input) => Path::new(input).with_extension("report.json"),
        None => env::temp_dir().join("scdindex_report.json"),
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    let lattice = LatticeConstants::quartz();
    let mut peaks = if args.len() > 1 {
        report::load_peaks_json(&args[1]).unwrap()
    } else {
        synthetic_quartz_peaks(&lattice)
    };

    let config = IndexConfig {
        seed: Some(1),
        ..IndexConfig::default()
    };
    let outcome = auto_index(&mut peaks, &lattice, &config);

    println!("status: {}", outcome.status);
    println!(
        "indexed {} of {} peaks in {} attempts",
        outcome.num_indexed,
        peaks.len(),
        outcome.attempts.len()
    );
    if let Some(orientation) = outcome.orientation {
        if let Some(cell) = orientation.lattice_parameters() {
            println!(
                "cell: a {:.4}  b {:.4}  c {:.4}  alpha {:.2}  beta {:.2}  gamma {:.2}  volume {:.2}",
                cell[0], cell[1], cell[2], cell[3], cell[4], cell[5], cell[6]
            );
        }
    }

    if let Some(written) = IndexingReport::from_outcome(&outcome, &lattice, &peaks) {
        let path = report_path(args.get(1).map(String::as_str));
        let path = path.to_str().unwrap();
        report::save_json(path, &written).unwrap();
        println!("report written to {}", path);
    }
}
