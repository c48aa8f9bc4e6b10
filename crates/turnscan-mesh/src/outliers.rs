//! Statistical outlier removal.
//!
//! A point's outlier score is the root mean square distance to its `k`
//! nearest neighbours. Points scoring above `threshold_factor × average
//! spacing` are removed. Passes repeat until one removes nothing or the pass
//! limit is reached.

use turnscan_core::OutlierRemovalConfig;

use crate::neighbors::{average_spacing, NeighborIndex};
use crate::point_set::PointSet;

/// What an outlier removal run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutlierReport {
    /// Points removed over all passes.
    pub removed: usize,
    /// Passes executed.
    pub passes: usize,
    /// True if the last pass removed nothing.
    pub converged: bool,
}

/// Removes outliers in place.
pub fn remove_outliers(points: &mut PointSet, config: &OutlierRemovalConfig) -> OutlierReport {
    let mut report = OutlierReport::default();

    while report.passes < config.max_passes {
        report.passes += 1;
        let removed = remove_pass(points, config.neighbors, config.threshold_factor);
        report.removed += removed;
        log::debug!("outlier pass {}: removed {removed} points", report.passes);
        if removed == 0 {
            report.converged = true;
            break;
        }
    }

    log::info!(
        "outlier removal: {} points removed in {} passes, {} left",
        report.removed,
        report.passes,
        points.len()
    );
    report
}

fn remove_pass(points: &mut PointSet, k: usize, threshold_factor: f32) -> usize {
    if points.len() <= k || k == 0 {
        return 0;
    }

    let index = NeighborIndex::build(&points.positions());
    let spacing = average_spacing(&index, k);
    let threshold = threshold_factor * spacing;
    if threshold <= 0.0 {
        return 0;
    }

    let keep: Vec<bool> = (0..index.len())
        .map(|i| outlier_score(&index, i, k) <= threshold)
        .collect();
    let removed = keep.iter().filter(|&&k| !k).count();
    if removed > 0 {
        points.retain_flagged(&keep);
    }
    removed
}

fn outlier_score(index: &NeighborIndex, i: usize, k: usize) -> f32 {
    let neighbors = index.neighbors_of(i, k);
    if neighbors.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = neighbors.iter().map(|n| n.distance * n.distance).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean_sq = sum_sq / neighbors.len() as f32;
    mean_sq.sqrt()
}
