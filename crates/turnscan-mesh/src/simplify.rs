//! Point set simplification.
//!
//! Grid simplification keeps the first point that falls into each cell of a
//! regular grid. Hierarchical simplification splits the set recursively
//! through the centroid along the principal axis until every cluster is small
//! and flat enough, then keeps the member nearest each cluster's centroid.

use std::collections::HashSet;

use glam::Vec3;
use turnscan_core::{GridSimplificationConfig, HierarchySimplificationConfig};

use crate::pca::LocalFrame;
use crate::point_set::PointSet;

/// Keeps one point per grid cell, preserving input order.
pub fn grid_simplify(points: &mut PointSet, config: &GridSimplificationConfig) -> usize {
    if config.cell_size <= 0.0 {
        return 0;
    }
    let inv = 1.0 / config.cell_size;
    let mut occupied: HashSet<(i64, i64, i64)> = HashSet::with_capacity(points.len());

    let keep: Vec<bool> = points
        .points()
        .iter()
        .map(|p| occupied.insert(cell_of(p.position, inv)))
        .collect();

    let before = points.len();
    points.retain_flagged(&keep);
    let removed = before - points.len();
    log::info!(
        "grid simplification: {removed} points removed, {} left",
        points.len()
    );
    removed
}

#[allow(clippy::cast_possible_truncation)]
fn cell_of(p: Vec3, inv_cell: f32) -> (i64, i64, i64) {
    let c = (p * inv_cell).floor();
    (c.x as i64, c.y as i64, c.z as i64)
}

/// Replaces the set by one representative per cluster.
pub fn hierarchy_simplify(points: &mut PointSet, config: &HierarchySimplificationConfig) -> usize {
    let before = points.len();
    if before <= 1 {
        return 0;
    }

    let positions = points.positions();
    let max_size = config.max_cluster_size.max(1);
    let mut representatives = Vec::new();
    let mut stack: Vec<Vec<usize>> = vec![(0..positions.len()).collect()];

    while let Some(cluster) = stack.pop() {
        if cluster.len() == 1 {
            representatives.push(cluster[0]);
            continue;
        }

        let members: Vec<Vec3> = cluster.iter().map(|&i| positions[i]).collect();
        let Some(frame) = LocalFrame::fit(&members) else {
            representatives.push(cluster[0]);
            continue;
        };

        let needs_split = cluster.len() > max_size
            || frame.surface_variation() > config.max_surface_variation;
        if needs_split {
            let (negative, positive): (Vec<usize>, Vec<usize>) = cluster
                .iter()
                .copied()
                .partition(|&i| (positions[i] - frame.centroid).dot(frame.major_axis) < 0.0);
            // All members on one side means they coincide along the axis
            if !negative.is_empty() && !positive.is_empty() {
                stack.push(negative);
                stack.push(positive);
                continue;
            }
        }

        representatives.push(nearest_to(&cluster, &positions, frame.centroid));
    }

    representatives.sort_unstable();
    *points = points.select(&representatives);
    let removed = before - points.len();
    log::info!(
        "hierarchical simplification: {removed} points removed, {} left",
        points.len()
    );
    removed
}

fn nearest_to(cluster: &[usize], positions: &[Vec3], target: Vec3) -> usize {
    cluster
        .iter()
        .copied()
        .min_by(|&a, &b| {
            positions[a]
                .distance_squared(target)
                .total_cmp(&positions[b].distance_squared(target))
        })
        .unwrap_or(cluster[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point_set::SurfacePoint;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn set(positions: &[Vec3]) -> PointSet {
        PointSet::from_points(positions.iter().map(|&p| SurfacePoint::new(p, [0; 3])).collect())
    }

    #[test]
    fn test_grid_keeps_first_per_cell() {
        let mut points = set(&[
            Vec3::new(0.0001, 0.0001, 0.0001),
            Vec3::new(0.0015, 0.0005, 0.0),
            Vec3::new(0.0025, 0.0, 0.0),
            Vec3::new(-0.0005, 0.0, 0.0),
        ]);
        let removed = grid_simplify(
            &mut points,
            &GridSimplificationConfig {
                enabled: true,
                cell_size: 0.002,
            },
        );
        assert_eq!(removed, 1);
        assert_eq!(
            points.positions(),
            vec![
                Vec3::new(0.0001, 0.0001, 0.0001),
                Vec3::new(0.0025, 0.0, 0.0),
                Vec3::new(-0.0005, 0.0, 0.0),
            ]
        );
    }

    #[test]
    fn test_hierarchy_respects_cluster_size() {
        let mut rng = StdRng::seed_from_u64(11);
        let positions: Vec<Vec3> = (0..2000)
            .map(|_| Vec3::new(rng.gen_range(0.0..1.0), 0.0, rng.gen_range(0.0..1.0)))
            .collect();
        let mut points = set(&positions);
        let config = HierarchySimplificationConfig {
            enabled: true,
            max_cluster_size: 50,
            max_surface_variation: 1.0,
        };
        hierarchy_simplify(&mut points, &config);

        // Every cluster has at most 50 members, so at least 40 survive
        assert!(points.len() >= 40, "{} points", points.len());
        assert!(points.len() < 2000 / 10);
        for p in points.points() {
            assert!(positions.contains(&p.position));
        }
    }

    #[test]
    fn test_hierarchy_splits_curved_regions() {
        let mut rng = StdRng::seed_from_u64(12);
        let sphere: Vec<Vec3> = (0..3000)
            .map(|_| {
                Vec3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
                .normalize_or(Vec3::X)
            })
            .collect();

        let loose = HierarchySimplificationConfig {
            enabled: true,
            max_cluster_size: 1000,
            max_surface_variation: 1.0,
        };
        let strict = HierarchySimplificationConfig {
            max_surface_variation: 0.001,
            ..loose.clone()
        };

        let mut a = set(&sphere);
        let mut b = set(&sphere);
        hierarchy_simplify(&mut a, &loose);
        hierarchy_simplify(&mut b, &strict);
        assert!(b.len() > a.len());
    }

    #[test]
    fn test_coincident_points_collapse() {
        let mut points = set(&[Vec3::ONE; 300]);
        let config = HierarchySimplificationConfig::default();
        hierarchy_simplify(&mut points, &config);
        assert_eq!(points.len(), 1);
    }
}
