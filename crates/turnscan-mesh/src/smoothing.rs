//! Edge-aware bilateral smoothing.
//!
//! Each point is projected along its normal towards the tangent planes of its
//! neighbours. A neighbour's weight falls off with distance and with the angle
//! between the normals, so points on either side of a sharp edge do not pull
//! each other across it.

use glam::Vec3;
use turnscan_core::SmoothingConfig;

use crate::neighbors::NeighborIndex;
use crate::point_set::PointSet;

/// Smooths an oriented point set in place.
///
/// Returns the mean displacement of the last iteration. A set without
/// normals is left unchanged.
pub fn smooth_points(points: &mut PointSet, config: &SmoothingConfig) -> f32 {
    if points.is_empty() {
        return 0.0;
    }
    if !points.has_normals() {
        log::warn!("smoothing skipped: point set has no normals");
        return 0.0;
    }

    let sharpness = 1.0 - config.sharpness_angle.to_radians().cos();
    let mut mean_move = 0.0;
    for iteration in 0..config.iterations {
        mean_move = smooth_once(points, config.neighbors.max(1), sharpness);
        log::debug!("smoothing iteration {}: mean move {mean_move}", iteration + 1);
    }
    log::info!(
        "smoothing: {} iterations over {} points",
        config.iterations,
        points.len()
    );
    mean_move
}

fn smooth_once(points: &mut PointSet, k: usize, sharpness: f32) -> f32 {
    let positions = points.positions();
    let normals: Vec<Vec3> = points
        .points()
        .iter()
        .map(|p| p.normal.unwrap_or(Vec3::ZERO))
        .collect();
    let index = NeighborIndex::build(&positions);

    let mut total_move = 0.0_f64;
    for (i, point) in points.points_mut().iter_mut().enumerate() {
        let neighbors = index.neighbors_of(i, k);
        let radius = neighbors.iter().map(|n| n.distance).fold(0.0, f32::max);
        if radius <= 0.0 {
            continue;
        }
        let p = positions[i];
        let n = normals[i];
        let inv_radius_sq = 4.0 / (radius * radius);

        let mut weight_sum = 0.0;
        let mut offset = 0.0;
        let mut normal_sum = Vec3::ZERO;
        for neighbor in &neighbors {
            let q = positions[neighbor.index];
            let m = normals[neighbor.index];
            let spatial = (-(neighbor.distance * neighbor.distance) * inv_radius_sq).exp();
            let angular = if sharpness > 0.0 {
                let deviation = (1.0 - n.dot(m)) / sharpness;
                (-deviation * deviation).exp()
            } else {
                1.0
            };
            let w = spatial * angular;
            weight_sum += w;
            offset += w * (p - q).dot(m);
            normal_sum += w * m;
        }
        if weight_sum <= f32::EPSILON {
            continue;
        }

        let moved = p - n * (offset / weight_sum);
        total_move += f64::from(moved.distance(p));
        point.position = moved;
        let smoothed = normal_sum.normalize_or_zero();
        if smoothed != Vec3::ZERO {
            point.normal = Some(smoothed);
        }
    }

    (total_move / positions.len() as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point_set::SurfacePoint;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noisy_plane(seed: u64) -> PointSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut points = Vec::new();
        for x in 0..30 {
            for z in 0..30 {
                let y = rng.gen_range(-0.01..0.01);
                let p = Vec3::new(x as f32 * 0.05, y, z as f32 * 0.05);
                points.push(SurfacePoint::new(p, [0; 3]).with_normal(Vec3::Y));
            }
        }
        PointSet::from_points(points)
    }

    fn height_variance(points: &PointSet) -> f32 {
        let n = points.len() as f32;
        let mean = points.points().iter().map(|p| p.position.y).sum::<f32>() / n;
        points
            .points()
            .iter()
            .map(|p| (p.position.y - mean).powi(2))
            .sum::<f32>()
            / n
    }

    #[test]
    fn test_noisy_plane_gets_flatter() {
        let mut points = noisy_plane(5);
        let before = height_variance(&points);
        let moved = smooth_points(&mut points, &SmoothingConfig::default());
        let after = height_variance(&points);

        assert!(moved > 0.0);
        assert!(after < before * 0.5, "variance {before} -> {after}");
        // Motion is along the normal only
        for (i, p) in points.points().iter().enumerate() {
            assert!((p.position.x - (i / 30) as f32 * 0.05).abs() < 1e-6);
            assert!((p.position.z - (i % 30) as f32 * 0.05).abs() < 1e-6);
        }
    }

    #[test]
    fn test_points_without_normals_are_untouched() {
        let points_with: Vec<SurfacePoint> = noisy_plane(6)
            .into_points()
            .into_iter()
            .map(|mut p| {
                p.normal = None;
                p
            })
            .collect();
        let mut points = PointSet::from_points(points_with);
        let before = points.clone();
        assert_eq!(smooth_points(&mut points, &SmoothingConfig::default()), 0.0);
        assert_eq!(points, before);
    }

    #[test]
    fn test_sharp_edge_is_preserved() {
        // Two perpendicular faces meeting along the z axis
        let mut points = Vec::new();
        for a in 1..15 {
            for z in 0..15 {
                let s = a as f32 * 0.05;
                let z = z as f32 * 0.05;
                points.push(SurfacePoint::new(Vec3::new(s, 0.0, z), [0; 3]).with_normal(Vec3::Y));
                points.push(SurfacePoint::new(Vec3::new(0.0, s, z), [0; 3]).with_normal(Vec3::X));
            }
        }
        let mut points = PointSet::from_points(points);
        smooth_points(&mut points, &SmoothingConfig::default());

        // Perpendicular neighbours carry almost no weight, so faces stay flat
        for p in points.points() {
            let n = p.normal.unwrap();
            if n.dot(Vec3::Y) > 0.99 {
                assert!(p.position.y.abs() < 1e-3, "{:?}", p.position);
            } else {
                assert!(p.position.x.abs() < 1e-3, "{:?}", p.position);
            }
        }
    }
}
