//! k-nearest-neighbour queries over a point set.
//!
//! Backed by a `kiddo` k-d tree. Scanner data is quantized in depth, so many
//! points can share a coordinate value; the tree stores each point with a
//! tiny deterministic offset to keep its buckets splittable, and reported
//! distances are recomputed from the exact positions.

use glam::Vec3;
use kiddo::{KdTree, SquaredEuclidean};

/// Relative size of the offset applied to tree coordinates. Sets within the
/// unit cube use the unit scale, so coincident points at the origin spread too.
const JITTER_SCALE: f32 = 1e-5;

/// One neighbour of a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the neighbour in the indexed point list.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f32,
}

/// Spatial index over a fixed list of positions.
pub struct NeighborIndex {
    tree: KdTree<f32, 3>,
    positions: Vec<Vec3>,
    jitter: f32,
}

impl NeighborIndex {
    /// Builds an index over `positions`.
    pub fn build(positions: &[Vec3]) -> Self {
        let jitter = magnitude(positions).max(1.0) * JITTER_SCALE;
        let mut tree: KdTree<f32, 3> = KdTree::new();
        for (i, &p) in positions.iter().enumerate() {
            tree.add(&jittered(p, i, jitter), i as u64);
        }
        Self {
            tree,
            positions: positions.to_vec(),
            jitter,
        }
    }

    /// Returns the number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the indexed positions.
    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Returns up to `k` nearest points to `query`, closest first.
    pub fn nearest(&self, query: Vec3, k: usize) -> Vec<Neighbor> {
        if self.positions.is_empty() || k == 0 {
            return Vec::new();
        }
        let q = [query.x, query.y, query.z];
        let mut found: Vec<Neighbor> = self
            .tree
            .nearest_n::<SquaredEuclidean>(&q, k)
            .into_iter()
            .map(|n| {
                #[allow(clippy::cast_possible_truncation)]
                let index = n.item as usize;
                Neighbor {
                    index,
                    distance: self.positions[index].distance(query),
                }
            })
            .collect();
        found.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        found
    }

    /// Returns the nearest indexed point to `query`.
    pub fn nearest_one(&self, query: Vec3) -> Option<Neighbor> {
        if self.positions.is_empty() {
            return None;
        }
        let q = [query.x, query.y, query.z];
        let n = self.tree.nearest_one::<SquaredEuclidean>(&q);
        #[allow(clippy::cast_possible_truncation)]
        let index = n.item as usize;
        Some(Neighbor {
            index,
            distance: self.positions[index].distance(query),
        })
    }

    /// Returns up to `k` nearest neighbours of indexed point `i`, excluding itself.
    pub fn neighbors_of(&self, i: usize, k: usize) -> Vec<Neighbor> {
        let mut found = self.nearest(self.positions[i], k + 1);
        found.retain(|n| n.index != i);
        found.truncate(k);
        found
    }

    /// Returns the offset scale used for tree coordinates.
    #[must_use]
    pub fn jitter(&self) -> f32 {
        self.jitter
    }
}

/// Average over all points of the mean distance to their `k` nearest neighbours.
///
/// Returns 0 for fewer than two points.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn average_spacing(index: &NeighborIndex, k: usize) -> f32 {
    if index.len() < 2 || k == 0 {
        return 0.0;
    }
    let total: f64 = (0..index.len())
        .map(|i| {
            let neighbors = index.neighbors_of(i, k);
            if neighbors.is_empty() {
                return 0.0;
            }
            let sum: f64 = neighbors.iter().map(|n| f64::from(n.distance)).sum();
            sum / neighbors.len() as f64
        })
        .sum();
    (total / index.len() as f64) as f32
}

/// Largest absolute coordinate, which bounds both the extent and the float spacing.
fn magnitude(positions: &[Vec3]) -> f32 {
    positions
        .iter()
        .map(|p| p.abs().max_element())
        .filter(|m| m.is_finite())
        .fold(0.0, f32::max)
}

/// Offsets a position by a hash of its bits and index, so equal coordinates spread out.
fn jittered(p: Vec3, index: usize, scale: f32) -> [f32; 3] {
    let seed = (u64::from(p.x.to_bits()) << 32)
        ^ (u64::from(p.y.to_bits()) << 16)
        ^ u64::from(p.z.to_bits())
        ^ (index as u64).wrapping_mul(0x2545_F491_4F6C_DD1D);
    let mut out = [p.x, p.y, p.z];
    for (axis, value) in out.iter_mut().enumerate() {
        let h = splitmix64(seed.wrapping_add(axis as u64));
        #[allow(clippy::cast_precision_loss)]
        let unit = (h >> 11) as f32 / (1_u64 << 53) as f32;
        *value += (unit - 0.5) * scale;
    }
    out
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_is_sorted_and_exact() {
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(0.0, 0.0, 3.0),
        ];
        let index = NeighborIndex::build(&positions);
        let found = index.nearest(Vec3::ZERO, 3);

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].index, 0);
        assert_eq!(found[1].index, 1);
        assert_eq!(found[2].index, 2);
        assert!((found[2].distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_neighbors_exclude_self() {
        let positions: Vec<Vec3> = (0..10).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
        let index = NeighborIndex::build(&positions);
        let found = index.neighbors_of(5, 2);
        let mut indices: Vec<usize> = found.iter().map(|n| n.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![4, 6]);
    }

    #[test]
    fn test_many_equal_coordinates() {
        // A flat depth layer: every point shares z
        let mut positions = Vec::new();
        for x in 0..40 {
            for y in 0..40 {
                positions.push(Vec3::new(x as f32 * 0.01, y as f32 * 0.01, 1.0));
            }
        }
        let index = NeighborIndex::build(&positions);
        assert_eq!(index.len(), 1600);
        let spacing = average_spacing(&index, 4);
        // Border points reach diagonal neighbours, so the mean sits just above the pitch
        assert!(spacing > 0.01 - 1e-5 && spacing < 0.0105, "spacing {spacing}");
    }

    #[test]
    fn test_duplicate_points() {
        let positions = vec![Vec3::new(0.5, 0.5, 1.0); 100];
        let index = NeighborIndex::build(&positions);
        assert_eq!(index.nearest(Vec3::ZERO, 5).len(), 5);
        assert_eq!(average_spacing(&index, 3), 0.0);
    }

    #[test]
    fn test_coincident_points_at_origin() {
        let positions = vec![Vec3::ZERO; 300];
        let index = NeighborIndex::build(&positions);
        assert!(index.jitter() > 0.0);

        let found = index.neighbors_of(7, 10);
        assert_eq!(found.len(), 10);
        assert!(found.iter().all(|n| n.distance == 0.0 && n.index != 7));
        assert_eq!(average_spacing(&index, 6), 0.0);
    }

    #[test]
    fn test_average_spacing_degenerate() {
        assert_eq!(average_spacing(&NeighborIndex::build(&[]), 6), 0.0);
        assert_eq!(average_spacing(&NeighborIndex::build(&[Vec3::ONE]), 6), 0.0);
        assert!(NeighborIndex::build(&[]).nearest_one(Vec3::ZERO).is_none());
    }
}
