//! Normal estimation and orientation.
//!
//! Normals come from a plane fit over each point's neighbourhood. Their sign
//! is then made consistent by walking a minimum spanning tree of the
//! neighbourhood graph, where an edge is cheap when the two normals are close
//! to parallel. The walk starts at the highest point (largest `y`), whose
//! normal is oriented towards `+y`. Points the walk never reaches are removed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::Vec3;
use turnscan_core::NormalEstimationConfig;

use crate::neighbors::NeighborIndex;
use crate::pca::LocalFrame;
use crate::point_set::PointSet;

/// What a normal estimation run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalReport {
    /// Points that received an oriented normal.
    pub oriented: usize,
    /// Points removed because no consistent orientation was found.
    pub dropped: usize,
}

/// Estimates and orients a normal for every point, removing points that
/// cannot be oriented.
pub fn estimate_normals(points: &mut PointSet, config: &NormalEstimationConfig) -> NormalReport {
    if points.is_empty() {
        return NormalReport::default();
    }
    let k = config.neighbors.max(2);
    let positions = points.positions();
    let index = NeighborIndex::build(&positions);

    let normals: Vec<Option<Vec3>> = (0..positions.len())
        .map(|i| {
            let neighborhood: Vec<Vec3> = index
                .nearest(positions[i], k + 1)
                .iter()
                .map(|n| positions[n.index])
                .collect();
            if neighborhood.len() < 3 {
                return None;
            }
            LocalFrame::fit(&neighborhood).map(|frame| frame.normal)
        })
        .collect();

    let graph = neighbor_graph(&index, k);
    let oriented = orient(&positions, &normals, &graph);

    let keep: Vec<bool> = oriented.iter().map(Option::is_some).collect();
    for (point, normal) in points.points_mut().iter_mut().zip(&oriented) {
        point.normal = *normal;
    }
    let before = points.len();
    points.retain_flagged(&keep);

    let report = NormalReport {
        oriented: points.len(),
        dropped: before - points.len(),
    };
    log::info!(
        "normal estimation: {} oriented, {} dropped",
        report.oriented,
        report.dropped
    );
    report
}

/// Symmetrized k-nearest-neighbour adjacency.
fn neighbor_graph(index: &NeighborIndex, k: usize) -> Vec<Vec<usize>> {
    let mut graph: Vec<Vec<usize>> = vec![Vec::new(); index.len()];
    for i in 0..index.len() {
        for n in index.neighbors_of(i, k) {
            graph[i].push(n.index);
            graph[n.index].push(i);
        }
    }
    for edges in &mut graph {
        edges.sort_unstable();
        edges.dedup();
    }
    graph
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    weight: f32,
    node: usize,
    parent: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Reversed so the max-heap pops the lightest edge
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .total_cmp(&self.weight)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Prim's walk over `graph` from the highest point with a normal.
fn orient(positions: &[Vec3], normals: &[Option<Vec3>], graph: &[Vec<usize>]) -> Vec<Option<Vec3>> {
    let mut oriented: Vec<Option<Vec3>> = vec![None; positions.len()];

    let Some(seed) = (0..positions.len())
        .filter(|&i| normals[i].is_some())
        .max_by(|&a, &b| positions[a].y.total_cmp(&positions[b].y))
    else {
        return oriented;
    };

    let mut heap = BinaryHeap::new();
    heap.push(Candidate {
        weight: 0.0,
        node: seed,
        parent: seed,
    });

    while let Some(Candidate { node, parent, .. }) = heap.pop() {
        if oriented[node].is_some() {
            continue;
        }
        let Some(mut normal) = normals[node] else {
            continue;
        };
        let reference = if node == parent {
            Vec3::Y
        } else {
            oriented[parent].unwrap_or(Vec3::Y)
        };
        if normal.dot(reference) < 0.0 {
            normal = -normal;
        }
        oriented[node] = Some(normal);

        for &next in &graph[node] {
            if oriented[next].is_some() {
                continue;
            }
            if let Some(next_normal) = normals[next] {
                heap.push(Candidate {
                    weight: 1.0 - normal.dot(next_normal).abs(),
                    node: next,
                    parent: node,
                });
            }
        }
    }
    oriented
}
