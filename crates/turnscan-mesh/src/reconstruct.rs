//! Surface reconstruction from an oriented point set.
//!
//! The surface is the zero level set of an implicit function: the
//! Gaussian-weighted signed distance to the tangent planes of nearby points.
//! The function is sampled on a regular grid sized from the average point
//! spacing and contoured with marching cubes. Sliver triangles are collapsed,
//! vertices are pulled onto the level set, edges longer than the size limit
//! are split and every face is oriented along the function gradient, so
//! normals point away from the interior.

use std::collections::{HashMap, HashSet};

use glam::Vec3;
use turnscan_core::{
    marching_cubes, ReconstructionConfig, ReconstructionFailure, ScalarGrid, TriangleMesh,
};

use crate::neighbors::{average_spacing, NeighborIndex};
use crate::point_set::PointSet;

/// Fewest points the implicit function is fitted to.
pub const MIN_POINTS: usize = 8;

/// Neighbours used for the spacing estimate.
const SPACING_NEIGHBORS: usize = 6;

/// Neighbours blended by one function evaluation.
const SUPPORT_NEIGHBORS: usize = 16;

/// Newton steps before a vertex that has not converged is left in place.
const PROJECTION_ITERATIONS: usize = 8;
const COLLAPSE_PASSES: usize = 3;
const REFINE_PASSES: usize = 16;

/// Signed distance to the blended tangent planes of an oriented point set.
struct ImplicitSurface {
    index: NeighborIndex,
    normals: Vec<Vec3>,
    support: f32,
    inv_sigma_sq: f32,
}

impl ImplicitSurface {
    fn new(index: NeighborIndex, normals: Vec<Vec3>, support: f32) -> Self {
        let sigma = support * 0.5;
        Self {
            index,
            normals,
            support,
            inv_sigma_sq: 1.0 / (sigma * sigma),
        }
    }

    /// Returns the function value and unit gradient at `x`, or `None` if no
    /// point lies within the support radius.
    fn evaluate(&self, x: Vec3) -> Option<(f32, Vec3)> {
        let positions = self.index.positions();
        let mut weight_sum = 0.0;
        let mut value = 0.0;
        let mut gradient = Vec3::ZERO;

        for n in self.index.nearest(x, SUPPORT_NEIGHBORS) {
            if n.distance > self.support {
                break;
            }
            let w = (-(n.distance * n.distance) * self.inv_sigma_sq).exp();
            let normal = self.normals[n.index];
            weight_sum += w;
            value += w * normal.dot(x - positions[n.index]);
            gradient += w * normal;
        }

        if weight_sum <= f32::MIN_POSITIVE {
            return None;
        }
        Some((value / weight_sum, gradient.normalize_or_zero()))
    }
}

/// An implicit function fitted to a point set and the grid it is sampled on.
struct Fit {
    surface: ImplicitSurface,
    grid: GridLayout,
    spacing: f32,
}

fn fit_surface(
    points: &PointSet,
    config: &ReconstructionConfig,
) -> Result<Fit, ReconstructionFailure> {
    if points.len() < MIN_POINTS {
        return Err(ReconstructionFailure::ImplicitFit(format!(
            "need at least {MIN_POINTS} points, got {}",
            points.len()
        )));
    }
    if !points.has_normals() {
        return Err(ReconstructionFailure::ImplicitFit(
            "points have no normals".into(),
        ));
    }

    let positions = points.positions();
    let normals: Vec<Vec3> = points
        .points()
        .iter()
        .map(|p| p.normal.unwrap_or(Vec3::ZERO))
        .collect();
    let index = NeighborIndex::build(&positions);
    let spacing = average_spacing(&index, SPACING_NEIGHBORS);
    if !(spacing.is_finite() && spacing > 0.0) {
        return Err(ReconstructionFailure::ImplicitFit(
            "points have zero spacing".into(),
        ));
    }

    let (min, max) = bounds(&positions);
    let grid = grid_layout(min, max, spacing, config);
    let support = (3.0 * spacing).max(2.0 * grid.cell_size);
    log::debug!(
        "reconstruction grid {:?}, cell {}, spacing {spacing}, support {support}",
        grid.dims,
        grid.cell_size
    );

    Ok(Fit {
        surface: ImplicitSurface::new(index, normals, support),
        grid,
        spacing,
    })
}

/// Reconstructs a triangle mesh from an oriented point set.
///
/// Every vertex is moved to within `max_approximation_distance × spacing` of
/// the level set where the function converges there, and no edge is longer
/// than `max_triangle_size × spacing`.
///
/// Fails with [`ReconstructionFailure::ImplicitFit`] if the points are too
/// few, lack normals or have no spread, and with
/// [`ReconstructionFailure::EmptySurface`] if contouring yields no vertices.
pub fn reconstruct_surface(
    points: &PointSet,
    config: &ReconstructionConfig,
) -> Result<TriangleMesh, ReconstructionFailure> {
    let Fit { surface, grid, spacing } = fit_surface(points, config)?;
    let grid = ScalarGrid::from_fn(grid.origin, grid.cell_size, grid.dims, |x| {
        surface.evaluate(x).map_or(f32::NAN, |(value, _)| value)
    });
    let mut mesh = marching_cubes(&grid, 0.0)
        .map_err(|e| ReconstructionFailure::ImplicitFit(e.to_string()))?;
    if mesh.is_empty() {
        return Err(ReconstructionFailure::EmptySurface);
    }

    let min_angle_rad = config.min_triangle_angle.clamp(0.0, 59.0).to_radians();
    for pass in 0..COLLAPSE_PASSES {
        let collapsed = collapse_slivers(&mut mesh, min_angle_rad);
        log::debug!("sliver pass {}: {collapsed} edges collapsed", pass + 1);
        if collapsed == 0 {
            break;
        }
    }

    let tolerance = config.max_approximation_distance * spacing;
    for vertex in &mut mesh.vertices {
        *vertex = project(&surface, *vertex, tolerance);
    }

    let max_edge = config.max_triangle_size * spacing;
    let split = refine_long_edges(&mut mesh, max_edge, |x| project(&surface, x, tolerance));
    if split > 0 {
        log::debug!("refinement: {split} edges longer than {max_edge} split");
    }

    orient_faces(&mut mesh, &surface);
    mesh.remove_unreferenced_vertices();
    if mesh.is_empty() {
        return Err(ReconstructionFailure::EmptySurface);
    }
    mesh.compute_vertex_normals();

    log::info!(
        "reconstruction: {} vertices, {} faces",
        mesh.num_vertices(),
        mesh.num_faces()
    );
    Ok(mesh)
}

fn bounds(positions: &[Vec3]) -> (Vec3, Vec3) {
    positions.iter().fold(
        (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
        |(min, max), &p| (min.min(p), max.max(p)),
    )
}

/// Grid placement without values.
struct GridLayout {
    origin: Vec3,
    cell_size: f32,
    dims: [u32; 3],
}

/// Two cells of padding on each side, at most `max_grid_resolution` nodes per
/// axis, and no finer than the point spacing.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn grid_layout(min: Vec3, max: Vec3, spacing: f32, config: &ReconstructionConfig) -> GridLayout {
    let resolution = config.max_grid_resolution.max(2);
    let extent = max - min;
    let usable = resolution.saturating_sub(5).max(1) as f32;
    let cell_size = spacing.max(extent.max_element() / usable);

    let padding = 2.0 * cell_size;
    let origin = min - Vec3::splat(padding);
    let nodes = |length: f32| -> u32 {
        let cells = ((length + 2.0 * padding) / cell_size).ceil() as u32;
        (cells + 1).clamp(2, resolution)
    };
    GridLayout {
        origin,
        cell_size,
        dims: [nodes(extent.x), nodes(extent.y), nodes(extent.z)],
    }
}

/// Moves `x` along the gradient until it is within `tolerance` of the level set.
fn project(surface: &ImplicitSurface, mut x: Vec3, tolerance: f32) -> Vec3 {
    for _ in 0..PROJECTION_ITERATIONS {
        let Some((value, gradient)) = surface.evaluate(x) else {
            break;
        };
        if value.abs() <= tolerance || gradient == Vec3::ZERO {
            break;
        }
        x -= gradient * value;
    }
    x
}

/// Smallest interior angle of a triangle, 0 for a degenerate one.
fn min_angle(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let angle = |p: Vec3, q: Vec3, r: Vec3| {
        let u = q - p;
        let v = r - p;
        if u.length_squared() <= 0.0 || v.length_squared() <= 0.0 {
            0.0
        } else {
            u.angle_between(v)
        }
    };
    angle(a, b, c).min(angle(b, c, a)).min(angle(c, a, b))
}

fn find(parent: &mut [u32], v: u32) -> u32 {
    let mut root = v;
    while parent[root as usize] != root {
        root = parent[root as usize];
    }
    let mut current = v;
    while parent[current as usize] != root {
        let next = parent[current as usize];
        parent[current as usize] = root;
        current = next;
    }
    root
}

/// Collapses the shortest edge of every triangle sharper than `min_angle`,
/// touching each vertex at most once, then drops degenerate and repeated faces.
///
/// Returns the number of collapsed edges.
#[allow(clippy::cast_possible_truncation)]
fn collapse_slivers(mesh: &mut TriangleMesh, min_angle_rad: f32) -> usize {
    let mut parent: Vec<u32> = (0..mesh.vertices.len() as u32).collect();
    let mut touched = vec![false; mesh.vertices.len()];
    let mut collapsed = 0;

    for face in &mesh.faces {
        if face.iter().any(|&v| touched[v as usize]) {
            continue;
        }
        let [a, b, c] = face.map(|v| mesh.vertices[v as usize]);
        if min_angle(a, b, c) >= min_angle_rad {
            continue;
        }
        let edges = [(face[0], face[1]), (face[1], face[2]), (face[2], face[0])];
        let (u, v) = edges
            .into_iter()
            .min_by(|&(p, q), &(r, s)| {
                let l1 = mesh.vertices[p as usize].distance_squared(mesh.vertices[q as usize]);
                let l2 = mesh.vertices[r as usize].distance_squared(mesh.vertices[s as usize]);
                l1.total_cmp(&l2)
            })
            .unwrap_or((face[0], face[1]));

        let midpoint = (mesh.vertices[u as usize] + mesh.vertices[v as usize]) * 0.5;
        mesh.vertices[u as usize] = midpoint;
        parent[v as usize] = u;
        for &w in face {
            touched[w as usize] = true;
        }
        collapsed += 1;
    }

    if collapsed == 0 {
        return 0;
    }

    let mut seen = HashSet::with_capacity(mesh.faces.len());
    let mut faces = Vec::with_capacity(mesh.faces.len());
    for face in &mesh.faces {
        let mapped = face.map(|v| find(&mut parent, v));
        if mapped[0] == mapped[1] || mapped[1] == mapped[2] || mapped[2] == mapped[0] {
            continue;
        }
        let mut key = mapped;
        key.sort_unstable();
        if seen.insert(key) {
            faces.push(mapped);
        }
    }
    mesh.faces = faces;
    collapsed
}

fn edge_key(a: u32, b: u32) -> (u32, u32) {
    (a.min(b), a.max(b))
}

/// Splits every edge longer than `max_edge` at its midpoint, passing each new
/// vertex through `place`, until no edge is too long.
///
/// Faces keep their winding. Returns the number of edges split.
#[allow(clippy::cast_possible_truncation)]
fn refine_long_edges(
    mesh: &mut TriangleMesh,
    max_edge: f32,
    place: impl Fn(Vec3) -> Vec3,
) -> usize {
    let mut split = 0;
    for _ in 0..REFINE_PASSES {
        let first_new = mesh.vertices.len();
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        for face in &mesh.faces {
            for i in 0..3 {
                let (a, b) = (face[i], face[(i + 1) % 3]);
                let key = edge_key(a, b);
                if midpoints.contains_key(&key) {
                    continue;
                }
                let (p, q) = (mesh.vertices[a as usize], mesh.vertices[b as usize]);
                if p.distance(q) > max_edge {
                    midpoints.insert(key, mesh.vertices.len() as u32);
                    mesh.vertices.push((p + q) * 0.5);
                }
            }
        }
        if midpoints.is_empty() {
            return split;
        }
        split += midpoints.len();

        let mut faces = Vec::with_capacity(mesh.faces.len() * 2);
        for face in &mesh.faces {
            split_face(*face, &midpoints, &mut faces);
        }
        mesh.faces = faces;
        for vertex in &mut mesh.vertices[first_new..] {
            *vertex = place(*vertex);
        }
    }
    log::warn!("refinement stopped after {REFINE_PASSES} passes with edges above {max_edge}");
    split
}

/// Replaces `face` by the triangles its split edges cut it into.
fn split_face(face: [u32; 3], midpoints: &HashMap<(u32, u32), u32>, out: &mut Vec<[u32; 3]>) {
    let mid = |i: usize| midpoints.get(&edge_key(face[i], face[(i + 1) % 3])).copied();
    let marks = [mid(0), mid(1), mid(2)];
    let count = marks.iter().flatten().count();
    // Rotate so the split edges come first
    let start = match count {
        1 => marks.iter().position(Option::is_some).unwrap_or(0),
        2 => (marks.iter().position(Option::is_none).unwrap_or(0) + 1) % 3,
        _ => 0,
    };
    let v = |i: usize| face[(start + i) % 3];
    let m = |i: usize| marks[(start + i) % 3];

    match (m(0), m(1), m(2)) {
        (Some(m0), Some(m1), Some(m2)) => {
            out.push([v(0), m0, m2]);
            out.push([m0, v(1), m1]);
            out.push([m2, m1, v(2)]);
            out.push([m0, m1, m2]);
        }
        (Some(m0), Some(m1), None) => {
            out.push([m0, v(1), m1]);
            out.push([v(0), m0, m1]);
            out.push([v(0), m1, v(2)]);
        }
        (Some(m0), None, None) => {
            out.push([v(0), m0, v(2)]);
            out.push([m0, v(1), v(2)]);
        }
        _ => out.push(face),
    }
}

/// Flips faces whose normal opposes the function gradient at their centroid.
fn orient_faces(mesh: &mut TriangleMesh, surface: &ImplicitSurface) {
    let mut flipped = 0;
    for i in 0..mesh.faces.len() {
        let normal = mesh.face_normal(i);
        let [a, b, c] = mesh.faces[i].map(|v| mesh.vertices[v as usize]);
        let centroid = (a + b + c) / 3.0;
        let Some((_, gradient)) = surface.evaluate(centroid) else {
            continue;
        };
        if normal.dot(gradient) < 0.0 {
            mesh.faces[i].swap(1, 2);
            flipped += 1;
        }
    }
    log::debug!("orientation: {flipped} faces flipped");
}
