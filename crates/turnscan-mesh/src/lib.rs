//! Mesh pipeline for turnscan.
//!
//! Turns a fused [`CombinedCloud`](turnscan_core::CombinedCloud) into a clean,
//! oriented point set and a triangle surface:
//! - [`remove_outliers`], [`grid_simplify`] and [`hierarchy_simplify`] clean and thin the cloud
//! - [`estimate_normals`] fits and orients a normal per point
//! - [`smooth_points`] denoises along the normals
//! - [`reconstruct_surface`] contours an implicit surface into a [`TriangleMesh`](turnscan_core::TriangleMesh)
//! - [`MeshPipeline`] runs the enabled stages on a worker thread
//! - [`PlyPointWriter`], [`PlyMeshWriter`] and [`ObjMeshWriter`] export the results

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]
// Geometry code converts between index and float types constantly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
// Single-letter names follow the math (p, q, n, k, h)
#![allow(clippy::many_single_char_names)]
#![allow(clippy::similar_names)]
#![allow(clippy::module_name_repetitions)]

pub mod export;
pub mod neighbors;
pub mod normals;
pub mod outliers;
pub mod pca;
pub mod pipeline;
pub mod point_set;
pub mod reconstruct;
pub mod simplify;
pub mod smoothing;

pub use export::{
    read_ply_points, read_ply_points_from, write_obj_mesh, write_ply_mesh, write_ply_points,
    MeshWriter, ObjMeshWriter, PlyEncoding, PlyMeshWriter, PlyPointWriter, PointCloudWriter,
    DEFAULT_MESH_FILE, DEFAULT_POINTS_FILE,
};
pub use neighbors::{average_spacing, Neighbor, NeighborIndex};
pub use normals::{estimate_normals, NormalReport};
pub use outliers::{remove_outliers, OutlierReport};
pub use pca::LocalFrame;
pub use pipeline::{process, MeshPipeline, PipelineOutput, PipelineStage};
pub use point_set::{PointSet, SurfacePoint};
pub use reconstruct::reconstruct_surface;
pub use simplify::{grid_simplify, hierarchy_simplify};
pub use smoothing::smooth_points;
