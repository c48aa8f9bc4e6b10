//! Core data model for turnscan.
//!
//! This crate provides the types shared by every stage of a turntable scan:
//! - [`Sample`], [`ShotCloud`] and [`CombinedCloud`] for captured points
//! - [`ScanConfig`] and [`MeshConfig`] for session and pipeline settings
//! - [`CloudFuser`] for rotating per-shot clouds into one world frame
//! - [`marching_cubes`] and [`TriangleMesh`] for surface extraction
//! - [`ScanError`] and [`ReconstructionFailure`] for error reporting

// Documentation lints - internal functions don't need exhaustive panic/error docs
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
// Configs legitimately carry one enable flag per stage
#![allow(clippy::struct_excessive_bools)]
// Builder patterns return Self which doesn't need must_use
#![allow(clippy::must_use_candidate)]

pub mod clip_box;
pub mod cloud;
pub mod config;
pub mod error;
pub mod fuse;
pub mod marching_cubes;
pub mod mesh;

pub use clip_box::ClipBox;
pub use cloud::{CombinedCloud, Sample, ShotCloud};
pub use config::{
    BackgroundConfig, ExportConfig, GridSimplificationConfig, HierarchySimplificationConfig,
    MeshConfig, NormalEstimationConfig, OutlierRemovalConfig, ReconstructionConfig, ScanConfig,
    ScannerSettings, SmoothingConfig,
};
pub use error::{ReconstructionFailure, Result, ScanError};
pub use fuse::CloudFuser;
pub use marching_cubes::{marching_cubes, ScalarGrid};
pub use mesh::TriangleMesh;

// Re-export glam types for convenience
pub use glam::{Vec2, Vec3};
