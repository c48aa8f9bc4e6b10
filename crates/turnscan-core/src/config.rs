//! Configuration for capture sessions and the mesh pipeline.
//!
//! A [`ScanConfig`] is snapshotted when a capture session starts and is not
//! read again until the next start, so edits made while a scan is running
//! never affect that scan.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::clip_box::ClipBox;
use crate::error::{Result, ScanError};

/// Largest image count the one-byte `T<n>` command can carry.
pub const MAX_IMAGES: u8 = u8::MAX;

/// Image counts offered by the settings surface.
pub const SETTINGS_IMAGE_RANGE: std::ops::RangeInclusive<u8> = 4..=MAX_IMAGES;

/// Settings for one capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Number of shots (and turntable positions) per revolution.
    pub number_of_images: u8,

    /// Nearest accepted depth, in sensor units.
    pub min_distance: f32,

    /// Farthest accepted depth, in sensor units.
    pub max_distance: f32,

    /// Optional box outside of which points are discarded.
    pub clip_box: Option<ClipBox>,

    /// A point on the vertical rotation axis of the turntable (y is ignored).
    pub turntable_center: Vec3,

    /// Background model settings.
    pub background: BackgroundConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            number_of_images: 20,
            min_distance: 0.5,
            max_distance: 1.5,
            clip_box: None,
            turntable_center: Vec3::new(0.0, 0.0, 1.0),
            background: BackgroundConfig::default(),
        }
    }
}

impl ScanConfig {
    /// Creates a scan configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of images per revolution.
    pub fn with_images(mut self, number_of_images: u8) -> Self {
        self.number_of_images = number_of_images;
        self
    }

    /// Sets the accepted depth window.
    pub fn with_depth_window(mut self, min_distance: f32, max_distance: f32) -> Self {
        self.min_distance = min_distance;
        self.max_distance = max_distance;
        self
    }

    /// Sets the clip box.
    pub fn with_clip_box(mut self, clip_box: Option<ClipBox>) -> Self {
        self.clip_box = clip_box;
        self
    }

    /// Sets the turntable rotation center.
    pub fn with_turntable_center(mut self, center: Vec3) -> Self {
        self.turntable_center = center;
        self
    }

    /// Checks that the configuration describes a runnable session.
    pub fn validate(&self) -> Result<()> {
        if self.number_of_images == 0 {
            return Err(ScanError::InvalidConfig(
                "number of images must be at least 1".into(),
            ));
        }
        if !(self.min_distance.is_finite() && self.max_distance.is_finite()) {
            return Err(ScanError::InvalidConfig(
                "depth window must be finite".into(),
            ));
        }
        if self.min_distance > self.max_distance {
            return Err(ScanError::InvalidConfig(format!(
                "min distance {} exceeds max distance {}",
                self.min_distance, self.max_distance
            )));
        }
        self.background.validate()
    }
}

/// Settings for the adaptive background model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Number of frames the running statistics remember (learning rate = 1/history).
    pub history: u32,
    /// Squared deviation, in variances, above which a channel is foreground.
    pub variance_threshold: f32,
    /// Frames consumed by a background calibration.
    pub calibration_frames: u32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            history: 500,
            variance_threshold: 16.0,
            calibration_frames: 30,
        }
    }
}

impl BackgroundConfig {
    fn validate(&self) -> Result<()> {
        if self.history == 0 {
            return Err(ScanError::InvalidConfig(
                "background history must be at least 1".into(),
            ));
        }
        if self.variance_threshold <= 0.0 {
            return Err(ScanError::InvalidConfig(
                "background variance threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Outlier removal stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierRemovalConfig {
    /// Whether the stage runs.
    pub enabled: bool,
    /// Neighbours used for the spacing estimate.
    pub neighbors: usize,
    /// Points farther than `threshold_factor × average spacing` are removed.
    pub threshold_factor: f32,
    /// Upper bound on removal passes.
    pub max_passes: usize,
}

impl Default for OutlierRemovalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            neighbors: 24,
            threshold_factor: 2.0,
            max_passes: 8,
        }
    }
}

/// Grid simplification stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSimplificationConfig {
    /// Whether the stage runs.
    pub enabled: bool,
    /// Edge length of a grid cell, in world units.
    pub cell_size: f32,
}

impl Default for GridSimplificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cell_size: 0.002,
        }
    }
}

/// Hierarchical simplification stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchySimplificationConfig {
    /// Whether the stage runs.
    pub enabled: bool,
    /// Clusters larger than this are split.
    pub max_cluster_size: usize,
    /// Clusters with a higher surface variation are split.
    pub max_surface_variation: f32,
}

impl Default for HierarchySimplificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cluster_size: 100,
            max_surface_variation: 0.01,
        }
    }
}

/// Normal estimation stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalEstimationConfig {
    /// Whether the stage runs.
    pub enabled: bool,
    /// Neighbours used for the plane fit and the orientation graph.
    pub neighbors: usize,
}

impl Default for NormalEstimationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            neighbors: 18,
        }
    }
}

/// Smoothing stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Whether the stage runs.
    pub enabled: bool,
    /// Neighbours used for each projection.
    pub neighbors: usize,
    /// Normal deviation (degrees) beyond which neighbours stop contributing.
    pub sharpness_angle: f32,
    /// Number of smoothing iterations.
    pub iterations: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            neighbors: 24,
            sharpness_angle: 25.0,
            iterations: 2,
        }
    }
}

/// Surface reconstruction stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Whether the stage runs.
    pub enabled: bool,
    /// Minimum triangle angle, in degrees.
    pub min_triangle_angle: f32,
    /// Maximum triangle size relative to the average point spacing.
    pub max_triangle_size: f32,
    /// Maximum surface approximation error relative to the average point spacing.
    pub max_approximation_distance: f32,
    /// Upper bound on grid nodes per axis used to extract the surface.
    pub max_grid_resolution: u32,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_triangle_angle: 20.0,
            max_triangle_size: 30.0,
            max_approximation_distance: 0.375,
            max_grid_resolution: 128,
        }
    }
}

/// Which artifacts are handed to the writers after a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Hand the processed point set to the point cloud writer.
    pub points: bool,
    /// Hand the reconstructed mesh to the mesh writer.
    pub mesh: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            points: true,
            mesh: true,
        }
    }
}

/// Settings for every mesh pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Outlier removal.
    pub outlier_removal: OutlierRemovalConfig,
    /// Grid simplification.
    pub grid_simplification: GridSimplificationConfig,
    /// Hierarchical simplification.
    pub hierarchy_simplification: HierarchySimplificationConfig,
    /// Normal estimation.
    pub normal_estimation: NormalEstimationConfig,
    /// Smoothing.
    pub smoothing: SmoothingConfig,
    /// Surface reconstruction.
    pub reconstruction: ReconstructionConfig,
    /// Export toggles.
    pub export: ExportConfig,
}

impl MeshConfig {
    /// Returns a configuration with every processing stage disabled.
    ///
    /// Export toggles keep their defaults.
    pub fn passthrough() -> Self {
        let mut config = Self::default();
        config.outlier_removal.enabled = false;
        config.grid_simplification.enabled = false;
        config.hierarchy_simplification.enabled = false;
        config.normal_estimation.enabled = false;
        config.smoothing.enabled = false;
        config.reconstruction.enabled = false;
        config
    }

    /// Checks the numeric parameters of every enabled stage.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ScanError::InvalidConfig(msg.to_string()));

        if self.outlier_removal.enabled
            && (self.outlier_removal.neighbors == 0 || self.outlier_removal.threshold_factor <= 0.0)
        {
            return invalid("outlier removal needs neighbors > 0 and a positive threshold");
        }
        if self.grid_simplification.enabled && self.grid_simplification.cell_size <= 0.0 {
            return invalid("grid cell size must be positive");
        }
        if self.hierarchy_simplification.enabled
            && self.hierarchy_simplification.max_cluster_size == 0
        {
            return invalid("max cluster size must be at least 1");
        }
        if self.normal_estimation.enabled && self.normal_estimation.neighbors < 3 {
            return invalid("normal estimation needs at least 3 neighbors");
        }
        if self.smoothing.enabled && self.smoothing.neighbors == 0 {
            return invalid("smoothing needs at least 1 neighbor");
        }
        let rec = &self.reconstruction;
        if rec.enabled
            && (rec.max_triangle_size <= 0.0
                || rec.max_approximation_distance <= 0.0
                || rec.max_grid_resolution < 2)
        {
            return invalid("reconstruction sizes must be positive and the grid at least 2 nodes");
        }
        Ok(())
    }
}

/// The persisted settings document: one scan and one mesh configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Capture settings.
    pub scan: ScanConfig,
    /// Mesh pipeline settings.
    pub mesh: MeshConfig,
}

impl ScannerSettings {
    /// Loads settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings: Self = serde_json::from_str(&text)?;
        log::debug!("loaded settings from {}", path.as_ref().display());
        Ok(settings)
    }

    /// Saves settings as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }
}
