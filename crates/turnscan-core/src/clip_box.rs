//! Axis-aligned clip box for discarding points outside the scan volume.
//!
//! The box is described the way the capture settings expose it: a center and
//! a per-axis scale. The half-extent along each axis is `0.1 × scale`.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Factor applied to the configured scale to obtain the half-extent.
pub const HALF_EXTENT_FACTOR: f32 = 0.1;

/// An axis-aligned box that keeps only the points inside it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipBox {
    /// Center of the box in camera space.
    pub center: Vec3,
    /// Per-axis scale; the half-extent is `0.1 × scale`.
    pub scale: Vec3,
}

impl ClipBox {
    /// Creates a clip box from a center and a per-axis scale.
    pub fn new(center: Vec3, scale: Vec3) -> Self {
        Self {
            center,
            scale: scale.abs(),
        }
    }

    /// Returns the half-extent along each axis.
    pub fn half_extents(&self) -> Vec3 {
        self.scale.abs() * HALF_EXTENT_FACTOR
    }

    /// Returns the minimum corner.
    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents()
    }

    /// Returns the maximum corner.
    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents()
    }

    /// Returns whether a point lies inside the box (boundary included).
    pub fn contains(&self, point: Vec3) -> bool {
        let offset = (point - self.center).abs();
        let half = self.half_extents();
        offset.x <= half.x && offset.y <= half.y && offset.z <= half.z
    }
}

impl Default for ClipBox {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 1.0), Vec3::ONE)
    }
}
