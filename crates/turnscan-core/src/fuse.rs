//! Rotational alignment of per-shot clouds into one world frame.
//!
//! Shot `i` of `N` was captured after the turntable advanced `i` steps, so its
//! points are rotated about the vertical axis through the turntable center by
//! `θ = 2π·i/N`:
//!
//! ```text
//! x' = (x - cx)·cos θ - (z - cz)·sin θ + cx
//! z' = (x - cx)·sin θ + (z - cz)·cos θ + cz
//! y' = y
//! ```

use std::f32::consts::TAU;

use glam::Vec3;

use crate::cloud::{CombinedCloud, Sample, ShotCloud};
use crate::error::{Result, ScanError};

/// Rotates shot clouds about the turntable axis and concatenates them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudFuser {
    number_of_images: usize,
    center: Vec3,
}

impl CloudFuser {
    /// Creates a fuser for `number_of_images` shots per revolution around
    /// the vertical axis through `center` (the y component is ignored).
    pub fn new(number_of_images: usize, center: Vec3) -> Self {
        Self {
            number_of_images,
            center,
        }
    }

    /// Returns the rotation angle applied to shot `index`, in radians.
    #[must_use]
    pub fn angle(&self, index: usize) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let fraction = index as f32 / self.number_of_images.max(1) as f32;
        TAU * fraction
    }

    /// Rotates one point by the angle of shot `index`.
    #[must_use]
    pub fn rotate(&self, point: Vec3, index: usize) -> Vec3 {
        if index == 0 {
            return point;
        }
        let (sin, cos) = self.angle(index).sin_cos();
        let dx = point.x - self.center.x;
        let dz = point.z - self.center.z;
        Vec3::new(
            dx * cos - dz * sin + self.center.x,
            point.y,
            dx * sin + dz * cos + self.center.z,
        )
    }

    /// Rotates every shot into the world frame and concatenates them in
    /// index order. Overlapping samples are kept as they are.
    pub fn fuse(&self, mut shots: Vec<ShotCloud>) -> Result<CombinedCloud> {
        if self.number_of_images == 0 {
            return Err(ScanError::InvalidConfig(
                "cannot fuse with zero images per revolution".into(),
            ));
        }
        if let Some(bad) = shots.iter().find(|s| s.index() >= self.number_of_images) {
            return Err(ScanError::InvalidConfig(format!(
                "shot index {} is outside 0..{}",
                bad.index(),
                self.number_of_images
            )));
        }

        shots.sort_by_key(ShotCloud::index);

        let total = shots.iter().map(ShotCloud::len).sum();
        let mut combined = Vec::with_capacity(total);
        for shot in shots {
            let index = shot.index();
            combined.extend(
                shot.into_samples()
                    .into_iter()
                    .map(|s| Sample::new(self.rotate(s.position, index), s.color)),
            );
        }

        log::debug!(
            "fused {} points from {} images per revolution",
            combined.len(),
            self.number_of_images
        );
        Ok(CombinedCloud::from_samples(combined))
    }
}
