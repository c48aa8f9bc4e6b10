//! Captured point clouds.
//!
//! A [`ShotCloud`] holds the points retained from one camera shot, tagged
//! with the shot's rotation index. A [`CombinedCloud`] holds the points of a
//! whole session after fusion into one world frame.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// One captured point with its color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Position in camera (or world) space.
    pub position: Vec3,
    /// RGB color.
    pub color: [u8; 3],
}

impl Sample {
    /// Creates a new sample.
    pub fn new(position: Vec3, color: [u8; 3]) -> Self {
        Self { position, color }
    }
}

/// The points retained from one shot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShotCloud {
    index: usize,
    samples: Vec<Sample>,
}

impl ShotCloud {
    /// Creates an empty cloud for the shot with the given rotation index.
    pub fn new(index: usize) -> Self {
        Self {
            index,
            samples: Vec::new(),
        }
    }

    /// Creates a cloud from already filtered samples.
    pub fn from_samples(index: usize, samples: Vec<Sample>) -> Self {
        Self { index, samples }
    }

    /// Returns the rotation index this shot was captured at.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the samples.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Returns the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the shot retained no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends a sample.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    /// Consumes the cloud and returns its samples.
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

/// All points of a session in one world frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedCloud {
    samples: Vec<Sample>,
}

impl CombinedCloud {
    /// Creates an empty combined cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a combined cloud from samples.
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Returns the samples.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Returns the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the cloud has no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends samples.
    pub fn extend(&mut self, samples: impl IntoIterator<Item = Sample>) {
        self.samples.extend(samples);
    }

    /// Consumes the cloud and returns its samples.
    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    /// Returns the axis-aligned bounding box, or `None` for an empty cloud.
    pub fn bounding_box(&self) -> Option<(Vec3, Vec3)> {
        let first = self.samples.first()?.position;
        Some(self.samples.iter().fold((first, first), |(min, max), s| {
            (min.min(s.position), max.max(s.position))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shot_cloud_basics() {
        let mut shot = ShotCloud::new(3);
        assert_eq!(shot.index(), 3);
        assert!(shot.is_empty());

        shot.push(Sample::new(Vec3::new(0.0, 1.0, 2.0), [10, 20, 30]));
        assert_eq!(shot.len(), 1);
        assert_eq!(shot.samples()[0].color, [10, 20, 30]);
    }

    #[test]
    fn test_bounding_box() {
        assert!(CombinedCloud::new().bounding_box().is_none());

        let cloud = CombinedCloud::from_samples(vec![
            Sample::new(Vec3::new(-1.0, 2.0, 0.5), [0; 3]),
            Sample::new(Vec3::new(3.0, -2.0, 0.0), [0; 3]),
        ]);
        let (min, max) = cloud.bounding_box().unwrap();
        assert_eq!(min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(max, Vec3::new(3.0, 2.0, 0.5));
    }
}
