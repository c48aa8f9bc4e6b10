//! The working point set of the mesh pipeline.

use glam::Vec3;
use turnscan_core::{CombinedCloud, Sample};

/// A point with color and, once estimated, a unit normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    /// World position.
    pub position: Vec3,
    /// RGB color.
    pub color: [u8; 3],
    /// Unit normal, present after normal estimation.
    pub normal: Option<Vec3>,
}

impl SurfacePoint {
    /// Creates a point without a normal.
    pub fn new(position: Vec3, color: [u8; 3]) -> Self {
        Self {
            position,
            color,
            normal: None,
        }
    }

    /// Sets the normal.
    pub fn with_normal(mut self, normal: Vec3) -> Self {
        self.normal = Some(normal);
        self
    }
}

impl From<Sample> for SurfacePoint {
    fn from(sample: Sample) -> Self {
        Self::new(sample.position, sample.color)
    }
}

/// An ordered set of surface points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    points: Vec<SurfacePoint>,
}

impl PointSet {
    /// Creates an empty point set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a point set from points.
    pub fn from_points(points: Vec<SurfacePoint>) -> Self {
        Self { points }
    }

    /// Returns the points.
    #[must_use]
    pub fn points(&self) -> &[SurfacePoint] {
        &self.points
    }

    /// Returns the points mutably.
    pub fn points_mut(&mut self) -> &mut [SurfacePoint] {
        &mut self.points
    }

    /// Returns the number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if there are no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns true if the set is non-empty and every point has a normal.
    #[must_use]
    pub fn has_normals(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|p| p.normal.is_some())
    }

    /// Returns the positions in order.
    #[must_use]
    pub fn positions(&self) -> Vec<Vec3> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Keeps the points whose flag is set. `keep` must have one flag per point.
    pub fn retain_flagged(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.points.retain(|_| flags.next().copied().unwrap_or(false));
    }

    /// Keeps the points at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self::from_points(indices.iter().map(|&i| self.points[i]).collect())
    }

    /// Consumes the set and returns its points.
    pub fn into_points(self) -> Vec<SurfacePoint> {
        self.points
    }

    /// Converts back to a colored cloud, dropping normals.
    pub fn to_cloud(&self) -> CombinedCloud {
        CombinedCloud::from_samples(
            self.points
                .iter()
                .map(|p| Sample::new(p.position, p.color))
                .collect(),
        )
    }
}

impl From<CombinedCloud> for PointSet {
    fn from(cloud: CombinedCloud) -> Self {
        Self::from_points(cloud.into_samples().into_iter().map(SurfacePoint::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_conversion_keeps_samples() {
        let cloud = CombinedCloud::from_samples(vec![
            Sample::new(Vec3::new(1.0, 2.0, 3.0), [1, 2, 3]),
            Sample::new(Vec3::new(-1.0, 0.0, 0.5), [9, 8, 7]),
        ]);
        let set = PointSet::from(cloud.clone());
        assert_eq!(set.len(), 2);
        assert!(!set.has_normals());
        assert_eq!(set.to_cloud(), cloud);
    }

    #[test]
    fn test_retain_and_select() {
        let mut set = PointSet::from_points(
            (0..4)
                .map(|i| SurfacePoint::new(Vec3::splat(i as f32), [0; 3]))
                .collect(),
        );
        let picked = set.select(&[3, 1]);
        assert_eq!(picked.points()[0].position, Vec3::splat(3.0));

        set.retain_flagged(&[true, false, true, false]);
        assert_eq!(set.positions(), vec![Vec3::ZERO, Vec3::splat(2.0)]);
    }

    #[test]
    fn test_has_normals() {
        let set =
            PointSet::from_points(vec![SurfacePoint::new(Vec3::ZERO, [0; 3]).with_normal(Vec3::Y)]);
        assert!(set.has_normals());
        assert!(!PointSet::new().has_normals());
    }
}
