//! Principal component analysis of small point neighbourhoods.

use glam::Vec3;
use nalgebra::Matrix3;

/// Principal axes of a point neighbourhood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    /// Centroid of the points.
    pub centroid: Vec3,
    /// Eigenvalues of the covariance, ascending.
    pub eigenvalues: [f32; 3],
    /// Eigenvector of the smallest eigenvalue: the fitted plane normal.
    pub normal: Vec3,
    /// Eigenvector of the largest eigenvalue: the direction of greatest spread.
    pub major_axis: Vec3,
}

impl LocalFrame {
    /// Fits a frame to `points`. Returns `None` for an empty input or a
    /// degenerate decomposition.
    pub fn fit(points: &[Vec3]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = points.len() as f32;
        let centroid = points.iter().copied().sum::<Vec3>() / n;

        let mut cov = Matrix3::<f32>::zeros();
        for p in points {
            let d = *p - centroid;
            let d = nalgebra::Vector3::new(d.x, d.y, d.z);
            cov += d * d.transpose();
        }
        cov /= n;

        let eigen = cov.symmetric_eigen();
        let mut order = [0_usize, 1, 2];
        order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

        let column = |i: usize| {
            let c = eigen.eigenvectors.column(i);
            Vec3::new(c[0], c[1], c[2])
        };
        let normal = column(order[0]).normalize_or_zero();
        let major_axis = column(order[2]).normalize_or_zero();
        if normal == Vec3::ZERO || !normal.is_finite() || !major_axis.is_finite() {
            return None;
        }

        Some(Self {
            centroid,
            eigenvalues: [
                eigen.eigenvalues[order[0]].max(0.0),
                eigen.eigenvalues[order[1]].max(0.0),
                eigen.eigenvalues[order[2]].max(0.0),
            ],
            normal,
            major_axis,
        })
    }

    /// Surface variation `λ0 / (λ0 + λ1 + λ2)`: 0 for a plane, 1/3 for isotropic noise.
    #[must_use]
    pub fn surface_variation(&self) -> f32 {
        let sum: f32 = self.eigenvalues.iter().sum();
        if sum <= f32::EPSILON {
            0.0
        } else {
            self.eigenvalues[0] / sum
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_normal() {
        let points: Vec<Vec3> = (0..25)
            .map(|i| Vec3::new((i % 5) as f32, 2.0, (i / 5) as f32 * 0.5))
            .collect();
        let frame = LocalFrame::fit(&points).unwrap();

        assert!(frame.normal.dot(Vec3::Y).abs() > 0.999);
        assert!(frame.surface_variation() < 1e-6);
        assert!((frame.centroid - Vec3::new(2.0, 2.0, 1.0)).length() < 1e-5);
        // x spread (0..4) dominates z spread (0..2)
        assert!(frame.major_axis.dot(Vec3::X).abs() > 0.999);
    }

    #[test]
    fn test_isotropic_variation() {
        let points = vec![
            Vec3::X,
            -Vec3::X,
            Vec3::Y,
            -Vec3::Y,
            Vec3::Z,
            -Vec3::Z,
        ];
        let frame = LocalFrame::fit(&points).unwrap();
        assert!((frame.surface_variation() - 1.0 / 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty() {
        assert!(LocalFrame::fit(&[]).is_none());
    }
}
