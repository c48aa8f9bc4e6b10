//! Extraction of a filtered point set from one depth shot.

use turnscan_core::{ClipBox, Sample, ScanConfig, ShotCloud};

use crate::background::BackgroundMask;
use crate::camera::DepthShot;

/// Filters the depth pixels of a shot into a [`ShotCloud`].
///
/// A pixel is kept when its color coordinate falls inside the color image,
/// its depth lies in the configured window, the background mask (if any)
/// marks it foreground, and it lies inside the clip box (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSampler {
    min_distance: f32,
    max_distance: f32,
    clip_box: Option<ClipBox>,
}

impl FrameSampler {
    /// Creates a sampler from a session's configuration.
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            min_distance: config.min_distance,
            max_distance: config.max_distance,
            clip_box: config.clip_box,
        }
    }

    /// Samples one shot, tagging the result with rotation `index`.
    ///
    /// The result may be empty; that is a valid outcome.
    pub fn sample(
        &self,
        shot: &DepthShot,
        mask: Option<&BackgroundMask>,
        index: usize,
    ) -> ShotCloud {
        let color_width = shot.color.width();
        let color_height = shot.color.height();
        let mut cloud = ShotCloud::new(index);

        for (&point, &coord) in shot.points.iter().zip(&shot.color_coords) {
            if !coord.is_finite() || !point.is_finite() {
                continue;
            }

            #[allow(clippy::cast_precision_loss)]
            let in_color = coord.x >= 0.0
                && coord.y >= 0.0
                && coord.x < color_width as f32
                && coord.y < color_height as f32;
            if !in_color {
                continue;
            }

            if point.z < self.min_distance || point.z > self.max_distance {
                continue;
            }

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let (cx, cy) = (coord.x.floor() as u32, coord.y.floor() as u32);

            if let Some(mask) = mask {
                if !mask.is_foreground(cx, cy) {
                    continue;
                }
            }

            if let Some(clip) = &self.clip_box {
                if !clip.contains(point) {
                    continue;
                }
            }

            let Some(color) = shot.color.get_pixel_checked(cx, cy) else {
                continue;
            };
            cloud.push(Sample::new(point, color.0));
        }

        log::debug!(
            "shot {index}: kept {} of {} points",
            cloud.len(),
            shot.pixel_count()
        );
        cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn shot_with(points: Vec<Vec3>, coords: Vec<Vec2>) -> DepthShot {
        let mut color = RgbImage::new(4, 4);
        for (x, y, pixel) in color.enumerate_pixels_mut() {
            #[allow(clippy::cast_possible_truncation)]
            {
                *pixel = Rgb([x as u8 * 10, y as u8 * 10, 200]);
            }
        }
        DepthShot {
            frame_id: 1,
            width: u32::try_from(points.len()).unwrap(),
            height: 1,
            points,
            color,
            color_coords: coords,
        }
    }

    fn config() -> ScanConfig {
        ScanConfig::new().with_depth_window(1.0, 10.0)
    }

    #[test]
    fn test_depth_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<Vec3> = (0..100)
            .map(|_| Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(0.0..12.0)))
            .collect();
        let coords = vec![Vec2::new(1.5, 2.5); points.len()];
        let expected = points.iter().filter(|p| p.z >= 1.0 && p.z <= 10.0).count();

        let cloud = FrameSampler::new(&config()).sample(&shot_with(points, coords), None, 3);

        assert_eq!(cloud.index(), 3);
        assert_eq!(cloud.len(), expected);
        for s in cloud.samples() {
            assert!(s.position.z >= 1.0 && s.position.z <= 10.0);
            assert_eq!(s.color, [10, 20, 200]);
        }
    }

    #[test]
    fn test_color_coordinate_bounds() {
        let points = vec![Vec3::new(0.0, 0.0, 2.0); 5];
        let coords = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(3.99, 3.99),
            Vec2::new(4.0, 1.0),
            Vec2::new(-0.01, 1.0),
            Vec2::new(f32::NEG_INFINITY, 1.0),
        ];
        let cloud = FrameSampler::new(&config()).sample(&shot_with(points, coords), None, 0);
        assert_eq!(cloud.len(), 2);
    }

    #[test]
    fn test_invalid_depth_is_rejected() {
        let points = vec![
            Vec3::new(0.0, 0.0, f32::NEG_INFINITY),
            Vec3::new(f32::NAN, 0.0, 2.0),
            Vec3::new(0.0, 0.0, 2.0),
        ];
        let coords = vec![Vec2::ONE; 3];
        let cloud = FrameSampler::new(&config()).sample(&shot_with(points, coords), None, 0);
        assert_eq!(cloud.len(), 1);
    }

    #[test]
    fn test_mask_filters_background() {
        let points = vec![Vec3::new(0.0, 0.0, 2.0); 2];
        let coords = vec![Vec2::new(0.5, 0.5), Vec2::new(2.5, 0.5)];

        let mut mask_image = RgbImage::new(4, 4);
        mask_image.put_pixel(2, 0, Rgb([0, 200, 0]));
        mask_image.put_pixel(0, 0, Rgb([127, 127, 127]));
        let mask = BackgroundMask::from_image(mask_image);

        let cloud =
            FrameSampler::new(&config()).sample(&shot_with(points, coords), Some(&mask), 0);
        assert_eq!(cloud.len(), 1);
        assert_eq!(cloud.samples()[0].color, [20, 0, 200]);
    }

    #[test]
    fn test_clip_box() {
        let points = vec![
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(0.5, 0.0, 2.0),
            Vec3::new(0.0, 0.0, 2.09),
        ];
        let coords = vec![Vec2::ONE; 3];
        let config =
            config().with_clip_box(Some(ClipBox::new(Vec3::new(0.0, 0.0, 2.0), Vec3::ONE)));

        let cloud = FrameSampler::new(&config).sample(&shot_with(points, coords), None, 0);
        assert_eq!(cloud.len(), 2);
        for s in cloud.samples() {
            assert!((s.position - Vec3::new(0.0, 0.0, 2.0)).abs().max_element() <= 0.1);
        }
    }

    #[test]
    fn test_empty_shot_is_valid() {
        let cloud =
            FrameSampler::new(&config()).sample(&shot_with(Vec::new(), Vec::new()), None, 1);
        assert!(cloud.is_empty());
        assert_eq!(cloud.index(), 1);
    }
}
