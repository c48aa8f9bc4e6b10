//! Adaptive background subtraction on the color stream.
//!
//! Each pixel channel keeps a running mean and variance. A channel whose
//! squared deviation from the mean exceeds `variance_threshold × variance` is
//! foreground. The mask stores a per-channel confidence scaled so that the
//! decision boundary lands on [`FOREGROUND_THRESHOLD`].

use image::{Rgb, RgbImage};
use turnscan_core::BackgroundConfig;

/// Mask values above this on any channel mark a foreground pixel.
pub const FOREGROUND_THRESHOLD: u8 = 127;

const INITIAL_VARIANCE: f32 = 15.0;
const MIN_VARIANCE: f32 = 4.0;
const MAX_VARIANCE: f32 = 75.0;

/// Per-pixel, per-channel foreground confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundMask {
    image: RgbImage,
}

impl BackgroundMask {
    /// Wraps a confidence image.
    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Returns a mask that marks every pixel as foreground.
    pub fn all_foreground(width: u32, height: u32) -> Self {
        Self::from_image(RgbImage::from_pixel(width, height, Rgb([u8::MAX; 3])))
    }

    /// Mask width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Mask height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Returns the confidence of each channel at a pixel, or `None` outside the mask.
    pub fn confidence(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Returns true if any channel at the pixel exceeds [`FOREGROUND_THRESHOLD`].
    /// Pixels outside the mask are not foreground.
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.confidence(x, y)
            .is_some_and(|c| c.iter().any(|&v| v > FOREGROUND_THRESHOLD))
    }

    /// Returns the underlying confidence image.
    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Running per-pixel background statistics.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    learning_rate: f32,
    variance_threshold: f32,
    last_frame_id: u64,
    mask: Option<BackgroundMask>,
}

impl BackgroundModel {
    /// Seeds a model from one frame.
    pub fn create_from_frame(frame: &RgbImage, frame_id: u64, config: &BackgroundConfig) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let learning_rate = 1.0 / config.history.max(1) as f32;
        let mut model = Self {
            width: 0,
            height: 0,
            mean: Vec::new(),
            variance: Vec::new(),
            learning_rate,
            variance_threshold: config.variance_threshold,
            last_frame_id: frame_id,
            mask: None,
        };
        model.seed(frame, frame_id);
        model
    }

    /// Feeds a calibration frame into the statistics without classifying it.
    ///
    /// Returns false (and does nothing) if `frame_id` is not newer than the
    /// last frame consumed.
    pub fn accumulate(&mut self, frame: &RgbImage, frame_id: u64) -> bool {
        if frame_id <= self.last_frame_id {
            return false;
        }
        if !self.matches(frame) {
            self.seed(frame, frame_id);
            return true;
        }
        for (i, value) in channel_values(frame).enumerate() {
            self.update_channel(i, value);
        }
        self.last_frame_id = frame_id;
        true
    }

    /// Classifies a frame and adapts the background channels towards it.
    ///
    /// Only frames newer than the last one consumed adapt the model. An older
    /// or repeated id returns the previous mask unchanged, or classifies the
    /// frame against the current statistics if there is no previous mask. A
    /// newer frame of a different size re-seeds the model and yields an
    /// all-foreground mask.
    pub fn apply(&mut self, frame: &RgbImage, frame_id: u64) -> &BackgroundMask {
        if frame_id > self.last_frame_id {
            let mask = self.classify(frame, frame_id);
            self.mask = Some(mask);
        } else if self.mask.is_none() {
            self.mask = Some(self.classify_without_learning(frame));
        }
        self.mask
            .get_or_insert_with(|| BackgroundMask::all_foreground(frame.width(), frame.height()))
    }

    /// Returns the mask produced by the last [`apply`](Self::apply), if any.
    pub fn mask(&self) -> Option<&BackgroundMask> {
        self.mask.as_ref()
    }

    /// Forgets the last mask; the statistics are kept.
    pub fn invalidate_mask(&mut self) {
        self.mask = None;
    }

    /// Returns the id of the newest frame consumed.
    pub fn last_frame_id(&self) -> u64 {
        self.last_frame_id
    }

    /// Returns the model size in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn classify(&mut self, frame: &RgbImage, frame_id: u64) -> BackgroundMask {
        self.last_frame_id = self.last_frame_id.max(frame_id);
        if !self.matches(frame) {
            log::debug!(
                "background model re-seeded for {}x{} frames",
                frame.width(),
                frame.height()
            );
            self.seed(frame, frame_id);
            return BackgroundMask::all_foreground(frame.width(), frame.height());
        }

        let mut confidence = Vec::with_capacity(self.mean.len());
        for (i, value) in channel_values(frame).enumerate() {
            let ratio = self.deviation_ratio(i, value);
            if ratio > 1.0 {
                confidence.push(foreground_confidence(ratio));
            } else {
                confidence.push(background_confidence(ratio));
                self.update_channel(i, value);
            }
        }
        self.mask_from(confidence)
    }

    fn classify_without_learning(&self, frame: &RgbImage) -> BackgroundMask {
        if !self.matches(frame) {
            return BackgroundMask::all_foreground(frame.width(), frame.height());
        }
        let confidence = channel_values(frame)
            .enumerate()
            .map(|(i, value)| {
                let ratio = self.deviation_ratio(i, value);
                if ratio > 1.0 {
                    foreground_confidence(ratio)
                } else {
                    background_confidence(ratio)
                }
            })
            .collect();
        self.mask_from(confidence)
    }

    fn deviation_ratio(&self, i: usize, value: f32) -> f32 {
        let deviation = value - self.mean[i];
        deviation * deviation / (self.variance_threshold * self.variance[i])
    }

    fn mask_from(&self, confidence: Vec<u8>) -> BackgroundMask {
        match RgbImage::from_raw(self.width, self.height, confidence) {
            Some(image) => BackgroundMask::from_image(image),
            None => BackgroundMask::all_foreground(self.width, self.height),
        }
    }

    fn seed(&mut self, frame: &RgbImage, frame_id: u64) {
        self.width = frame.width();
        self.height = frame.height();
        self.mean = channel_values(frame).collect();
        self.variance = vec![INITIAL_VARIANCE; self.mean.len()];
        self.last_frame_id = frame_id;
    }

    fn matches(&self, frame: &RgbImage) -> bool {
        frame.width() == self.width && frame.height() == self.height
    }

    fn update_channel(&mut self, i: usize, value: f32) {
        let deviation = value - self.mean[i];
        self.mean[i] += self.learning_rate * deviation;
        let variance =
            self.variance[i] + self.learning_rate * (deviation * deviation - self.variance[i]);
        self.variance[i] = variance.clamp(MIN_VARIANCE, MAX_VARIANCE);
    }
}

fn channel_values(frame: &RgbImage) -> impl Iterator<Item = f32> + '_ {
    frame.as_raw().iter().map(|&v| f32::from(v))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn foreground_confidence(ratio: f32) -> u8 {
    (128.0 + (ratio - 1.0) * 127.0).clamp(128.0, 255.0) as u8
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn background_confidence(ratio: f32) -> u8 {
    (ratio * 127.0).clamp(0.0, 127.0) as u8
}
