//! Depth camera contract.
//!
//! Frame acquisition is not part of this crate: a driver implements
//! [`DepthCamera`] and hands out [`DepthShot`]s. [`ReplayCamera`] replays
//! prepared shots for tests and offline runs.

use std::collections::VecDeque;

use glam::{Vec2, Vec3};
use image::RgbImage;

/// One depth+color frame.
///
/// `points` and `color_coords` are indexed by depth pixel (row-major,
/// `width × height`). Invalid pixels carry non-finite values.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthShot {
    /// Monotonically increasing frame id.
    pub frame_id: u64,
    /// Depth grid width.
    pub width: u32,
    /// Depth grid height.
    pub height: u32,
    /// Camera-space position of each depth pixel.
    pub points: Vec<Vec3>,
    /// Color image, possibly sized differently from the depth grid.
    pub color: RgbImage,
    /// Fractional color-image coordinate of each depth pixel.
    pub color_coords: Vec<Vec2>,
}

impl DepthShot {
    /// Returns the number of depth pixels.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.points.len().min(self.color_coords.len())
    }
}

/// A source of depth shots.
pub trait DepthCamera: Send {
    /// Returns the most recent shot, or `None` if no frame is ready yet.
    ///
    /// Calling this repeatedly may return the same frame id; callers compare
    /// ids to detect new frames.
    fn latest_shot(&mut self) -> Option<DepthShot>;
}

/// Camera that replays a queue of prepared shots.
///
/// Each call moves to the next queued shot if there is one, and otherwise
/// keeps returning the last shot handed out.
#[derive(Debug, Default)]
pub struct ReplayCamera {
    queue: VecDeque<DepthShot>,
    current: Option<DepthShot>,
}

impl ReplayCamera {
    /// Creates a camera with no frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a camera that replays `shots` in order.
    pub fn from_shots(shots: impl IntoIterator<Item = DepthShot>) -> Self {
        Self {
            queue: shots.into_iter().collect(),
            current: None,
        }
    }

    /// Queues another shot.
    pub fn push(&mut self, shot: DepthShot) {
        self.queue.push_back(shot);
    }

    /// Returns the number of shots not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl DepthCamera for ReplayCamera {
    fn latest_shot(&mut self) -> Option<DepthShot> {
        if let Some(next) = self.queue.pop_front() {
            self.current = Some(next);
        }
        self.current.clone()
    }
}
