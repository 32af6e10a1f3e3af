//! Pixel-space geometry.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An axis-aligned box in pixel coordinates of the canonical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    /// X coordinate of the top-left corner
    pub x: i32,
    /// Y coordinate of the top-left corner
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl BoundingBox {
    /// Create a new bounding box from its top-left corner and size.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a bounding box from corner coordinates. Inverted corners yield an empty box.
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0) as u32,
            height: (y2 - y1).max(0) as u32,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width as i32)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height as i32)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersect with a `frame_width` x `frame_height` frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<BoundingBox> {
        let x1 = self.x.clamp(0, frame_width as i32);
        let y1 = self.y.clamp(0, frame_height as i32);
        let x2 = self.right().clamp(0, frame_width as i32);
        let y2 = self.bottom().clamp(0, frame_height as i32);

        let clamped = BoundingBox::from_corners(x1, y1, x2, y2);
        if clamped.is_empty() {
            None
        } else {
            Some(clamped)
        }
    }
}
