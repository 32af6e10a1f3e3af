//! Canonical frames.
//!
//! Every frame entering the pipeline is resized to one canonical resolution so
//! that pixel-fraction thresholds do not depend on the camera resolution and
//! the per-frame cost stays bounded.

use std::sync::Arc;

use image::{imageops, RgbImage};

/// Canonical processing resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes of one RGB24 frame at this size.
    pub fn rgb_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl Default for FrameSize {
    fn default() -> Self {
        CANONICAL_FRAME_SIZE
    }
}

/// Default processing resolution (640x360).
pub const CANONICAL_FRAME_SIZE: FrameSize = FrameSize::new(640, 360);

/// A frame at the canonical resolution.
///
/// The pixel buffer is shared so the annotated copy, the snapshot writer and
/// frame readers never copy it.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Per-source sequence number, starting at 1
    pub sequence: u64,
    pub image: Arc<RgbImage>,
}

impl Frame {
    /// Wrap an image, resizing it to `size` if needed.
    pub fn canonical(sequence: u64, image: RgbImage, size: FrameSize) -> Self {
        Self {
            sequence,
            image: Arc::new(resize_to(image, size)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Resize an image to exactly `size` (no-op when it already matches).
pub fn resize_to(image: RgbImage, size: FrameSize) -> RgbImage {
    if image.width() == size.width && image.height() == size.height {
        return image;
    }
    imageops::resize(
        &image,
        size.width,
        size.height,
        imageops::FilterType::Triangle,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_resizes() {
        let img = RgbImage::new(1920, 1080);
        let frame = Frame::canonical(1, img, CANONICAL_FRAME_SIZE);
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.height(), 360);
    }

    #[test]
    fn test_matching_size_is_untouched() {
        let mut img = RgbImage::new(640, 360);
        img.put_pixel(3, 4, image::Rgb([1, 2, 3]));
        let frame = Frame::canonical(7, img, CANONICAL_FRAME_SIZE);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.image.get_pixel(3, 4).0, [1, 2, 3]);
    }

    #[test]
    fn test_rgb_len() {
        assert_eq!(CANONICAL_FRAME_SIZE.rgb_len(), 640 * 360 * 3);
    }
}
