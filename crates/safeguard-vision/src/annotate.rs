//! Overlay drawing.
//!
//! Each detection gets an outline in its status color and a label tab above
//! it carrying the status text, e.g. `Violation: No Helmet, No Vest`.

use std::sync::OnceLock;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use safeguard_models::Detection;

pub const COMPLIANT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const VIOLATION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Outline thickness in pixels.
const THICKNESS: u32 = 2;
/// Label glyph height in pixels.
const LABEL_SCALE: f32 = 13.0;
const LABEL_PADDING: u32 = 2;

static LABEL_FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSansMono-Bold.ttf");

fn label_font() -> Option<&'static Font<'static>> {
    static FONT: OnceLock<Option<Font<'static>>> = OnceLock::new();
    FONT.get_or_init(|| Font::try_from_bytes(LABEL_FONT_DATA)).as_ref()
}

/// Height of the label tab drawn above each box.
pub fn label_height() -> u32 {
    LABEL_SCALE.ceil() as u32 + 2 * LABEL_PADDING
}

pub fn color_for(detection: &Detection) -> Rgb<u8> {
    if detection.is_violation() {
        VIOLATION_COLOR
    } else {
        COMPLIANT_COLOR
    }
}

/// Copy of `image` with every detection outlined in its status color.
pub fn annotate(image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut out = image.clone();
    for detection in detections {
        draw_detection(&mut out, detection);
    }
    out
}

fn draw_detection(image: &mut RgbImage, detection: &Detection) {
    let Some(bbox) = detection.bbox.clamp_to(image.width(), image.height()) else {
        return;
    };
    let color = color_for(detection);

    for inset in 0..THICKNESS {
        let w = bbox.width.saturating_sub(2 * inset);
        let h = bbox.height.saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at(bbox.x + inset as i32, bbox.y + inset as i32).of_size(w, h);
        draw_hollow_rect_mut(image, rect, color);
    }

    draw_label(image, bbox.x, bbox.y, bbox.width, &detection.label(), color);
}

/// Filled tab ending at `box_y`, shifted below the top edge when there is no
/// room above the box.
fn draw_label(
    image: &mut RgbImage,
    x: i32,
    box_y: i32,
    min_width: u32,
    text: &str,
    color: Rgb<u8>,
) {
    let scale = Scale::uniform(LABEL_SCALE);
    let height = label_height();
    let font = label_font();
    let text_width = font
        .map(|font| text_size(scale, font, text).0.max(0) as u32)
        .unwrap_or(0);
    let width = min_width.max(text_width + 2 * LABEL_PADDING);
    let y = (box_y - height as i32).max(0);

    draw_filled_rect_mut(image, Rect::at(x, y).of_size(width, height), color);
    if let Some(font) = font {
        let pad = LABEL_PADDING as i32;
        draw_text_mut(image, LABEL_TEXT_COLOR, x + pad, y + pad, scale, font, text);
    }
}
