//! Color-region PPE classifier.
//!
//! For each person box the classifier looks at a vertical band of the box
//! (head for helmets, torso for vests), converts it to HSV on the 8-bit
//! OpenCV scale (H 0-180, S 0-255, V 0-255) and counts the pixels that fall
//! inside any of the configured color ranges. Gear is present when the
//! matching fraction is strictly greater than the presence threshold.
//!
//! This is a threshold heuristic, not a learned model: it is sensitive to
//! lighting and to clothing that happens to share the gear colors.

use image::RgbImage;
use safeguard_models::{BoundingBox, Detection, GearCategory, GearChecks};

/// Default fraction of matching pixels required for gear to be present.
pub const DEFAULT_PRESENCE_THRESHOLD: f64 = 0.03;

/// Inclusive HSV range on the OpenCV 8-bit scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| hsv[i] >= self.lower[i] && hsv[i] <= self.upper[i])
    }
}

/// Rows of a person box, as fractions of its height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalBand {
    pub start: f64,
    pub end: f64,
}

impl VerticalBand {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Row range `[floor(start*h), floor(end*h))` relative to the box top.
    pub fn rows(&self, height: u32) -> (u32, u32) {
        let start = (self.start * height as f64).floor().max(0.0) as u32;
        let end = (self.end * height as f64).floor().max(0.0) as u32;
        (start.min(height), end.min(height))
    }
}

/// Where and what color to look for one gear category.
#[derive(Debug, Clone, PartialEq)]
pub struct GearProfile {
    pub band: VerticalBand,
    pub ranges: Vec<HsvRange>,
}

impl GearProfile {
    /// Yellow or white in the top quarter of the box.
    pub fn helmet() -> Self {
        Self {
            band: VerticalBand::new(0.0, 0.25),
            ranges: vec![
                HsvRange::new([20, 80, 80], [45, 255, 255]),
                HsvRange::new([0, 0, 180], [180, 60, 255]),
            ],
        }
    }

    /// Orange or neon green between 15% and 70% of the box height.
    pub fn vest() -> Self {
        Self {
            band: VerticalBand::new(0.15, 0.70),
            ranges: vec![
                HsvRange::new([0, 90, 90], [20, 255, 255]),
                HsvRange::new([35, 90, 90], [85, 255, 255]),
            ],
        }
    }

    fn matches(&self, hsv: [u8; 3]) -> bool {
        self.ranges.iter().any(|r| r.contains(hsv))
    }
}

/// Classifier configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub helmet: GearProfile,
    pub vest: GearProfile,
    /// Presence requires a matching fraction strictly above this
    pub presence_threshold: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            helmet: GearProfile::helmet(),
            vest: GearProfile::vest(),
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
        }
    }
}

/// Classifies person boxes as compliant or in violation.
#[derive(Debug, Clone, Default)]
pub struct PpeClassifier {
    config: ClassifierConfig,
}

impl PpeClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn profile(&self, category: GearCategory) -> &GearProfile {
        match category {
            GearCategory::Helmet => &self.config.helmet,
            GearCategory::Vest => &self.config.vest,
        }
    }

    /// Classify one person.
    ///
    /// Returns `None` when the box lies entirely outside the frame. Only the
    /// categories enabled in `checks` are examined; the others are reported
    /// absent but never make the person a violation.
    pub fn classify(
        &self,
        image: &RgbImage,
        bbox: BoundingBox,
        confidence: f32,
        checks: GearChecks,
    ) -> Option<Detection> {
        let person = bbox.clamp_to(image.width(), image.height())?;

        let helmet_present = checks.helmet && self.is_present(image, &person, GearCategory::Helmet);
        let vest_present = checks.vest && self.is_present(image, &person, GearCategory::Vest);

        Some(Detection::new(
            person,
            confidence,
            helmet_present,
            vest_present,
            checks,
        ))
    }

    /// Whether the matching fraction for `category` exceeds the threshold.
    pub fn is_present(&self, image: &RgbImage, person: &BoundingBox, category: GearCategory) -> bool {
        self.gear_fraction(image, person, category)
            .map(|fraction| fraction > self.config.presence_threshold)
            .unwrap_or(false)
    }

    /// Fraction of pixels in the category's band that match its colors.
    ///
    /// `None` when the band is empty.
    pub fn gear_fraction(
        &self,
        image: &RgbImage,
        person: &BoundingBox,
        category: GearCategory,
    ) -> Option<f64> {
        let person = person.clamp_to(image.width(), image.height())?;
        let profile = self.profile(category);
        let (row_start, row_end) = profile.band.rows(person.height);
        if row_end <= row_start {
            return None;
        }

        let x0 = person.x as u32;
        let y0 = person.y as u32;
        let mut matching = 0u64;
        let mut total = 0u64;

        for y in (y0 + row_start)..(y0 + row_end) {
            for x in x0..(x0 + person.width) {
                let [r, g, b] = image.get_pixel(x, y).0;
                if profile.matches(rgb_to_hsv8(r, g, b)) {
                    matching += 1;
                }
                total += 1;
            }
        }

        if total == 0 {
            None
        } else {
            Some(matching as f64 / total as f64)
        }
    }
}

/// Convert an RGB pixel to HSV on the OpenCV 8-bit scale.
///
/// Hue is halved to fit 0-180; saturation and value span 0-255.
pub fn rgb_to_hsv8(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (r as f64, g as f64, b as f64);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max == 0.0 { 0.0 } else { 255.0 * delta / max };

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [
        (h / 2.0).round().min(180.0) as u8,
        s.round() as u8,
        max as u8,
    ]
}
