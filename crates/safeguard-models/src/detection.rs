//! Per-person detection results and gear compliance.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BoundingBox;

/// Category of protective gear the classifier can check for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GearCategory {
    Helmet,
    Vest,
}

impl GearCategory {
    /// All gear categories, in violation-label precedence order.
    pub const ALL: &'static [GearCategory] = &[GearCategory::Helmet, GearCategory::Vest];

    pub fn as_str(&self) -> &'static str {
        match self {
            GearCategory::Helmet => "helmet",
            GearCategory::Vest => "vest",
        }
    }

    /// Human-readable label for a missing item of this category.
    pub fn missing_label(&self) -> &'static str {
        match self {
            GearCategory::Helmet => "No Helmet",
            GearCategory::Vest => "No Vest",
        }
    }
}

impl fmt::Display for GearCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which gear categories are required (and therefore checked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct GearChecks {
    pub helmet: bool,
    pub vest: bool,
}

impl Default for GearChecks {
    fn default() -> Self {
        Self {
            helmet: true,
            vest: true,
        }
    }
}

impl GearChecks {
    /// Check only the given categories.
    pub fn only(categories: &[GearCategory]) -> Self {
        Self {
            helmet: categories.contains(&GearCategory::Helmet),
            vest: categories.contains(&GearCategory::Vest),
        }
    }

    pub fn is_enabled(&self, category: GearCategory) -> bool {
        match category {
            GearCategory::Helmet => self.helmet,
            GearCategory::Vest => self.vest,
        }
    }

    /// Enabled categories in precedence order.
    pub fn enabled(&self) -> impl Iterator<Item = GearCategory> + '_ {
        GearCategory::ALL
            .iter()
            .copied()
            .filter(move |c| self.is_enabled(*c))
    }
}

/// Per-person compliance classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum ComplianceStatus {
    #[default]
    Compliant,
    Violation,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Compliant => "Compliant",
            ComplianceStatus::Violation => "Violation",
        }
    }

    /// Overall status of a set of detections: a single violating person makes the set a violation.
    pub fn of_all(detections: &[Detection]) -> Self {
        if detections.iter().any(Detection::is_violation) {
            ComplianceStatus::Violation
        } else {
            ComplianceStatus::Compliant
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected person with gear findings.
///
/// Created fresh each time detection runs and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub helmet_present: bool,
    pub vest_present: bool,
    /// Categories that were checked when this detection was classified
    pub checks: GearChecks,
    pub status: ComplianceStatus,
}

impl Detection {
    /// Build a detection, deriving the compliance status from the findings.
    pub fn new(
        bbox: BoundingBox,
        confidence: f32,
        helmet_present: bool,
        vest_present: bool,
        checks: GearChecks,
    ) -> Self {
        let missing_helmet = checks.helmet && !helmet_present;
        let missing_vest = checks.vest && !vest_present;
        let status = if missing_helmet || missing_vest {
            ComplianceStatus::Violation
        } else {
            ComplianceStatus::Compliant
        };

        Self {
            bbox,
            confidence,
            helmet_present,
            vest_present,
            checks,
            status,
        }
    }

    pub fn is_violation(&self) -> bool {
        self.status == ComplianceStatus::Violation
    }

    pub fn is_present(&self, category: GearCategory) -> bool {
        match category {
            GearCategory::Helmet => self.helmet_present,
            GearCategory::Vest => self.vest_present,
        }
    }

    /// Checked categories found missing, in precedence order.
    pub fn missing_gear(&self) -> Vec<GearCategory> {
        self.checks
            .enabled()
            .filter(|c| !self.is_present(*c))
            .collect()
    }

    /// Overlay label, e.g. `"Violation: No Helmet, No Vest"`.
    pub fn label(&self) -> String {
        let missing: Vec<&str> = self
            .missing_gear()
            .iter()
            .map(GearCategory::missing_label)
            .collect();

        if missing.is_empty() {
            self.status.to_string()
        } else {
            format!("{}: {}", self.status, missing.join(", "))
        }
    }
}
