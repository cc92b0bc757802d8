use crate::error::ThresholdError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FACE_DISTANCE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_MIN_LIVENESS_THRESHOLD: f32 = 0.9;
pub const DEFAULT_DUPLICATE_FACE_THRESHOLD: f32 = 0.6;

/// How to treat a candidate whose length differs from a stored descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthPolicy {
    /// Mismatch is an `INVALID_DESCRIPTOR` failure.
    #[default]
    Strict,
    /// Compare over the overlapping prefix only (legacy behaviour).
    Truncate,
}

impl LengthPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "truncate" => Some(Self::Truncate),
            _ => None,
        }
    }
}

/// Tunable decision thresholds.
///
/// Match acceptance and duplicate detection share a default but are
/// independent decisions, so they are configured separately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Maximum nearest-neighbour distance still accepted as the same person.
    pub face_distance: f32,
    /// Minimum liveness score required before any comparison happens.
    pub min_liveness: f32,
    /// Distances strictly below this to another employee block enrollment.
    pub duplicate_distance: f32,
    pub length_policy: LengthPolicy,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            face_distance: DEFAULT_FACE_DISTANCE_THRESHOLD,
            min_liveness: DEFAULT_MIN_LIVENESS_THRESHOLD,
            duplicate_distance: DEFAULT_DUPLICATE_FACE_THRESHOLD,
            length_policy: LengthPolicy::Strict,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (name, value) in [
            ("face distance threshold", self.face_distance),
            ("duplicate face threshold", self.duplicate_distance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ThresholdError::Distance { name, value });
            }
        }
        if !(0.0..=1.0).contains(&self.min_liveness) {
            return Err(ThresholdError::Liveness(self.min_liveness));
        }
        Ok(())
    }
}
