use crate::error::MatchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Face descriptor produced by an external embedding model (128-dim for the
/// face-api recognition net).
///
/// Always non-empty and finite. Serializes as a bare JSON array of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    /// Build a descriptor, rejecting empty or non-finite input.
    pub fn new(values: Vec<f32>) -> Result<Self, MatchError> {
        if values.is_empty() {
            return Err(MatchError::InvalidDescriptor("descriptor is empty".into()));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(MatchError::InvalidDescriptor(format!(
                "non-finite value at index {pos}"
            )));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false: construction rejects empty input.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance over the overlapping prefix of both descriptors.
    ///
    /// Lower = more similar. Length policy is enforced by the engine, not here.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = MatchError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(d: Descriptor) -> Self {
        d.values
    }
}

/// Liveness confidence for one captured frame, nominally in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LivenessScore(pub f32);

impl LivenessScore {
    pub fn value(self) -> f32 {
        self.0
    }

    /// Whether this score clears `minimum`. NaN never passes.
    pub fn passes(self, minimum: f32) -> bool {
        self.0 >= minimum
    }
}

/// Opaque key of an enrolled employee.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(pub String);

impl EmployeeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EmployeeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EmployeeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A stored descriptor together with the employee that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceDescriptor {
    pub owner: EmployeeId,
    pub descriptor: Descriptor,
}

/// Nearest neighbour of a query descriptor within a gallery. Never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Position of the winning entry in the gallery slice.
    pub index: usize,
    pub distance: f32,
}

/// Accepted attendance attempt, handed to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Acceptance {
    /// `max(0, 1 - distance)`. A display heuristic, not a probability.
    pub confidence: f32,
    pub distance: f32,
    pub liveness: LivenessScore,
}

impl Acceptance {
    pub fn confidence_for(distance: f32) -> f32 {
        (1.0 - distance).max(0.0)
    }
}

/// Direction of an attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceKind {
    #[default]
    CheckIn,
    CheckOut,
}

impl AttendanceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckIn => "CHECK_IN",
            Self::CheckOut => "CHECK_OUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "CHECK_IN" => Some(Self::CheckIn),
            "CHECK_OUT" => Some(Self::CheckOut),
            _ => None,
        }
    }
}

impl fmt::Display for AttendanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured frame handed to the external collaborators. Layout is
/// whatever the extractor and scorer agree on (JPEG bytes, raw RGB, ...).
#[derive(Debug, Clone)]
pub struct Capture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}
