use crate::types::EmployeeId;
use thiserror::Error;

/// Terminal outcome of a single matching call. Never retried internally;
/// the caller decides whether to ask for a fresh capture.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("liveness check failed: score {score} below minimum {minimum}")]
    LivenessFailed { score: f32, minimum: f32 },
    #[error("no reference descriptor on file")]
    NoReferenceData,
    #[error("face not recognized: distance {distance:.4} exceeds threshold {threshold}")]
    FaceNotRecognized { distance: f32, threshold: f32 },
    #[error("face already enrolled for employee {owner} (distance {distance:.4})")]
    DuplicateFace { owner: EmployeeId, distance: f32 },
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
}

impl MatchError {
    /// Stable kind string, suitable for IPC error names and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::LivenessFailed { .. } => "LIVENESS_FAILED",
            Self::NoReferenceData => "NO_REFERENCE_DATA",
            Self::FaceNotRecognized { .. } => "FACE_NOT_RECOGNIZED",
            Self::DuplicateFace { .. } => "DUPLICATE_FACE",
            Self::InvalidDescriptor(_) => "INVALID_DESCRIPTOR",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("{name} must be a finite, non-negative distance, got {value}")]
    Distance { name: &'static str, value: f32 },
    #[error("minimum liveness must lie in [0, 1], got {0}")]
    Liveness(f32),
}
