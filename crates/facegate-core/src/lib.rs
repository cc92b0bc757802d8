//! facegate-core — Face descriptor matching for attendance marking.
//!
//! Liveness gating, nearest-neighbour matching against an employee's stored
//! descriptors, and the enrollment-time duplicate-identity check. Descriptor
//! extraction and liveness scoring are external and injected via traits.

pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod thresholds;
pub mod types;

pub use error::{MatchError, ThresholdError};
pub use matcher::{EuclideanMatcher, MatchEngine, Matcher};
pub use pipeline::{CaptureError, CapturePipeline, DescriptorExtractor, LivenessScorer};
pub use thresholds::{LengthPolicy, Thresholds};
pub use types::{
    Acceptance, AttendanceKind, Capture, Descriptor, EmployeeId, LivenessScore, MatchResult,
    ReferenceDescriptor,
};
