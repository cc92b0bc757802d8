//! Capture pipeline: external descriptor extraction and liveness scoring in
//! front of the [`MatchEngine`].
//!
//! Both models are heavyweight and live outside this crate. They are injected
//! through [`DescriptorExtractor`] and [`LivenessScorer`] so the decision logic
//! can run against synthetic descriptors and scores.

use crate::error::MatchError;
use crate::matcher::{EuclideanMatcher, MatchEngine, Matcher};
use crate::types::{Acceptance, Capture, Descriptor, LivenessScore, ReferenceDescriptor};
use thiserror::Error;

/// Maps a captured frame to a face descriptor.
pub trait DescriptorExtractor {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fails when no usable face is found in the frame.
    fn extract(&mut self, capture: &Capture) -> Result<Descriptor, Self::Error>;
}

/// Maps a captured frame to a liveness score in [0, 1].
pub trait LivenessScorer {
    type Error: std::error::Error + Send + Sync + 'static;

    fn score(&mut self, capture: &Capture) -> Result<LivenessScore, Self::Error>;
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("liveness scoring failed: {0}")]
    Liveness(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("descriptor extraction failed: {0}")]
    Extraction(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Match(#[from] MatchError),
}

pub struct CapturePipeline<E, L, M = EuclideanMatcher> {
    extractor: E,
    scorer: L,
    engine: MatchEngine<M>,
}

impl<E, L, M> CapturePipeline<E, L, M>
where
    E: DescriptorExtractor,
    L: LivenessScorer,
    M: Matcher,
{
    pub fn new(extractor: E, scorer: L, engine: MatchEngine<M>) -> Self {
        Self { extractor, scorer, engine }
    }

    pub fn engine(&self) -> &MatchEngine<M> {
        &self.engine
    }

    /// Score, extract, then decide. A low liveness score short-circuits
    /// before the extractor runs.
    pub fn evaluate(
        &mut self,
        capture: &Capture,
        references: &[Descriptor],
    ) -> Result<Acceptance, CaptureError> {
        let liveness = self
            .scorer
            .score(capture)
            .map_err(|e| CaptureError::Liveness(Box::new(e)))?;

        let minimum = self.engine.thresholds().min_liveness;
        if !liveness.passes(minimum) {
            return Err(MatchError::LivenessFailed {
                score: liveness.value(),
                minimum,
            }
            .into());
        }

        let candidate = self
            .extractor
            .extract(capture)
            .map_err(|e| CaptureError::Extraction(Box::new(e)))?;

        Ok(self.engine.evaluate_attendance(&candidate, liveness, references)?)
    }

    /// Extract a descriptor for enrollment and run the duplicate-identity
    /// check against `others`. Returns the descriptor to store.
    pub fn enroll(
        &mut self,
        capture: &Capture,
        others: &[ReferenceDescriptor],
    ) -> Result<Descriptor, CaptureError> {
        let candidate = self
            .extractor
            .extract(capture)
            .map_err(|e| CaptureError::Extraction(Box::new(e)))?;
        self.engine.check_for_duplicate_identity(&candidate, others)?;
        Ok(candidate)
    }
}
