//! Nearest-neighbour matching and the attendance / enrollment decisions.
//!
//! Everything here is a pure function of its inputs and the configured
//! [`Thresholds`]. Callers pass a consistent snapshot of stored descriptors;
//! nothing is written or cached between calls.

use crate::error::MatchError;
use crate::thresholds::{LengthPolicy, Thresholds};
use crate::types::{Acceptance, Descriptor, LivenessScore, MatchResult, ReferenceDescriptor};

/// Strategy for locating the closest gallery entry to a query descriptor.
pub trait Matcher {
    fn nearest<'a, I>(&self, query: &Descriptor, gallery: I) -> Option<MatchResult>
    where
        I: IntoIterator<Item = &'a Descriptor>;
}

/// Euclidean nearest neighbour.
///
/// Scans every entry; the first strictly smaller distance wins, so ties
/// resolve to the earliest entry.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest<'a, I>(&self, query: &Descriptor, gallery: I) -> Option<MatchResult>
    where
        I: IntoIterator<Item = &'a Descriptor>,
    {
        let mut best: Option<MatchResult> = None;

        for (index, reference) in gallery.into_iter().enumerate() {
            let distance = query.euclidean_distance(reference);
            let is_better = match &best {
                None => true,
                Some(prev) => distance < prev.distance,
            };
            if is_better {
                best = Some(MatchResult { index, distance });
            }
        }

        best
    }
}

/// Stateless decision engine for attendance marking and enrollment.
pub struct MatchEngine<M = EuclideanMatcher> {
    thresholds: Thresholds,
    matcher: M,
}

impl MatchEngine<EuclideanMatcher> {
    pub fn new(thresholds: Thresholds) -> Self {
        Self::with_matcher(thresholds, EuclideanMatcher)
    }
}

impl Default for MatchEngine<EuclideanMatcher> {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl<M: Matcher> MatchEngine<M> {
    pub fn with_matcher(thresholds: Thresholds, matcher: M) -> Self {
        Self { thresholds, matcher }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Decide whether `candidate` belongs to the employee whose stored
    /// descriptors are `references`.
    ///
    /// Order: liveness, empty reference set, shape, nearest distance.
    pub fn evaluate_attendance(
        &self,
        candidate: &Descriptor,
        liveness: LivenessScore,
        references: &[Descriptor],
    ) -> Result<Acceptance, MatchError> {
        let minimum = self.thresholds.min_liveness;
        if !liveness.passes(minimum) {
            tracing::info!(score = liveness.value(), minimum, "attendance rejected: liveness");
            return Err(MatchError::LivenessFailed {
                score: liveness.value(),
                minimum,
            });
        }

        if references.is_empty() {
            tracing::info!("attendance rejected: no reference data");
            return Err(MatchError::NoReferenceData);
        }

        for reference in references {
            self.check_shape(candidate, reference)?;
        }

        let best = self
            .matcher
            .nearest(candidate, references)
            .ok_or(MatchError::NoReferenceData)?;

        let threshold = self.thresholds.face_distance;
        if best.distance > threshold {
            tracing::info!(
                distance = best.distance,
                threshold,
                candidates = references.len(),
                "attendance rejected: face not recognized"
            );
            return Err(MatchError::FaceNotRecognized {
                distance: best.distance,
                threshold,
            });
        }

        let confidence = Acceptance::confidence_for(best.distance);
        tracing::debug!(
            distance = best.distance,
            confidence,
            index = best.index,
            "attendance accepted"
        );

        Ok(Acceptance {
            confidence,
            distance: best.distance,
            liveness,
        })
    }

    /// Enrollment guard: fail if `candidate` is closer than the duplicate
    /// threshold to any descriptor owned by another employee.
    ///
    /// `others` must already exclude the employee being enrolled. When more
    /// than one descriptor conflicts, the nearest owner is reported.
    pub fn check_for_duplicate_identity(
        &self,
        candidate: &Descriptor,
        others: &[ReferenceDescriptor],
    ) -> Result<(), MatchError> {
        for other in others {
            self.check_shape(candidate, &other.descriptor)?;
        }

        let Some(best) = self
            .matcher
            .nearest(candidate, others.iter().map(|r| &r.descriptor))
        else {
            return Ok(());
        };

        let threshold = self.thresholds.duplicate_distance;
        if best.distance < threshold {
            let owner = others[best.index].owner.clone();
            tracing::warn!(
                owner = %owner,
                distance = best.distance,
                threshold,
                "enrollment rejected: face already bound to another employee"
            );
            return Err(MatchError::DuplicateFace {
                owner,
                distance: best.distance,
            });
        }

        tracing::debug!(
            nearest = best.distance,
            scanned = others.len(),
            "duplicate check passed"
        );
        Ok(())
    }

    fn check_shape(&self, candidate: &Descriptor, reference: &Descriptor) -> Result<(), MatchError> {
        if self.thresholds.length_policy == LengthPolicy::Strict && candidate.len() != reference.len() {
            return Err(MatchError::InvalidDescriptor(format!(
                "expected {}-dim descriptor, got {}",
                reference.len(),
                candidate.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmployeeId;

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec()).unwrap()
    }

    /// Two-dimensional descriptor at `distance` from the origin along x.
    fn at(distance: f32) -> Descriptor {
        d(&[distance, 0.0])
    }

    fn origin() -> Descriptor {
        d(&[0.0, 0.0])
    }

    fn owned(owner: &str, descriptor: Descriptor) -> ReferenceDescriptor {
        ReferenceDescriptor { owner: owner.into(), descriptor }
    }

    #[test]
    fn test_accepts_close_match() {
        let engine = MatchEngine::default();
        let result = engine
            .evaluate_attendance(&origin(), LivenessScore(0.95), &[at(0.45)])
            .unwrap();
        assert!((result.distance - 0.45).abs() < 1e-6);
        assert!((result.confidence - 0.55).abs() < 1e-6);
        assert_eq!(result.liveness, LivenessScore(0.95));
    }

    #[test]
    fn test_liveness_checked_before_distance() {
        let engine = MatchEngine::default();
        let err = engine
            .evaluate_attendance(&origin(), LivenessScore(0.5), &[at(0.45)])
            .unwrap_err();
        assert_eq!(err, MatchError::LivenessFailed { score: 0.5, minimum: 0.9 });
    }

    #[test]
    fn test_liveness_fails_even_for_identical_descriptor() {
        let engine = MatchEngine::default();
        let err = engine
            .evaluate_attendance(&origin(), LivenessScore(0.89), &[origin()])
            .unwrap_err();
        assert_eq!(err.code(), "LIVENESS_FAILED");
    }

    #[test]
    fn test_liveness_nan_fails() {
        let engine = MatchEngine::default();
        let err = engine
            .evaluate_attendance(&origin(), LivenessScore(f32::NAN), &[origin()])
            .unwrap_err();
        assert_eq!(err.code(), "LIVENESS_FAILED");
    }

    #[test]
    fn test_rejects_distant_face() {
        let engine = MatchEngine::default();
        let err = engine
            .evaluate_attendance(&origin(), LivenessScore(0.95), &[at(0.72)])
            .unwrap_err();
        match err {
            MatchError::FaceNotRecognized { distance, threshold } => {
                assert!((distance - 0.72).abs() < 1e-6);
                assert_eq!(threshold, 0.6);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_distance_equal_to_threshold_accepts() {
        let engine = MatchEngine::new(Thresholds { face_distance: 0.5, ..Default::default() });
        assert!(engine
            .evaluate_attendance(&origin(), LivenessScore(1.0), &[at(0.5)])
            .is_ok());
    }

    #[test]
    fn test_empty_references() {
        let engine = MatchEngine::default();
        let err = engine
            .evaluate_attendance(&origin(), LivenessScore(0.95), &[])
            .unwrap_err();
        assert_eq!(err, MatchError::NoReferenceData);
    }

    #[test]
    fn test_picks_nearest_not_first_or_last() {
        let engine = MatchEngine::default();
        let references = [at(0.58), at(0.1), at(0.4)];
        let result = engine
            .evaluate_attendance(&origin(), LivenessScore(0.99), &references)
            .unwrap();
        assert!((result.distance - 0.1).abs() < 1e-6);

        let nearest = EuclideanMatcher.nearest(&origin(), &references).unwrap();
        assert_eq!(nearest.index, 1);
    }

    #[test]
    fn test_nearest_tie_keeps_earliest() {
        let gallery = [at(0.3), d(&[0.0, 0.3]), at(0.3)];
        let nearest = EuclideanMatcher.nearest(&origin(), &gallery).unwrap();
        assert_eq!(nearest.index, 0);
    }

    #[test]
    fn test_nearest_empty_gallery() {
        assert!(EuclideanMatcher.nearest(&origin(), &[]).is_none());
    }

    #[test]
    fn test_lowering_threshold_only_rejects_more() {
        let references = [at(0.35)];
        let mut previously_accepted = true;
        for threshold in [0.8, 0.6, 0.4, 0.35, 0.3, 0.1] {
            let engine = MatchEngine::new(Thresholds { face_distance: threshold, ..Default::default() });
            let accepted = engine
                .evaluate_attendance(&origin(), LivenessScore(1.0), &references)
                .is_ok();
            assert!(previously_accepted || !accepted, "threshold {threshold} re-accepted");
            previously_accepted = accepted;
        }
        assert!(!previously_accepted);
    }

    #[test]
    fn test_strict_length_mismatch_is_invalid() {
        let engine = MatchEngine::default();
        let err = engine
            .evaluate_attendance(&d(&[0.0, 0.0, 0.0]), LivenessScore(0.95), &[origin()])
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidDescriptor(_)));
    }

    #[test]
    fn test_truncate_policy_compares_prefix() {
        let engine = MatchEngine::new(Thresholds {
            length_policy: LengthPolicy::Truncate,
            ..Default::default()
        });
        let result = engine
            .evaluate_attendance(&d(&[0.0, 0.0, 9.0]), LivenessScore(0.95), &[origin()])
            .unwrap();
        assert_eq!(result.distance, 0.0);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_duplicate_detected_names_owner() {
        let engine = MatchEngine::default();
        let others = [owned("bob", at(0.3))];
        let err = engine
            .check_for_duplicate_identity(&origin(), &others)
            .unwrap_err();
        match err {
            MatchError::DuplicateFace { owner, distance } => {
                assert_eq!(owner, EmployeeId::from("bob"));
                assert!((distance - 0.3).abs() < 1e-6);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_reports_nearest_conflict() {
        let engine = MatchEngine::default();
        let others = [
            owned("far", at(2.0)),
            owned("near", at(0.5)),
            owned("nearest", at(0.2)),
        ];
        let err = engine
            .check_for_duplicate_identity(&origin(), &others)
            .unwrap_err();
        assert!(matches!(err, MatchError::DuplicateFace { ref owner, .. } if owner.as_str() == "nearest"));
    }

    #[test]
    fn test_duplicate_at_threshold_is_allowed() {
        let engine = MatchEngine::new(Thresholds { duplicate_distance: 0.5, ..Default::default() });
        assert!(engine
            .check_for_duplicate_identity(&origin(), &[owned("bob", at(0.5))])
            .is_ok());
    }

    #[test]
    fn test_duplicate_threshold_independent_of_match_threshold() {
        let engine = MatchEngine::new(Thresholds {
            face_distance: 0.6,
            duplicate_distance: 0.2,
            ..Default::default()
        });
        assert!(engine
            .check_for_duplicate_identity(&origin(), &[owned("bob", at(0.3))])
            .is_ok());
    }

    #[test]
    fn test_duplicate_check_empty_roster() {
        let engine = MatchEngine::default();
        assert!(engine.check_for_duplicate_identity(&origin(), &[]).is_ok());
    }
}
