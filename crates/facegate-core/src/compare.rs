//! Descriptor comparison.
//!
//! Similarity is a linear map of Euclidean distance onto a percentage:
//! `(1 - min(d, max_distance)) * 100`, clamped to [0, 100] and rounded to two
//! decimals. Comparison never fails; unusable input scores 0.

use crate::config::MatchingConfig;
use crate::types::{Descriptor, MatchConfidence};
use serde::Serialize;

/// Similarity percentage between two descriptors.
///
/// Returns 0 (and logs a warning) when either side is missing or the
/// lengths differ.
pub fn compare(a: Option<&Descriptor>, b: Option<&Descriptor>, config: &MatchingConfig) -> f32 {
    let (Some(a), Some(b)) = (a, b) else {
        tracing::warn!(
            left = a.is_some(),
            right = b.is_some(),
            "descriptor comparison with a missing descriptor"
        );
        return 0.0;
    };

    let Some(distance) = a.euclidean_distance(b) else {
        tracing::warn!(
            left = a.len(),
            right = b.len(),
            "descriptor length mismatch"
        );
        return 0.0;
    };

    let similarity = similarity_from_distance(distance, config.max_distance);
    tracing::trace!(distance, similarity, "descriptor comparison");
    similarity
}

/// [`compare`] with the default thresholds.
pub fn compare_descriptors(a: &Descriptor, b: &Descriptor) -> f32 {
    compare(Some(a), Some(b), &MatchingConfig::default())
}

/// Map a distance onto the 0–100 similarity scale.
pub fn similarity_from_distance(distance: f32, max_distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    let raw = (1.0 - distance.min(max_distance)) * 100.0;
    round2(raw.clamp(0.0, 100.0))
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Result of checking a probe descriptor against one owner's stored descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyOutcome {
    pub matched: bool,
    pub similarity_percent: f32,
    pub threshold: f32,
    pub confidence: MatchConfidence,
}

/// Face authentication: the probe matches when its similarity reaches the
/// verify threshold (inclusive).
pub fn verify(stored: Option<&Descriptor>, probe: &Descriptor, config: &MatchingConfig) -> VerifyOutcome {
    let similarity_percent = compare(stored, Some(probe), config);
    let matched = stored.is_some() && similarity_percent >= config.verify_threshold;
    tracing::debug!(similarity_percent, matched, "face verification");
    VerifyOutcome {
        matched,
        similarity_percent,
        threshold: config.verify_threshold,
        confidence: MatchConfidence::from_similarity(similarity_percent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DESCRIPTOR_LEN;
    use proptest::prelude::*;

    fn offset(d: f32) -> (Descriptor, Descriptor) {
        let a = vec![0.0f32; DESCRIPTOR_LEN];
        let mut b = a.clone();
        b[0] = d;
        (Descriptor::new(a), Descriptor::new(b))
    }

    #[test]
    fn test_distance_point_three_is_seventy_percent() {
        let (a, b) = offset(0.3);
        assert!((compare_descriptors(&a, &b) - 70.0).abs() < 0.01);
    }

    #[test]
    fn test_distance_at_or_beyond_cap_is_zero() {
        let (a, b) = offset(1.2);
        assert_eq!(compare_descriptors(&a, &b), 0.0);
        let (a, b) = offset(5.0);
        assert_eq!(compare_descriptors(&a, &b), 0.0);
    }

    #[test]
    fn test_identical_is_hundred() {
        let (a, _) = offset(0.0);
        assert_eq!(compare_descriptors(&a, &a), 100.0);
    }

    #[test]
    fn test_missing_descriptor_is_zero() {
        let (a, _) = offset(0.0);
        assert_eq!(compare(None, Some(&a), &MatchingConfig::default()), 0.0);
        assert_eq!(compare(Some(&a), None, &MatchingConfig::default()), 0.0);
    }

    #[test]
    fn test_length_mismatch_is_zero() {
        let a = Descriptor::new(vec![0.0; 128]);
        let b = Descriptor::new(vec![0.0; 64]);
        assert_eq!(compare_descriptors(&a, &b), 0.0);
    }

    #[test]
    fn test_rounds_to_two_decimals() {
        assert_eq!(similarity_from_distance(0.123456, 1.2), 87.65);
    }

    #[test]
    fn test_smaller_cap_saturates_earlier() {
        assert_eq!(similarity_from_distance(0.9, 0.5), 50.0);
    }

    #[test]
    fn test_cap_above_one_has_no_effect() {
        for d in [0.3, 0.99, 1.0, 1.5] {
            assert_eq!(similarity_from_distance(d, 1.0), similarity_from_distance(d, 5.0));
        }
        assert_eq!(similarity_from_distance(1.5, 5.0), 0.0);
    }

    #[test]
    fn test_verify_threshold_inclusive() {
        let config = MatchingConfig::default();
        let (a, b) = offset(0.25);
        let outcome = verify(Some(&a), &b, &config);
        assert!(outcome.matched);
        assert_eq!(outcome.confidence, MatchConfidence::High);

        let (a, b) = offset(0.45);
        let outcome = verify(Some(&a), &b, &config);
        assert!(!outcome.matched);
        assert_eq!(outcome.confidence, MatchConfidence::Medium);
    }

    #[test]
    fn test_verify_without_stored_descriptor() {
        let (a, _) = offset(0.0);
        let outcome = verify(None, &a, &MatchingConfig::default());
        assert!(!outcome.matched);
        assert_eq!(outcome.similarity_percent, 0.0);
    }

    fn descriptor() -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-1.0f32..1.0, DESCRIPTOR_LEN)
    }

    proptest! {
        #[test]
        fn prop_compare_is_symmetric(a in descriptor(), b in descriptor()) {
            let (a, b) = (Descriptor::new(a), Descriptor::new(b));
            prop_assert_eq!(compare_descriptors(&a, &b), compare_descriptors(&b, &a));
        }

        #[test]
        fn prop_self_similarity_is_hundred(a in descriptor()) {
            let a = Descriptor::new(a);
            prop_assert_eq!(compare_descriptors(&a, &a), 100.0);
        }

        #[test]
        fn prop_similarity_in_range(a in descriptor(), b in descriptor()) {
            let s = compare_descriptors(&Descriptor::new(a), &Descriptor::new(b));
            prop_assert!((0.0..=100.0).contains(&s));
        }

        #[test]
        fn prop_mismatched_lengths_score_zero(
            a in prop::collection::vec(-1.0f32..1.0, 1..64),
            b in prop::collection::vec(-1.0f32..1.0, 65..200),
        ) {
            prop_assert_eq!(compare_descriptors(&Descriptor::new(a), &Descriptor::new(b)), 0.0);
        }
    }
}
