//! Duplicate-identity search over stored face records.

use crate::compare;
use crate::config::MatchingConfig;
use crate::types::{Descriptor, DuplicateCandidate, FaceIdentityRecord, MatchConfidence};

/// Parameters of one duplicate search.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateQuery {
    /// Owner being enrolled; never reported as their own duplicate.
    pub exclude_owner: Option<String>,
    /// Candidates must score strictly above this percentage.
    pub threshold: f32,
    pub limit: Option<usize>,
}

impl Default for DuplicateQuery {
    fn default() -> Self {
        Self {
            exclude_owner: None,
            threshold: crate::config::DUPLICATE_THRESHOLD,
            limit: None,
        }
    }
}

impl DuplicateQuery {
    pub fn from_config(config: &MatchingConfig) -> Self {
        Self {
            threshold: config.duplicate_threshold,
            ..Self::default()
        }
    }

    pub fn excluding(mut self, owner_id: impl Into<String>) -> Self {
        self.exclude_owner = Some(owner_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Rank stored records by similarity to `target`.
///
/// Records without a usable descriptor are skipped rather than failing the
/// search. Results are ordered by descending similarity; equal scores keep
/// their input order.
pub fn find_duplicates(
    target: &Descriptor,
    candidates: &[FaceIdentityRecord],
    query: &DuplicateQuery,
    config: &MatchingConfig,
) -> Vec<DuplicateCandidate> {
    let mut skipped = 0usize;
    let mut matches: Vec<DuplicateCandidate> = Vec::new();

    for (index, record) in candidates.iter().enumerate() {
        if query.exclude_owner.as_deref() == Some(record.owner_id.as_str()) {
            continue;
        }
        let Some(descriptor) = record.descriptor.as_ref() else {
            tracing::debug!(owner = %record.owner_id, "record has no descriptor; skipped");
            skipped += 1;
            continue;
        };
        if descriptor.len() != target.len() {
            tracing::warn!(
                owner = %record.owner_id,
                expected = target.len(),
                actual = descriptor.len(),
                "stored descriptor has wrong length; skipped"
            );
            skipped += 1;
            continue;
        }

        let similarity_percent = compare::compare(Some(target), Some(descriptor), config);
        if similarity_percent > query.threshold {
            matches.push(DuplicateCandidate {
                owner_id: record.owner_id.clone(),
                similarity_percent,
                record_index: index,
                confidence: MatchConfidence::from_similarity(similarity_percent),
            });
        }
    }

    // Vec::sort_by is stable, which keeps ties in input order.
    matches.sort_by(|a, b| b.similarity_percent.total_cmp(&a.similarity_percent));
    if let Some(limit) = query.limit {
        matches.truncate(limit);
    }

    tracing::debug!(
        searched = candidates.len(),
        skipped,
        found = matches.len(),
        threshold = query.threshold,
        "duplicate search finished"
    );
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QualityLabel, DESCRIPTOR_LEN};
    use chrono::Utc;
    use proptest::prelude::*;

    fn at_distance(d: f32) -> Descriptor {
        let mut v = vec![0.0f32; DESCRIPTOR_LEN];
        v[0] = d;
        Descriptor::new(v)
    }

    fn record(owner: &str, descriptor: Option<Descriptor>) -> FaceIdentityRecord {
        FaceIdentityRecord {
            owner_id: owner.into(),
            descriptor,
            quality_label: QualityLabel::Good,
            captured_at: Utc::now(),
        }
    }

    fn search(records: &[FaceIdentityRecord], query: &DuplicateQuery) -> Vec<DuplicateCandidate> {
        find_duplicates(&at_distance(0.0), records, query, &MatchingConfig::default())
    }

    #[test]
    fn test_two_of_five_exceed_threshold() {
        let records = vec![
            record("far", Some(at_distance(0.9))),
            record("close", Some(at_distance(0.25))),
            record("mid", Some(at_distance(0.5))),
            record("closest", Some(at_distance(0.1))),
            record("gone", Some(at_distance(1.5))),
        ];
        let found = search(&records, &DuplicateQuery::default());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].owner_id, "closest");
        assert_eq!(found[0].record_index, 3);
        assert_eq!(found[1].owner_id, "close");
        assert!(found[0].similarity_percent > found[1].similarity_percent);
        assert!(found.iter().all(|c| c.similarity_percent > 70.0));
    }

    #[test]
    fn test_threshold_is_strict() {
        let records = vec![record("edge", Some(at_distance(0.2)))];
        let query = DuplicateQuery { threshold: 80.0, ..DuplicateQuery::default() };
        assert!(search(&records, &query).is_empty());
    }

    #[test]
    fn test_excluded_owner_never_reported() {
        let records = vec![
            record("self", Some(at_distance(0.0))),
            record("other", Some(at_distance(0.1))),
        ];
        let found = search(&records, &DuplicateQuery::default().excluding("self"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].owner_id, "other");
    }

    #[test]
    fn test_malformed_records_skipped() {
        let records = vec![
            record("none", None),
            record("short", Some(Descriptor::new(vec![0.0; 64]))),
            record("ok", Some(at_distance(0.1))),
        ];
        let found = search(&records, &DuplicateQuery::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].owner_id, "ok");
        assert_eq!(found[0].record_index, 2);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let records = vec![
            record("b", Some(at_distance(0.1))),
            record("a", Some(at_distance(0.1))),
            record("c", Some(at_distance(0.05))),
        ];
        let found = search(&records, &DuplicateQuery::default());
        let owners: Vec<&str> = found.iter().map(|c| c.owner_id.as_str()).collect();
        assert_eq!(owners, ["c", "b", "a"]);
    }

    #[test]
    fn test_limit_truncates_after_sorting() {
        let records = vec![
            record("x", Some(at_distance(0.2))),
            record("y", Some(at_distance(0.0))),
            record("z", Some(at_distance(0.1))),
        ];
        let found = search(&records, &DuplicateQuery::default().with_limit(2));
        let owners: Vec<&str> = found.iter().map(|c| c.owner_id.as_str()).collect();
        assert_eq!(owners, ["y", "z"]);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(search(&[], &DuplicateQuery::default()).is_empty());
    }

    fn records_strategy() -> impl Strategy<Value = Vec<(u8, f32)>> {
        prop::collection::vec((0u8..6, 0.0f32..1.5), 0..24)
    }

    proptest! {
        #[test]
        fn prop_results_sorted_above_threshold_and_exclusive(
            entries in records_strategy(),
            threshold in 0.0f32..100.0,
            excluded in 0u8..6,
        ) {
            let records: Vec<FaceIdentityRecord> = entries
                .iter()
                .map(|(owner, d)| record(&format!("owner-{owner}"), Some(at_distance(*d))))
                .collect();
            let excluded = format!("owner-{excluded}");
            let query = DuplicateQuery { threshold, ..DuplicateQuery::default() }.excluding(excluded.clone());
            let found = search(&records, &query);

            prop_assert!(found.windows(2).all(|w| w[0].similarity_percent >= w[1].similarity_percent));
            prop_assert!(found.iter().all(|c| c.similarity_percent > threshold));
            prop_assert!(found.iter().all(|c| c.owner_id != excluded));
            prop_assert!(found.iter().all(|c| records[c.record_index].owner_id == c.owner_id));
        }
    }
}
