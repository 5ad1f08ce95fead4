//! Consensus Builder
//!
//! Aggregates the per-field claims of all matched sources, plus the
//! entity's current stored value, into a recommended value with an
//! agreement confidence and a conflict flag. Claims group by normalized
//! value; the largest group wins; equally-sized groups break by the
//! configured source-priority order, never by map iteration order.
//! Minority groups are ranked below the winner but never discarded.

use crate::normalize;
use crate::types::{ClaimGroup, ConsensusResult, FieldClaim, FieldValue, INTERNAL_SOURCE};
use std::collections::HashMap;

/// Per-field claim aggregator
pub struct ConsensusBuilder {
    /// Fixed tie-break order, highest priority first
    source_priority: Vec<String>,
}

impl ConsensusBuilder {
    pub fn new(source_priority: Vec<String>) -> Self {
        Self { source_priority }
    }

    /// Rank of a source in the priority order; unknown sources rank last
    fn priority_rank(&self, source: &str) -> usize {
        self.source_priority
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.source_priority.len())
    }

    /// Build consensus for one (entity, field)
    ///
    /// `claims` come from non-rejected sources; `internal` is the current
    /// stored value, treated as one more claim under the "internal"
    /// pseudo-source. Returns None when no source asserts a non-blank
    /// value.
    pub fn build(
        &self,
        field: &str,
        claims: &[FieldClaim],
        internal: Option<&FieldValue>,
    ) -> Option<ConsensusResult> {
        let mut considered: Vec<(String, FieldValue)> = Vec::with_capacity(claims.len() + 1);

        if let Some(value) = internal {
            if !value.is_blank() {
                considered.push((INTERNAL_SOURCE.to_string(), value.clone()));
            }
        }
        for claim in claims {
            if !claim.value.is_blank() {
                considered.push((claim.source.clone(), claim.value.clone()));
            }
        }

        if considered.is_empty() {
            return None;
        }

        // Group by normalized value
        let mut by_key: HashMap<String, Vec<(String, FieldValue)>> = HashMap::new();
        for (source, value) in considered.iter() {
            let key = normalize::normalize(value);
            by_key
                .entry(key)
                .or_default()
                .push((source.clone(), value.clone()));
        }

        let total_considered = considered.len();

        let mut groups: Vec<ClaimGroup> = by_key
            .into_iter()
            .map(|(key, mut members)| {
                // Highest-priority source first; its raw spelling becomes
                // the representative value for the group
                members.sort_by(|a, b| {
                    self.priority_rank(&a.0)
                        .cmp(&self.priority_rank(&b.0))
                        .then_with(|| a.0.cmp(&b.0))
                });
                let value = members[0].1.clone();
                let sources = members.into_iter().map(|(source, _)| source).collect();
                ClaimGroup { key, value, sources }
            })
            .collect();

        // Winner first: size, then source priority, then key. The key
        // comparison exists only to pin a total order; it can decide a tie
        // solely between groups backed by identically-ranked sources.
        groups.sort_by(|a, b| {
            b.sources
                .len()
                .cmp(&a.sources.len())
                .then_with(|| self.best_rank(a).cmp(&self.best_rank(b)))
                .then_with(|| a.key.cmp(&b.key))
        });

        let winner = &groups[0];
        let agreeing_sources = winner.sources.len();
        let external_agreeing = winner
            .sources
            .iter()
            .filter(|s| s.as_str() != INTERNAL_SOURCE)
            .count();
        let confidence = agreeing_sources as f64 / total_considered as f64;

        let runner_up = groups.get(1).map(|g| g.sources.len()).unwrap_or(0);
        let multi_member_groups = groups.iter().filter(|g| g.sources.len() > 1).count();
        let conflicted = multi_member_groups >= 2
            || (groups.len() >= 2 && agreeing_sources - runner_up <= 1);

        Some(ConsensusResult {
            field: field.to_string(),
            recommended: winner.value.clone(),
            agreeing_sources,
            external_agreeing,
            total_considered,
            confidence,
            conflicted,
            groups,
        })
    }

    fn best_rank(&self, group: &ClaimGroup) -> usize {
        group
            .sources
            .iter()
            .map(|s| self.priority_rank(s))
            .min()
            .unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ConsensusBuilder {
        ConsensusBuilder::new(
            ["manual", "internal", "wikidata", "tmdb", "omdb"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    fn claim(source: &str, value: &str) -> FieldClaim {
        FieldClaim {
            field: "director".to_string(),
            value: FieldValue::text(value),
            source: source.to_string(),
        }
    }

    #[test]
    fn test_three_agreeing_externals_empty_internal() {
        let claims = vec![
            claim("tmdb", "S. S. Rajamouli"),
            claim("omdb", "Rajamouli"),
            claim("wikidata", "S.S. Rajamouli"),
        ];
        let result = builder().build("director", &claims, None).unwrap();
        assert_eq!(result.agreeing_sources, 3);
        assert_eq!(result.external_agreeing, 3);
        assert_eq!(result.confidence, 1.0);
        assert!(!result.conflicted);
        // Representative spelling comes from the highest-priority source
        assert_eq!(result.recommended, FieldValue::text("S.S. Rajamouli"));
    }

    #[test]
    fn test_two_versus_two_is_conflicted() {
        let claims = vec![
            claim("tmdb", "Kajal Aggarwal"),
            claim("omdb", "Kajal Aggarwal"),
            claim("wikidata", "Samantha"),
            claim("manual", "Samantha"),
        ];
        let result = builder().build("heroine", &claims, None).unwrap();
        assert!(result.conflicted);
        assert_eq!(result.agreeing_sources, 2);
        // Tie of equal-size groups: the group holding the higher-priority
        // source (manual) wins deterministically
        assert_eq!(result.recommended, FieldValue::text("Samantha"));
    }

    #[test]
    fn test_minority_groups_are_retained() {
        let claims = vec![
            claim("tmdb", "X"),
            claim("omdb", "X"),
            claim("wikidata", "Y"),
        ];
        let result = builder().build("director", &claims, None).unwrap();
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[1].sources, vec!["wikidata".to_string()]);
    }

    #[test]
    fn test_internal_counts_in_denominator_not_external() {
        let claims = vec![
            claim("tmdb", "X"),
            claim("omdb", "X"),
            claim("wikidata", "X"),
        ];
        let internal = FieldValue::text("X");
        let result = builder()
            .build("director", &claims, Some(&internal))
            .unwrap();
        assert_eq!(result.agreeing_sources, 4);
        assert_eq!(result.external_agreeing, 3);
        assert_eq!(result.total_considered, 4);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_disagreeing_internal_lowers_confidence() {
        let claims = vec![
            claim("tmdb", "X"),
            claim("omdb", "X"),
            claim("wikidata", "X"),
        ];
        let internal = FieldValue::text("Y");
        let result = builder()
            .build("director", &claims, Some(&internal))
            .unwrap();
        assert_eq!(result.agreeing_sources, 3);
        assert_eq!(result.total_considered, 4);
        assert!(result.confidence < 0.8);
    }

    #[test]
    fn test_single_disagreeing_external_loses_to_internal() {
        let claims = vec![claim("tmdb", "Z")];
        let internal = FieldValue::text("Y");
        let result = builder()
            .build("director", &claims, Some(&internal))
            .unwrap();
        // 1 vs 1 tie: internal has higher priority
        assert_eq!(result.recommended, FieldValue::text("Y"));
        assert!(result.conflicted);
    }

    #[test]
    fn test_arrival_order_does_not_change_result() {
        let mut claims = vec![
            claim("omdb", "B"),
            claim("tmdb", "A"),
            claim("wikidata", "B"),
        ];
        let forward = builder().build("director", &claims, None).unwrap();
        claims.reverse();
        let reversed = builder().build("director", &claims, None).unwrap();
        assert_eq!(forward.recommended, reversed.recommended);
        assert_eq!(forward.confidence, reversed.confidence);
        assert_eq!(
            forward
                .groups
                .iter()
                .map(|g| g.key.clone())
                .collect::<Vec<_>>(),
            reversed
                .groups
                .iter()
                .map(|g| g.key.clone())
                .collect::<Vec<_>>(),
        );
    }

    #[test]
    fn test_confidence_monotonic_in_agreement() {
        let two = builder()
            .build(
                "director",
                &[claim("tmdb", "X"), claim("omdb", "X"), claim("wikidata", "Y")],
                None,
            )
            .unwrap();
        let three = builder()
            .build(
                "director",
                &[
                    claim("tmdb", "X"),
                    claim("omdb", "X"),
                    claim("wikidata", "X"),
                ],
                None,
            )
            .unwrap();
        assert!(three.confidence > two.confidence);
    }

    #[test]
    fn test_blank_claims_are_ignored() {
        let claims = vec![claim("tmdb", ""), claim("omdb", "X")];
        let result = builder().build("director", &claims, None).unwrap();
        assert_eq!(result.total_considered, 1);

        assert!(builder().build("director", &[claim("tmdb", " ")], None).is_none());
    }
}
