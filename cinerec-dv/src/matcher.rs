//! Entity Matcher
//!
//! Decides whether a provider's candidate record denotes the *same*
//! real-world entity as the internal record, before any field values are
//! compared. The pairing is classified from token-based title similarity
//! (0-100) and the year delta:
//!
//! - **AUTO_APPROVE**: same entity, claims trusted fully:
//!   `year_delta <= 1 && title_similarity == 100`
//! - **MANUAL_REVIEW**: plausible; claims recorded but always routed to
//!   human review
//! - **REJECT**: probable false match (`year_delta > 2`, or similarity
//!   below 90 with any real year drift); claims discarded entirely
//!
//! A record resolved through a stored provider id skips fuzzy matching.

use crate::normalize;
use crate::types::{Entity, MatchCategory, MatchDecision, SourceRecord};
use tracing::debug;

/// Entity pairing classifier
pub struct EntityMatcher {
    /// Year delta allowed for a fully trusted pairing
    auto_year_tolerance: i64,
    /// Year delta beyond which the pairing is discarded
    reject_year_delta: i64,
    /// Similarity floor (0-100) for a review-worthy pairing
    review_similarity_floor: f64,
}

impl EntityMatcher {
    pub fn new() -> Self {
        Self {
            auto_year_tolerance: 1,
            reject_year_delta: 2,
            review_similarity_floor: 90.0,
        }
    }

    /// Token-sorted title similarity on normalized forms, scaled 0-100
    ///
    /// Identical normalized token sets score exactly 100, so word order,
    /// case, punctuation and diacritics never cost a pairing full trust.
    pub fn title_similarity(&self, a: &str, b: &str) -> f64 {
        let a = normalize::token_sorted(a);
        let b = normalize::token_sorted(b);
        if a == b {
            return 100.0;
        }
        strsim::normalized_levenshtein(&a, &b) * 100.0
    }

    /// Classify one (internal entity, source candidate) pairing
    pub fn classify(&self, entity: &Entity, record: &SourceRecord) -> MatchDecision {
        if record.resolved_by_id {
            return MatchDecision {
                category: MatchCategory::AutoApprove,
                title_similarity: 100.0,
                year_delta: None,
                rationale: format!("{}: resolved by stored identifier", record.source),
            };
        }

        let similarity = self.title_similarity(&entity.title, &record.title);
        let year_delta = match (entity.year, record.year) {
            (Some(internal), Some(candidate)) => {
                Some((i64::from(internal) - i64::from(candidate)).abs())
            }
            _ => None,
        };

        let category = self.categorize(similarity, year_delta);

        let rationale = match year_delta {
            Some(delta) => format!(
                "{}: title similarity {:.0}, year delta {}",
                record.source, similarity, delta
            ),
            None => format!(
                "{}: title similarity {:.0}, year unavailable",
                record.source, similarity
            ),
        };

        debug!(
            source = %record.source,
            similarity = similarity,
            year_delta = ?year_delta,
            category = category.as_str(),
            "Pairing classified"
        );

        MatchDecision {
            category,
            title_similarity: similarity,
            year_delta,
            rationale,
        }
    }

    fn categorize(&self, similarity: f64, year_delta: Option<i64>) -> MatchCategory {
        let Some(delta) = year_delta else {
            // Without a year on both sides the pairing can never be fully
            // trusted; a strong title keeps it reviewable.
            return if similarity >= self.review_similarity_floor {
                MatchCategory::ManualReview
            } else {
                MatchCategory::Reject
            };
        };

        if delta > self.reject_year_delta {
            return MatchCategory::Reject;
        }
        if similarity >= 100.0 && delta <= self.auto_year_tolerance {
            return MatchCategory::AutoApprove;
        }
        if similarity >= self.review_similarity_floor {
            return MatchCategory::ManualReview;
        }
        if delta > self.auto_year_tolerance {
            // Weak title with real year drift: probable false match
            return MatchCategory::Reject;
        }
        MatchCategory::ManualReview
    }
}

impl Default for EntityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityKind, FieldValue};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn entity(title: &str, year: Option<i32>) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            kind: EntityKind::Movie,
            title: title.to_string(),
            year,
            fields: HashMap::new(),
            external_ids: HashMap::new(),
            grade: None,
            last_verified_at: None,
            needs_manual_review: false,
            updated_at: String::new(),
        }
    }

    fn record(title: &str, year: Option<i32>) -> SourceRecord {
        SourceRecord {
            source: "tmdb".to_string(),
            title: title.to_string(),
            year,
            fields: HashMap::from([("director".to_string(), FieldValue::text("X"))]),
            url: None,
            fetched_at: Utc::now(),
            resolved_by_id: false,
            match_decision: None,
        }
    }

    #[test]
    fn test_exact_title_year_delta_one_is_auto() {
        let matcher = EntityMatcher::new();
        let decision = matcher.classify(&entity("Magadheera", Some(2009)), &record("Magadheera", Some(2010)));
        assert_eq!(decision.category, MatchCategory::AutoApprove);
        assert_eq!(decision.title_similarity, 100.0);
        assert_eq!(decision.year_delta, Some(1));
    }

    #[test]
    fn test_close_title_year_delta_two_is_review() {
        let matcher = EntityMatcher::new();
        // "Magadheeraa" vs "Magadheera": one edit in 11 chars, ~91
        let decision = matcher.classify(&entity("Magadheeraa", Some(2009)), &record("Magadheera", Some(2011)));
        assert_eq!(decision.category, MatchCategory::ManualReview);
    }

    #[test]
    fn test_distant_year_is_reject() {
        let matcher = EntityMatcher::new();
        let decision = matcher.classify(&entity("Magadheera", Some(2009)), &record("Mahanati", Some(2014)));
        assert_eq!(decision.category, MatchCategory::Reject);
        assert_eq!(decision.year_delta, Some(5));
    }

    #[test]
    fn test_exact_title_distant_year_is_reject() {
        // Remakes and re-releases share a title; year drift beyond two
        // still voids the pairing.
        let matcher = EntityMatcher::new();
        let decision = matcher.classify(&entity("Devadasu", Some(1953)), &record("Devadasu", Some(2006)));
        assert_eq!(decision.category, MatchCategory::Reject);
    }

    #[test]
    fn test_weak_title_small_drift_is_reject() {
        let matcher = EntityMatcher::new();
        let decision = matcher.classify(&entity("Sye", Some(2004)), &record("Eega", Some(2006)));
        assert_eq!(decision.category, MatchCategory::Reject);
    }

    #[test]
    fn test_word_order_and_case_score_full_similarity() {
        let matcher = EntityMatcher::new();
        assert_eq!(matcher.title_similarity("The Lion King", "lion king, the"), 100.0);
    }

    #[test]
    fn test_missing_year_caps_at_review() {
        let matcher = EntityMatcher::new();
        let decision = matcher.classify(&entity("Magadheera", Some(2009)), &record("Magadheera", None));
        assert_eq!(decision.category, MatchCategory::ManualReview);

        let weak = matcher.classify(&entity("Magadheera", Some(2009)), &record("Mahanati", None));
        assert_eq!(weak.category, MatchCategory::Reject);
    }

    #[test]
    fn test_resolved_by_id_skips_fuzzy_match() {
        let matcher = EntityMatcher::new();
        let mut rec = record("Completely Different Title", Some(1970));
        rec.resolved_by_id = true;
        let decision = matcher.classify(&entity("Magadheera", Some(2009)), &rec);
        assert_eq!(decision.category, MatchCategory::AutoApprove);
    }
}
