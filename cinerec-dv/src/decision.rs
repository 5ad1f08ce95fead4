//! Decision Engine
//!
//! Per-field state machine turning a ConsensusResult into AUTO_APPROVE,
//! NEEDS_REVIEW or REJECTED:
//!
//! ```text
//! NEW -> evaluate -> { AUTO_APPROVE, NEEDS_REVIEW, REJECTED }
//!                       AUTO_APPROVE -> { APPLIED, APPLY_FAILED }
//! ```
//!
//! AUTO_APPROVE requires at least three agreeing *external* sources,
//! confidence at or above the threshold, an allow-listed field, fully
//! trusted pairings behind the winning group, and the no-regression rule:
//! a non-empty stored value is only replaced when it is itself part of the
//! winning group or the winning consensus clears the confidence gate with
//! the disagreeing stored value counted against it.

use crate::types::{
    ConsensusResult, DecisionState, FieldValue, MatchCategory, ReviewDecision, Severity,
    ValidationIssue, INTERNAL_SOURCE,
};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Descriptive fields eligible for automated writes. Identity-defining
/// fields (title, slug, name) are never auto-approved.
const DEFAULT_ALLOW_LIST: &[&str] = &[
    "synopsis",
    "director",
    "hero",
    "heroine",
    "cast",
    "music_director",
    "runtime",
    "language",
    "genre",
    "birthplace",
    "occupation",
    "bio",
];

const IDENTITY_FIELDS: &[&str] = &["title", "slug", "name"];

/// Per-field review state machine
pub struct DecisionEngine {
    /// Minimum agreeing external sources for an automated write
    min_external_agreement: usize,
    /// Minimum agreement confidence for an automated write
    auto_approve_confidence: f64,
    allow_list: BTreeSet<String>,
    identity_fields: BTreeSet<String>,
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self {
            min_external_agreement: 3,
            auto_approve_confidence: 0.8,
            allow_list: DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect(),
            identity_fields: IDENTITY_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_allow_listed(&self, field: &str) -> bool {
        self.allow_list.contains(field)
    }

    /// Evaluate one (entity, field) discrepancy
    ///
    /// `pairings` maps each contributing source to its entity-pairing
    /// category; internal and manual pseudo-sources are fully trusted.
    pub fn evaluate(
        &self,
        consensus: &ConsensusResult,
        current: Option<&FieldValue>,
        pairings: &HashMap<String, MatchCategory>,
    ) -> ReviewDecision {
        let field = consensus.field.as_str();
        let score = consensus.confidence;

        if self.identity_fields.contains(field) {
            return ReviewDecision {
                state: DecisionState::NeedsReview,
                rationale: format!(
                    "{}: identity-defining field requires explicit confirmation",
                    field
                ),
                score,
            };
        }

        // A winning group resting on a review-grade pairing is never
        // trusted automatically, whatever the agreement looks like.
        let winner = &consensus.groups[0];
        let review_paired: Vec<&str> = winner
            .sources
            .iter()
            .filter(|s| {
                pairings.get(s.as_str()) == Some(&MatchCategory::ManualReview)
            })
            .map(|s| s.as_str())
            .collect();
        if !review_paired.is_empty() {
            return ReviewDecision {
                state: DecisionState::NeedsReview,
                rationale: format!(
                    "{}: pairing for {} needs manual confirmation",
                    field,
                    review_paired.join(", ")
                ),
                score,
            };
        }

        if consensus.conflicted {
            return ReviewDecision {
                state: DecisionState::NeedsReview,
                rationale: format!(
                    "{}: conflicting claims across {} value groups",
                    field,
                    consensus.groups.len()
                ),
                score,
            };
        }

        if !self.is_allow_listed(field) {
            return ReviewDecision {
                state: DecisionState::NeedsReview,
                rationale: format!("{}: field is not auto-fixable", field),
                score,
            };
        }

        let gate_met = consensus.external_agreeing >= self.min_external_agreement
            && consensus.confidence >= self.auto_approve_confidence;

        let current_is_blank = current.map(|v| v.is_blank()).unwrap_or(true);
        let internal_in_winner = winner.contains_source(INTERNAL_SOURCE);

        if !gate_met {
            // No-regression: a trusted non-empty value is retained until a
            // consensus clears the full gate against it.
            let rationale = if !current_is_blank && !internal_in_winner {
                format!(
                    "{}: stored value retained; {} external source(s) at {:.0}% confidence is below the auto-fix bar",
                    field,
                    consensus.external_agreeing,
                    consensus.confidence * 100.0
                )
            } else {
                format!(
                    "{}: {} agreeing external source(s) at {:.0}% confidence is below the auto-fix bar",
                    field,
                    consensus.external_agreeing,
                    consensus.confidence * 100.0
                )
            };
            return ReviewDecision {
                state: DecisionState::NeedsReview,
                rationale,
                score,
            };
        }

        let rationale = if current_is_blank {
            format!(
                "{}: filled from {} agreeing external sources at {:.0}% confidence",
                field,
                consensus.external_agreeing,
                consensus.confidence * 100.0
            )
        } else if internal_in_winner {
            format!(
                "{}: stored value confirmed by {} external sources",
                field, consensus.external_agreeing
            )
        } else {
            format!(
                "{}: stored value outvoted by {} agreeing external sources at {:.0}% confidence",
                field,
                consensus.external_agreeing,
                consensus.confidence * 100.0
            )
        };

        debug!(field = field, confidence = consensus.confidence, "Auto-approve");

        ReviewDecision {
            state: DecisionState::AutoApprove,
            rationale,
            score,
        }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Decision for an entity whose every candidate pairing was rejected:
/// the comparison is voided, not a field disagreement.
pub fn rejected(rationale: impl Into<String>) -> ReviewDecision {
    ReviewDecision {
        state: DecisionState::Rejected,
        rationale: rationale.into(),
        score: 0.0,
    }
}

/// Field-level issue record for a decision, for logs and triage
///
/// Identity-defining fields are critical; unresolved conflicts warn; the
/// rest is informational.
pub fn issue_for(consensus: &ConsensusResult, decision: &ReviewDecision) -> ValidationIssue {
    let severity = if IDENTITY_FIELDS.contains(&consensus.field.as_str()) {
        Severity::Critical
    } else if consensus.conflicted {
        Severity::Warning
    } else {
        Severity::Info
    };

    ValidationIssue {
        field: consensus.field.clone(),
        severity,
        message: decision.rationale.clone(),
        auto_resolvable: decision.state == DecisionState::AutoApprove,
        suggested_action: format!("review recommendation '{}'", consensus.recommended),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusBuilder;
    use crate::types::FieldClaim;

    fn consensus_for(
        field: &str,
        claims: &[(&str, &str)],
        internal: Option<&str>,
    ) -> ConsensusResult {
        let builder = ConsensusBuilder::new(
            ["manual", "internal", "wikidata", "tmdb", "omdb", "imdb"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        let claims: Vec<FieldClaim> = claims
            .iter()
            .map(|(source, value)| FieldClaim {
                field: field.to_string(),
                value: FieldValue::text(*value),
                source: source.to_string(),
            })
            .collect();
        let internal_value = internal.map(FieldValue::text);
        builder
            .build(field, &claims, internal_value.as_ref())
            .expect("claims exist")
    }

    fn full_trust(sources: &[&str]) -> HashMap<String, MatchCategory> {
        sources
            .iter()
            .map(|s| (s.to_string(), MatchCategory::AutoApprove))
            .collect()
    }

    #[test]
    fn test_three_externals_empty_internal_auto_approves() {
        let engine = DecisionEngine::new();
        let consensus = consensus_for(
            "director",
            &[("tmdb", "X"), ("omdb", "X"), ("wikidata", "X")],
            None,
        );
        let decision = engine.evaluate(
            &consensus,
            None,
            &full_trust(&["tmdb", "omdb", "wikidata"]),
        );
        assert_eq!(decision.state, DecisionState::AutoApprove);
        assert_eq!(decision.score, 1.0);
    }

    #[test]
    fn test_confidence_boundary_is_inclusive() {
        // 4 externals against a disagreeing stored value: 4/5 = 0.8 exactly
        let engine = DecisionEngine::new();
        let consensus = consensus_for(
            "director",
            &[("tmdb", "X"), ("omdb", "X"), ("wikidata", "X"), ("imdb", "X")],
            Some("Y"),
        );
        let current = FieldValue::text("Y");
        let decision = engine.evaluate(
            &consensus,
            Some(&current),
            &full_trust(&["tmdb", "omdb", "wikidata", "imdb"]),
        );
        assert_eq!(decision.state, DecisionState::AutoApprove);
    }

    #[test]
    fn test_no_regression_blocks_three_externals_against_stored_value() {
        // 3 externals vs a non-empty stored value: 3/4 = 0.75 < 0.8
        let engine = DecisionEngine::new();
        let consensus = consensus_for(
            "director",
            &[("tmdb", "Z"), ("omdb", "Z"), ("wikidata", "Z")],
            Some("Y"),
        );
        let current = FieldValue::text("Y");
        let decision = engine.evaluate(
            &consensus,
            Some(&current),
            &full_trust(&["tmdb", "omdb", "wikidata"]),
        );
        assert_eq!(decision.state, DecisionState::NeedsReview);
        assert!(decision.rationale.contains("stored value retained"));
    }

    #[test]
    fn test_single_disagreeing_source_never_changes_stored_value() {
        let engine = DecisionEngine::new();
        let consensus = consensus_for("director", &[("tmdb", "Z")], Some("Y"));
        let current = FieldValue::text("Y");
        let decision = engine.evaluate(&consensus, Some(&current), &full_trust(&["tmdb"]));
        assert_eq!(decision.state, DecisionState::NeedsReview);
        // The recommendation itself keeps the stored value (priority
        // tie-break), so even a review approval would not regress it
        assert_eq!(consensus.recommended, FieldValue::text("Y"));
    }

    #[test]
    fn test_conflicted_consensus_needs_review() {
        let engine = DecisionEngine::new();
        let consensus = consensus_for(
            "heroine",
            &[("tmdb", "A"), ("omdb", "A"), ("wikidata", "B"), ("imdb", "B")],
            None,
        );
        assert!(consensus.conflicted);
        let decision = engine.evaluate(
            &consensus,
            None,
            &full_trust(&["tmdb", "omdb", "wikidata", "imdb"]),
        );
        assert_eq!(decision.state, DecisionState::NeedsReview);
    }

    #[test]
    fn test_identity_field_never_auto_approves() {
        let engine = DecisionEngine::new();
        let consensus = consensus_for(
            "title",
            &[("tmdb", "X"), ("omdb", "X"), ("wikidata", "X")],
            None,
        );
        let decision = engine.evaluate(
            &consensus,
            None,
            &full_trust(&["tmdb", "omdb", "wikidata"]),
        );
        assert_eq!(decision.state, DecisionState::NeedsReview);
        assert!(decision.rationale.contains("identity-defining"));
    }

    #[test]
    fn test_review_paired_source_blocks_auto_approve() {
        let engine = DecisionEngine::new();
        let consensus = consensus_for(
            "director",
            &[("tmdb", "X"), ("omdb", "X"), ("wikidata", "X")],
            None,
        );
        let mut pairings = full_trust(&["tmdb", "omdb"]);
        pairings.insert("wikidata".to_string(), MatchCategory::ManualReview);
        let decision = engine.evaluate(&consensus, None, &pairings);
        assert_eq!(decision.state, DecisionState::NeedsReview);
        assert!(decision.rationale.contains("wikidata"));
    }

    #[test]
    fn test_non_allow_listed_field_needs_review() {
        let engine = DecisionEngine::new();
        let consensus = consensus_for(
            "box_office",
            &[("tmdb", "X"), ("omdb", "X"), ("wikidata", "X")],
            None,
        );
        let decision = engine.evaluate(
            &consensus,
            None,
            &full_trust(&["tmdb", "omdb", "wikidata"]),
        );
        assert_eq!(decision.state, DecisionState::NeedsReview);
        assert!(decision.rationale.contains("not auto-fixable"));
    }

    #[test]
    fn test_rejected_decision() {
        let decision = rejected("all candidate pairings voided");
        assert_eq!(decision.state, DecisionState::Rejected);
        assert_eq!(decision.score, 0.0);
    }

    #[test]
    fn test_issue_severity_mapping() {
        let engine = DecisionEngine::new();

        let conflicted = consensus_for(
            "heroine",
            &[("tmdb", "A"), ("omdb", "A"), ("wikidata", "B"), ("imdb", "B")],
            None,
        );
        let decision = engine.evaluate(
            &conflicted,
            None,
            &full_trust(&["tmdb", "omdb", "wikidata", "imdb"]),
        );
        let issue = issue_for(&conflicted, &decision);
        assert_eq!(issue.severity, Severity::Warning);
        assert!(!issue.auto_resolvable);

        let identity = consensus_for(
            "title",
            &[("tmdb", "X"), ("omdb", "X"), ("wikidata", "X")],
            None,
        );
        let decision = engine.evaluate(
            &identity,
            None,
            &full_trust(&["tmdb", "omdb", "wikidata"]),
        );
        let issue = issue_for(&identity, &decision);
        assert_eq!(issue.severity, Severity::Critical);
    }
}
