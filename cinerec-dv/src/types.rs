//! Core Types and Trait Definitions for cinerec-dv
//!
//! Defines the shared data model for the reconciliation pipeline:
//! - **Source Connectors** (one per external provider) produce SourceRecords
//! - **Entity Matcher** classifies each pairing into a MatchCategory
//! - **Consensus Builder** aggregates FieldClaims into ConsensusResults
//! - **Decision Engine** turns ConsensusResults into ReviewDecisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::FetchError;

/// Pseudo-source id for the entity's current stored value
pub const INTERNAL_SOURCE: &str = "internal";

/// Pseudo-source id for hand-curated corrections
pub const MANUAL_SOURCE: &str = "manual";

/// Field name constants shared by connectors, the decision engine and the
/// entity store column mapping
pub mod fields {
    pub const DIRECTOR: &str = "director";
    pub const HERO: &str = "hero";
    pub const HEROINE: &str = "heroine";
    pub const CAST: &str = "cast";
    pub const MUSIC_DIRECTOR: &str = "music_director";
    pub const SYNOPSIS: &str = "synopsis";
    pub const RUNTIME: &str = "runtime";
    pub const LANGUAGE: &str = "language";
    pub const GENRE: &str = "genre";
    pub const BIRTHPLACE: &str = "birthplace";
    pub const OCCUPATION: &str = "occupation";
    pub const BIO: &str = "bio";
}

// ============================================================================
// Entities
// ============================================================================

/// Kind of record under reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Movie,
    Person,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Movie => "movie",
            EntityKind::Person => "person",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(EntityKind::Movie),
            "person" => Some(EntityKind::Person),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cast entry as providers deliver it: either a bare name or a detailed
/// credit object. Consumers match on the variant instead of probing for a
/// `name` property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CastMember {
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order: Option<u32>,
    },
    Name(String),
}

impl CastMember {
    /// The credited name, whichever shape the entry arrived in
    pub fn name(&self) -> &str {
        match self {
            CastMember::Name(name) => name,
            CastMember::Detailed { name, .. } => name,
        }
    }
}

/// A canonical field value
///
/// Tagged union instead of stringly-typed storage: years/runtimes compare
/// as integers, cast lists keep their structure until normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(i64),
    Cast(Vec<CastMember>),
    Text(String),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// Blank values contribute no claims and never block a fill
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Cast(members) => members.is_empty(),
            FieldValue::Number(_) => false,
        }
    }

    /// Parse a flat string (CSV round-trip, store column) into the value
    /// shape the field expects
    pub fn parse_for_field(field: &str, raw: &str) -> FieldValue {
        match field {
            fields::RUNTIME => raw
                .trim()
                .parse::<i64>()
                .map(FieldValue::Number)
                .unwrap_or_else(|_| FieldValue::Text(raw.to_string())),
            fields::CAST => FieldValue::Cast(
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| CastMember::Name(s.to_string()))
                    .collect(),
            ),
            _ => FieldValue::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Cast(members) => {
                let names: Vec<&str> = members.iter().map(|m| m.name()).collect();
                f.write_str(&names.join(", "))
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n)
    }
}

/// The record under reconciliation (movie or person)
///
/// Owned by the entity store; the engine reads it and requests writes
/// through the Apply Layer only.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: Uuid,
    pub kind: EntityKind,
    /// Movie title or person name
    pub title: String,
    /// Release year (movie) or birth year (person)
    pub year: Option<i32>,
    /// Canonical descriptive field map
    pub fields: HashMap<String, FieldValue>,
    /// Stored provider identifiers (tmdb_id, imdb_id, wikidata_id)
    pub external_ids: HashMap<String, String>,
    /// Quality grade (recomputed on apply)
    pub grade: Option<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub needs_manual_review: bool,
    /// Optimistic-concurrency token, as stored
    pub updated_at: String,
}

impl Entity {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Display label for reports and logs, e.g. "Magadheera (2009)"
    pub fn label(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => self.title.clone(),
        }
    }
}

// ============================================================================
// Source Connectors
// ============================================================================

/// One entity lookup against one provider
#[derive(Debug, Clone)]
pub struct SourceQuery {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub title: String,
    pub year: Option<i32>,
    /// Stored provider ids; a connector that finds its own key here may
    /// resolve the record directly instead of searching
    pub external_ids: HashMap<String, String>,
}

impl SourceQuery {
    pub fn for_entity(entity: &Entity) -> Self {
        Self {
            entity_id: entity.id,
            kind: entity.kind,
            title: entity.title.clone(),
            year: entity.year,
            external_ids: entity.external_ids.clone(),
        }
    }
}

/// One provider's snapshot for one entity lookup
///
/// Ephemeral: created fresh each run, discarded after the report.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    /// Provider id (e.g. "tmdb")
    pub source: String,
    /// Candidate title as the provider spells it
    pub title: String,
    pub year: Option<i32>,
    /// Raw field map translated into the common claim shape
    pub fields: HashMap<String, FieldValue>,
    pub url: Option<String>,
    pub fetched_at: DateTime<Utc>,
    /// The record was resolved via a stored provider id rather than a
    /// title search; the pairing needs no fuzzy matching
    pub resolved_by_id: bool,
    /// Pairing classification, filled in by the Entity Matcher
    pub match_decision: Option<MatchDecision>,
}

/// Source Connector contract
///
/// One implementation per external provider. `Ok(None)` means the provider
/// has no record for the query (never an error); transient failures are
/// surfaced as `FetchError::Transient` so the orchestration can retry with
/// bounded backoff before degrading to "no claim."
#[async_trait::async_trait]
pub trait SourceConnector: Send + Sync {
    /// Provider id used in claims, priority order and reports
    fn name(&self) -> &'static str;

    /// Whether this provider carries records of the given kind
    fn supports(&self, kind: EntityKind) -> bool;

    async fn fetch(&self, query: &SourceQuery) -> Result<Option<SourceRecord>, FetchError>;
}

// ============================================================================
// Matching
// ============================================================================

/// Classification of one (internal entity, provider candidate) pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCategory {
    /// Same entity; claims trusted fully
    AutoApprove,
    /// Plausible pairing; claims recorded but always routed to review
    ManualReview,
    /// Probable false match; claims discarded entirely
    Reject,
}

impl MatchCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchCategory::AutoApprove => "AUTO_APPROVE",
            MatchCategory::ManualReview => "MANUAL_REVIEW",
            MatchCategory::Reject => "REJECT",
        }
    }
}

/// Entity Matcher output for one source pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDecision {
    pub category: MatchCategory,
    /// Token-based title similarity, 0-100
    pub title_similarity: f64,
    /// |source year - internal year|; None when either side lacks a year
    pub year_delta: Option<i64>,
    /// Audit trail
    pub rationale: String,
}

// ============================================================================
// Claims and consensus
// ============================================================================

/// A single (field, value, source) assertion from a matched source.
/// Immutable once created.
#[derive(Debug, Clone)]
pub struct FieldClaim {
    pub field: String,
    pub value: FieldValue,
    pub source: String,
}

/// One group of claims agreeing on a normalized value
#[derive(Debug, Clone)]
pub struct ClaimGroup {
    /// Normalized comparison key
    pub key: String,
    /// Representative raw value (taken from the highest-priority source)
    pub value: FieldValue,
    /// Supporting sources, highest priority first
    pub sources: Vec<String>,
}

impl ClaimGroup {
    pub fn contains_source(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s == source)
    }
}

/// Consensus Builder output for one (entity, field)
///
/// Minority groups are ranked below the winner, never discarded; they are
/// needed for audit even when outvoted.
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub field: String,
    pub recommended: FieldValue,
    /// All distinct value groups, winner first
    pub groups: Vec<ClaimGroup>,
    /// Size of the winning group
    pub agreeing_sources: usize,
    /// Winning-group sources that are external providers (internal never
    /// counts toward the auto-approve agreement requirement)
    pub external_agreeing: usize,
    /// Number of distinct sources that contributed a non-blank claim
    pub total_considered: usize,
    /// agreeing_sources / total_considered, in [0,1]
    pub confidence: f64,
    pub conflicted: bool,
}

// ============================================================================
// Decisions
// ============================================================================

/// Field-level discrepancy severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// A field-level discrepancy surfaced to humans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub severity: Severity,
    pub message: String,
    pub auto_resolvable: bool,
    pub suggested_action: String,
}

/// Decision Engine states for one (entity, field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionState {
    AutoApprove,
    NeedsReview,
    Rejected,
    Applied,
    ApplyFailed,
}

impl DecisionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionState::AutoApprove => "AUTO_APPROVE",
            DecisionState::NeedsReview => "NEEDS_REVIEW",
            DecisionState::Rejected => "REJECTED",
            DecisionState::Applied => "APPLIED",
            DecisionState::ApplyFailed => "APPLY_FAILED",
        }
    }
}

/// Decision Engine output for one (entity, field)
#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub state: DecisionState,
    pub rationale: String,
    pub score: f64,
}

// ============================================================================
// Corrections
// ============================================================================

/// A declarative manual correction
///
/// Replaces one-off imperative fix scripts: consumed by the same Apply
/// Layer as automated consensus output, with top source priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub field: String,
    pub value: FieldValue,
    pub rationale: Option<String>,
    /// Always "manual" for corrections
    pub source: String,
}

impl Correction {
    pub fn manual(
        entity_id: Uuid,
        kind: EntityKind,
        field: impl Into<String>,
        value: FieldValue,
        rationale: Option<String>,
    ) -> Self {
        Self {
            entity_id,
            kind,
            field: field.into(),
            value,
            rationale,
            source: MANUAL_SOURCE.to_string(),
        }
    }
}
