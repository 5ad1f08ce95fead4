//! Error types for cinerec-dv
//!
//! Two layers: `FetchError` for source connector failures (transient vs
//! fatal, so the orchestration knows what to retry) and `ValidationError`
//! for the reconciliation engine itself. "Not found" at a provider is not
//! an error at all; connectors return `Ok(None)` for it.

use thiserror::Error;

/// Source connector fetch errors
///
/// Transient failures (network, rate limit, 5xx) are retried with bounded
/// backoff by the fetch orchestration, then degraded to "no claim" for
/// that source. Fatal failures (bad API key, unparseable payload) are not
/// retried.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network/rate-limit failure; retried with backoff, then degraded
    #[error("Transient failure from {source}: {message}")]
    Transient { source: String, message: String },

    /// Permanent failure for this provider; not retried
    #[error("Fetch failed from {source}: {message}")]
    Fatal { source: String, message: String },
}

impl FetchError {
    pub fn transient(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            source: source.into(),
            message: message.into(),
        }
    }

    pub fn fatal(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            source: source.into(),
            message: message.into(),
        }
    }

    /// Whether the fetch orchestration should retry this failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Provider id the failure came from
    pub fn source(&self) -> &str {
        match self {
            Self::Transient { source, .. } | Self::Fatal { source, .. } => source,
        }
    }
}

/// Engine-level validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Entity Matcher could not confidently pair a candidate; that
    /// source's claims are discarded and the entity continues
    #[error("Ambiguous match for {entity}: {rationale}")]
    MatchAmbiguous { entity: String, rationale: String },

    /// Consensus Builder found no majority group; routed to review
    #[error("No resolvable consensus for field '{field}'")]
    ConflictUnresolvable { field: String },

    /// Entity changed between read and apply (optimistic-concurrency
    /// failure); the write is aborted and reported, not retried
    #[error("Entity {entity} changed between read and apply")]
    ApplyConflict { entity: String },

    /// Entity store failure
    #[error(transparent)]
    Store(#[from] cinerec_common::Error),

    /// Run-level configuration failure (fatal, non-zero exit)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for ValidationError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(cinerec_common::Error::Database(e))
    }
}

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, ValidationError>;
