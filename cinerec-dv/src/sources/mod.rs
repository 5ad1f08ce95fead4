//! Source connectors
//!
//! One connector per external provider, each owning its HTTP client and
//! per-provider token-bucket rate limiter. The orchestration here wraps
//! every fetch in an independent timeout and bounded exponential backoff:
//! transient failures retry, then degrade to "no claim" for that source;
//! a failed provider never aborts the entity.

pub mod omdb;
pub mod tmdb;
pub mod wikidata;

pub use omdb::OmdbConnector;
pub use tmdb::TmdbConnector;
pub use wikidata::WikidataConnector;

use crate::error::FetchError;
use crate::types::{SourceConnector, SourceQuery, SourceRecord};
use cinerec_common::config::{resolve_api_key, TomlConfig};
use cinerec_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Base delay for exponential backoff (500ms, 1s, 2s, ...)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Outcome of one provider fetch after retries
#[derive(Debug)]
pub enum FetchOutcome {
    Record(SourceRecord),
    /// Provider has no record for the query; reduces the source count,
    /// non-fatal
    NotFound { source: String },
    /// Transient failures exhausted retries, or a fatal provider error;
    /// degraded to "no claim"
    Failed { source: String, message: String },
}

/// Fetch one provider's view with timeout and bounded backoff
///
/// Each attempt gets its own timeout; a timed-out attempt counts as
/// transient. After `max_attempts` the failure degrades to
/// `FetchOutcome::Failed` rather than an error.
pub async fn fetch_with_retry(
    connector: &dyn SourceConnector,
    query: &SourceQuery,
    timeout: Duration,
    max_attempts: u32,
) -> FetchOutcome {
    let source = connector.name();
    let mut delay = RETRY_BASE_DELAY;
    let mut last_message = String::new();

    for attempt in 1..=max_attempts.max(1) {
        let message = match tokio::time::timeout(timeout, connector.fetch(query)).await {
            Ok(Ok(Some(record))) => return FetchOutcome::Record(record),
            Ok(Ok(None)) => {
                return FetchOutcome::NotFound {
                    source: source.to_string(),
                }
            }
            Ok(Err(e)) if !e.is_transient() => {
                return FetchOutcome::Failed {
                    source: source.to_string(),
                    message: e.to_string(),
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", timeout),
        };

        last_message = message;
        if attempt < max_attempts {
            warn!(
                source = source,
                attempt = attempt,
                error = %last_message,
                "Transient fetch failure, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    FetchOutcome::Failed {
        source: source.to_string(),
        message: last_message,
    }
}

/// Build the enabled connectors from configuration
///
/// A provider with a missing API key is skipped with a warning; an empty
/// connector set is a configuration failure (there would be nothing to
/// reconcile against).
pub fn build_connectors(config: &TomlConfig) -> Result<Vec<Arc<dyn SourceConnector>>> {
    let mut connectors: Vec<Arc<dyn SourceConnector>> = Vec::new();

    if config.providers.tmdb.enabled {
        match resolve_api_key(
            "TMDb",
            "CINEREC_TMDB_API_KEY",
            config.providers.tmdb.api_key.as_deref(),
        ) {
            Ok(api_key) => {
                let connector =
                    TmdbConnector::new(api_key, config.providers.tmdb.requests_per_second)?;
                connectors.push(Arc::new(connector));
            }
            Err(e) => warn!("Skipping TMDb: {}", e),
        }
    }

    if config.providers.omdb.enabled {
        match resolve_api_key(
            "OMDb",
            "CINEREC_OMDB_API_KEY",
            config.providers.omdb.api_key.as_deref(),
        ) {
            Ok(api_key) => {
                let connector =
                    OmdbConnector::new(api_key, config.providers.omdb.requests_per_second)?;
                connectors.push(Arc::new(connector));
            }
            Err(e) => warn!("Skipping OMDb: {}", e),
        }
    }

    if config.providers.wikidata.enabled {
        let connector = WikidataConnector::new(config.providers.wikidata.requests_per_second)?;
        connectors.push(Arc::new(connector));
    }

    if connectors.is_empty() {
        return Err(Error::Config(
            "No source connectors configured; enable at least one provider".to_string(),
        ));
    }

    Ok(connectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct FlakyConnector {
        attempts: AtomicU32,
        fail_times: u32,
        fatal: bool,
    }

    #[async_trait::async_trait]
    impl SourceConnector for FlakyConnector {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn supports(&self, _kind: EntityKind) -> bool {
            true
        }

        async fn fetch(&self, query: &SourceQuery) -> std::result::Result<Option<SourceRecord>, FetchError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_times {
                if self.fatal {
                    return Err(FetchError::fatal("flaky", "bad api key"));
                }
                return Err(FetchError::transient("flaky", "connection reset"));
            }
            Ok(Some(SourceRecord {
                source: "flaky".to_string(),
                title: query.title.clone(),
                year: query.year,
                fields: HashMap::new(),
                url: None,
                fetched_at: chrono::Utc::now(),
                resolved_by_id: false,
                match_decision: None,
            }))
        }
    }

    fn query() -> SourceQuery {
        SourceQuery {
            entity_id: Uuid::new_v4(),
            kind: EntityKind::Movie,
            title: "Magadheera".to_string(),
            year: Some(2009),
            external_ids: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_succeed() {
        let connector = FlakyConnector {
            attempts: AtomicU32::new(0),
            fail_times: 2,
            fatal: false,
        };
        let outcome =
            fetch_with_retry(&connector, &query(), Duration::from_secs(5), 3).await;
        assert!(matches!(outcome, FetchOutcome::Record(_)));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade_to_failure() {
        let connector = FlakyConnector {
            attempts: AtomicU32::new(0),
            fail_times: 10,
            fatal: false,
        };
        let outcome =
            fetch_with_retry(&connector, &query(), Duration::from_secs(5), 3).await;
        match outcome {
            FetchOutcome::Failed { source, .. } => assert_eq!(source, "flaky"),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let connector = FlakyConnector {
            attempts: AtomicU32::new(0),
            fail_times: 10,
            fatal: true,
        };
        let outcome =
            fetch_with_retry(&connector, &query(), Duration::from_secs(5), 3).await;
        assert!(matches!(outcome, FetchOutcome::Failed { .. }));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }
}
