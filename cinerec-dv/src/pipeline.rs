//! Batch validation pipeline
//!
//! Orchestrates the complete reconciliation pass over a batch of entities:
//! fetch every provider's view (bounded concurrency, per-fetch timeout),
//! classify each pairing, build per-field consensus, decide, and apply.
//!
//! # Concurrency model
//! - Entities are independent; a worker pool processes them via
//!   `stream::buffer_unordered`. Within one entity, provider fetches run
//!   concurrently and the entity's consensus only starts once all of its
//!   fetches have settled.
//! - The only cross-entity shared mutable state is an atomic progress
//!   counter; everything else flows through per-entity outcomes.
//!
//! # Error handling
//! - Per-source and per-entity failures are recorded and never abort the
//!   batch; a timed-out provider degrades to "no claim."
//! - The run only fails when no provider was reachable at all.

use crate::apply::{ApplyLayer, ApprovedChange};
use crate::consensus::ConsensusBuilder;
use crate::db::{entities, EntityStore, ValidationFilter};
use crate::decision::{self, DecisionEngine};
use crate::error::{EngineResult, ValidationError};
use crate::matcher::EntityMatcher;
use crate::normalize;
use crate::report::{AutoFixedItem, NeedsReviewItem, ValidationReport};
use crate::sources::{fetch_with_retry, FetchOutcome};
use crate::types::{
    DecisionState, Entity, FieldClaim, MatchCategory, SourceConnector, SourceQuery, SourceRecord,
};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Entities in flight at once
    pub concurrency: usize,
    /// Timeout per fetch attempt
    pub fetch_timeout: Duration,
    /// Attempts per provider before degrading to "no claim"
    pub max_fetch_attempts: u32,
    /// Enable the Apply Layer; otherwise report-only
    pub auto_fix: bool,
    /// Restrict validation to one field
    pub field_filter: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_timeout: Duration::from_secs(20),
            max_fetch_attempts: 3,
            auto_fix: false,
            field_filter: None,
        }
    }
}

/// Per-provider fetch statistics for the run summary
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub fetch_success: BTreeMap<String, usize>,
    pub fetch_not_found: BTreeMap<String, usize>,
    pub fetch_failures: BTreeMap<String, usize>,
    /// Source pairings voided by the Entity Matcher
    pub rejected_pairings: usize,
    /// Entities whose every candidate pairing was rejected
    pub rejected_entities: usize,
    pub apply_failures: usize,
}

impl RunStats {
    fn bump(map: &mut BTreeMap<String, usize>, source: &str) {
        *map.entry(source.to_string()).or_default() += 1;
    }

    fn absorb(&mut self, other: RunStats) {
        for (source, n) in other.fetch_success {
            *self.fetch_success.entry(source).or_default() += n;
        }
        for (source, n) in other.fetch_not_found {
            *self.fetch_not_found.entry(source).or_default() += n;
        }
        for (source, n) in other.fetch_failures {
            *self.fetch_failures.entry(source).or_default() += n;
        }
        self.rejected_pairings += other.rejected_pairings;
        self.rejected_entities += other.rejected_entities;
        self.apply_failures += other.apply_failures;
    }

    /// Responses proving a provider was reachable (records and not-founds)
    pub fn reachable_responses(&self) -> usize {
        self.fetch_success.values().sum::<usize>()
            + self.fetch_not_found.values().sum::<usize>()
    }

    pub fn total_failures(&self) -> usize {
        self.fetch_failures.values().sum()
    }
}

struct EntityOutcome {
    fixed: Vec<AutoFixedItem>,
    review: Vec<NeedsReviewItem>,
    stats: RunStats,
}

/// The batch reconciliation engine
pub struct BatchValidator {
    store: EntityStore,
    connectors: Vec<Arc<dyn SourceConnector>>,
    matcher: EntityMatcher,
    consensus: ConsensusBuilder,
    decisions: DecisionEngine,
    apply: ApplyLayer,
    config: PipelineConfig,
}

impl BatchValidator {
    pub fn new(
        store: EntityStore,
        connectors: Vec<Arc<dyn SourceConnector>>,
        source_priority: Vec<String>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            apply: ApplyLayer::new(store.clone()),
            store,
            connectors,
            matcher: EntityMatcher::new(),
            consensus: ConsensusBuilder::new(source_priority),
            decisions: DecisionEngine::new(),
            config,
        }
    }

    /// Run one validation batch
    ///
    /// Completion with items pending review is a normal successful
    /// outcome; the only fatal condition is that no provider was
    /// reachable for the entire run.
    pub async fn run(
        &self,
        filter: &ValidationFilter,
    ) -> EngineResult<(ValidationReport, RunStats)> {
        let batch = self
            .store
            .list_entities_needing_validation(filter)
            .await
            .map_err(ValidationError::Store)?;
        let total = batch.len();

        info!(
            total,
            kind = %filter.kind,
            auto_fix = self.config.auto_fix,
            "Starting validation batch"
        );

        let processed = AtomicUsize::new(0);
        let processed_ref = &processed;

        let outcomes: Vec<EntityOutcome> = stream::iter(batch)
            .map(|entity| async move {
                let outcome = self.process_entity(&entity).await;
                let current = processed_ref.fetch_add(1, Ordering::Relaxed) + 1;
                if current % 10 == 0 || current == total {
                    info!(progress = format!("{}/{}", current, total), "Validation progress");
                }
                outcome
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = ValidationReport::new(total);
        let mut stats = RunStats::default();
        for outcome in outcomes {
            for item in outcome.fixed {
                report.push_fixed(item);
            }
            for item in outcome.review {
                report.push_review(item);
            }
            stats.absorb(outcome.stats);
        }

        // Pending manual corrections ride the same Apply Layer
        if self.config.auto_fix {
            let corrections = self
                .store
                .pending_corrections(Some(filter.kind))
                .await
                .map_err(ValidationError::Store)?;
            if !corrections.is_empty() {
                info!(count = corrections.len(), "Applying pending manual corrections");
                let apply_report = self.apply.apply_corrections(&corrections).await?;
                for write in apply_report.writes {
                    report.push_fixed(AutoFixedItem {
                        entity: write.entity_label,
                        field: write.field,
                        old_value: write.old_value,
                        new_value: write.new_value,
                        sources: write.sources,
                        entity_id: write.entity_id,
                        kind: write.kind,
                    });
                }
                for failure in apply_report.failures {
                    stats.apply_failures += 1;
                    warn!(
                        entity = %failure.entity_label,
                        reason = %failure.reason,
                        "Manual correction failed to apply"
                    );
                }
            }
        }

        report.finalize();

        // Systemic outage: every fetch failed, nothing answered
        if total > 0 && stats.reachable_responses() == 0 && stats.total_failures() > 0 {
            return Err(ValidationError::Config(
                "no source providers were reachable during the run".to_string(),
            ));
        }

        for (source, failures) in &stats.fetch_failures {
            warn!(source = %source, failures, "Provider fetch failures this run");
        }
        info!(
            total,
            auto_fixed = report.auto_fixed.count,
            needs_review = report.needs_review.count,
            rejected_pairings = stats.rejected_pairings,
            "Validation batch complete"
        );

        Ok((report, stats))
    }

    /// Process one entity end to end; never fails the batch
    async fn process_entity(&self, entity: &Entity) -> EntityOutcome {
        let query = SourceQuery::for_entity(entity);
        let mut stats = RunStats::default();

        // All provider fetches for this entity run concurrently; consensus
        // waits for every one of them to settle
        let fetches = self
            .connectors
            .iter()
            .filter(|c| c.supports(entity.kind))
            .map(|connector| {
                let query = &query;
                async move {
                    fetch_with_retry(
                        connector.as_ref(),
                        query,
                        self.config.fetch_timeout,
                        self.config.max_fetch_attempts,
                    )
                    .await
                }
            });
        let fetch_outcomes = futures::future::join_all(fetches).await;

        let mut records: Vec<SourceRecord> = Vec::new();
        for outcome in fetch_outcomes {
            match outcome {
                FetchOutcome::Record(record) => {
                    RunStats::bump(&mut stats.fetch_success, &record.source);
                    records.push(record);
                }
                FetchOutcome::NotFound { source } => {
                    RunStats::bump(&mut stats.fetch_not_found, &source);
                    debug!(entity = %entity.label(), source = %source, "No record at provider");
                }
                FetchOutcome::Failed { source, message } => {
                    RunStats::bump(&mut stats.fetch_failures, &source);
                    warn!(
                        entity = %entity.label(),
                        source = %source,
                        error = %message,
                        "Fetch degraded to no claim"
                    );
                }
            }
        }

        let had_candidates = !records.is_empty();

        // Classify each pairing; rejected sources contribute zero claims
        let mut matched: Vec<SourceRecord> = Vec::new();
        for mut record in records {
            let match_decision = self.matcher.classify(entity, &record);
            if match_decision.category == MatchCategory::Reject {
                stats.rejected_pairings += 1;
                info!(
                    entity = %entity.label(),
                    rationale = %match_decision.rationale,
                    "Source pairing rejected; claims discarded"
                );
            } else {
                record.match_decision = Some(match_decision);
                matched.push(record);
            }
        }

        let mut outcome = EntityOutcome {
            fixed: Vec::new(),
            review: Vec::new(),
            stats,
        };

        if matched.is_empty() {
            if had_candidates {
                // Every candidate pairing was voided; the comparison is
                // untrustworthy, not a field disagreement
                outcome.stats.rejected_entities += 1;
                let voided = decision::rejected("all candidate pairings voided");
                info!(
                    entity = %entity.label(),
                    state = voided.state.as_str(),
                    rationale = %voided.rationale,
                    "Entity comparison voided"
                );
            }
            return outcome;
        }

        // Pairing categories per source, read off the retained records
        let pairings: HashMap<String, MatchCategory> = matched
            .iter()
            .filter_map(|r| {
                r.match_decision
                    .as_ref()
                    .map(|d| (r.source.clone(), d.category))
            })
            .collect();

        // Claims per field from the matched sources
        let mut claims_by_field: BTreeMap<String, Vec<FieldClaim>> = BTreeMap::new();
        for record in &matched {
            for (field, value) in &record.fields {
                if let Some(only) = &self.config.field_filter {
                    if field != only {
                        continue;
                    }
                }
                if entities::column_for_field(entity.kind, field).is_none() {
                    continue;
                }
                claims_by_field
                    .entry(field.clone())
                    .or_default()
                    .push(FieldClaim {
                        field: field.clone(),
                        value: value.clone(),
                        source: record.source.clone(),
                    });
            }
        }

        let mut approved: Vec<ApprovedChange> = Vec::new();
        for (field, claims) in &claims_by_field {
            let current = entity.field(field);
            let Some(consensus) = self.consensus.build(field, claims, current) else {
                continue;
            };

            // Already consistent with consensus: nothing to record
            let current_filled = current.map(|v| !v.is_blank()).unwrap_or(false);
            if current_filled && normalize::equals(current, Some(&consensus.recommended)) {
                continue;
            }

            let decision = self.decisions.evaluate(&consensus, current, &pairings);
            debug!(
                entity = %entity.label(),
                field = %field,
                state = decision.state.as_str(),
                rationale = %decision.rationale,
                "Field decision"
            );

            match decision.state {
                DecisionState::AutoApprove => {
                    let sources = consensus.groups[0].sources.clone();
                    approved.push(ApprovedChange {
                        entity_id: entity.id,
                        kind: entity.kind,
                        field: field.clone(),
                        new_value: consensus.recommended.clone(),
                        sources: sources.clone(),
                    });
                    if !self.config.auto_fix {
                        // Report-only mode still documents what would land
                        outcome.fixed.push(AutoFixedItem {
                            entity: entity.label(),
                            field: field.clone(),
                            old_value: current.map(|v| v.to_string()),
                            new_value: consensus.recommended.to_string(),
                            sources,
                            entity_id: entity.id,
                            kind: entity.kind,
                        });
                    }
                }
                _ => {
                    let issue = decision::issue_for(&consensus, &decision);
                    info!(
                        entity = %entity.label(),
                        field = %issue.field,
                        severity = ?issue.severity,
                        message = %issue.message,
                        "Discrepancy held for review"
                    );
                    outcome.review.push(NeedsReviewItem {
                        entity: entity.label(),
                        field: field.clone(),
                        current_value: current.map(|v| v.to_string()),
                        recommendation: consensus.recommended.to_string(),
                        entity_id: entity.id,
                        kind: entity.kind,
                    });
                }
            }
        }

        if self.config.auto_fix && !approved.is_empty() {
            match self.apply.apply_entity(entity, &approved).await {
                Ok(writes) => {
                    for write in writes {
                        outcome.fixed.push(AutoFixedItem {
                            entity: write.entity_label,
                            field: write.field,
                            old_value: write.old_value,
                            new_value: write.new_value,
                            sources: write.sources,
                            entity_id: write.entity_id,
                            kind: write.kind,
                        });
                    }
                }
                Err(e) => {
                    // APPLY_FAILED: the whole entity batch rolled back;
                    // surface every field for review rather than dropping
                    outcome.stats.apply_failures += 1;
                    warn!(entity = %entity.label(), error = %e, "Apply failed; queued for review");
                    for change in &approved {
                        outcome.review.push(NeedsReviewItem {
                            entity: entity.label(),
                            field: change.field.clone(),
                            current_value: entity.field(&change.field).map(|v| v.to_string()),
                            recommendation: change.new_value.to_string(),
                            entity_id: entity.id,
                            kind: entity.kind,
                        });
                    }
                }
            }
        }

        outcome
    }
}
