//! Apply Layer
//!
//! The only component that mutates the entity store. Approved changes are
//! grouped by entity and written as one transaction per entity: either
//! every approved field for that entity lands, or none do and the failure
//! is reported. Idempotent: fields already holding the recommended value
//! are skipped, so re-running with identical consensus inputs produces
//! zero additional writes. Every write carries provenance (old value, new
//! value, contributing sources, timestamp) and refreshes the entity's
//! quality metadata.
//!
//! Optimistic concurrency: the UPDATE is guarded on the `updated_at`
//! token observed at read time. Zero affected rows means the entity
//! changed underneath the run; the write is aborted and reported as
//! APPLY_FAILED, never retried silently.

use crate::db::{corrections, entities, provenance, EntityStore};
use crate::error::{EngineResult, ValidationError};
use crate::normalize;
use crate::quality;
use crate::types::{Correction, Entity, EntityKind, FieldValue, MANUAL_SOURCE};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One approved (entity, field, value) write request
#[derive(Debug, Clone)]
pub struct ApprovedChange {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub field: String,
    pub new_value: FieldValue,
    pub sources: Vec<String>,
}

/// One field write that actually happened
#[derive(Debug, Clone)]
pub struct AppliedWrite {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub entity_label: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub sources: Vec<String>,
}

/// A per-entity apply failure (the entity's whole batch was rolled back)
#[derive(Debug, Clone)]
pub struct ApplyFailure {
    pub entity_label: String,
    pub reason: String,
}

/// Outcome of applying a batch of approved changes
#[derive(Debug, Default)]
pub struct ApplyRunReport {
    pub writes: Vec<AppliedWrite>,
    pub failures: Vec<ApplyFailure>,
    /// Changes skipped because the store already matched
    pub skipped: usize,
}

/// The write path for approved changes and manual corrections
pub struct ApplyLayer {
    store: EntityStore,
}

impl ApplyLayer {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Apply all approved changes for one entity as a single transaction
    ///
    /// Returns the writes performed (empty when the entity already
    /// matches every recommended value).
    pub async fn apply_entity(
        &self,
        entity: &Entity,
        changes: &[ApprovedChange],
    ) -> EngineResult<Vec<AppliedWrite>> {
        // Idempotence: drop changes whose value already matches the store
        let pending: Vec<&ApprovedChange> = changes
            .iter()
            .filter(|c| !normalize::equals(entity.field(&c.field), Some(&c.new_value)))
            .collect();

        if pending.is_empty() {
            debug!(entity = %entity.label(), "Nothing to apply; store already matches");
            return Ok(Vec::new());
        }

        let mut columns = Vec::with_capacity(pending.len());
        for change in &pending {
            let column = entities::column_for_field(entity.kind, &change.field).ok_or_else(|| {
                ValidationError::Store(cinerec_common::Error::InvalidInput(format!(
                    "Unknown field '{}' for {}",
                    change.field, entity.kind
                )))
            })?;
            columns.push(column);
        }

        // Quality metadata reflects the entity as it will look after the write
        let mut updated = entity.clone();
        for change in &pending {
            updated
                .fields
                .insert(change.field.clone(), change.new_value.clone());
        }
        let grade = quality::grade_for(quality::completeness(&updated));
        let verified_at = Utc::now().to_rfc3339();

        let mut sql = format!("UPDATE {} SET ", entities::table_for(entity.kind));
        for column in &columns {
            sql.push_str(column);
            sql.push_str(" = ?, ");
        }
        sql.push_str(
            "grade = ?, last_verified_at = ?, \
             updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now') \
             WHERE guid = ? AND updated_at = ?",
        );

        let mut tx = self.store.pool().begin().await.map_err(ValidationError::from)?;

        let mut query = sqlx::query(&sql);
        for change in &pending {
            query = query.bind(entities::encode_field_value(&change.new_value));
        }
        query = query
            .bind(grade)
            .bind(&verified_at)
            .bind(entity.id.to_string())
            .bind(&entity.updated_at);

        let result = query.execute(&mut *tx).await.map_err(ValidationError::from)?;

        if result.rows_affected() == 0 {
            // Changed between read and decision; abort the whole batch
            warn!(entity = %entity.label(), "Apply conflict: entity changed since read");
            return Err(ValidationError::ApplyConflict {
                entity: entity.label(),
            });
        }

        let mut writes = Vec::with_capacity(pending.len());
        for change in &pending {
            let old_value = entity.field(&change.field).map(|v| v.to_string());
            let new_value = change.new_value.to_string();

            provenance::record_write(
                &mut *tx,
                entity.id,
                entity.kind,
                &change.field,
                old_value.as_deref(),
                &new_value,
                &change.sources,
            )
            .await
            .map_err(ValidationError::Store)?;

            if change.sources.iter().any(|s| s == MANUAL_SOURCE) {
                corrections::mark_applied(&mut *tx, entity.id, &change.field)
                    .await
                    .map_err(ValidationError::Store)?;
            }

            writes.push(AppliedWrite {
                entity_id: entity.id,
                kind: entity.kind,
                entity_label: entity.label(),
                field: change.field.clone(),
                old_value,
                new_value,
                sources: change.sources.clone(),
            });
        }

        tx.commit().await.map_err(ValidationError::from)?;

        info!(
            entity = %entity.label(),
            fields = writes.len(),
            "Applied approved changes"
        );

        Ok(writes)
    }

    /// Group approved changes by entity (fresh read per entity) and apply
    /// each entity's batch atomically. Per-entity failures are recorded,
    /// never propagated; a conflict on one entity does not stop the rest.
    pub async fn apply_all(&self, changes: Vec<ApprovedChange>) -> EngineResult<ApplyRunReport> {
        let mut by_entity: BTreeMap<(String, Uuid), (EntityKind, Vec<ApprovedChange>)> =
            BTreeMap::new();
        for change in changes {
            by_entity
                .entry((change.kind.as_str().to_string(), change.entity_id))
                .or_insert_with(|| (change.kind, Vec::new()))
                .1
                .push(change);
        }

        let mut report = ApplyRunReport::default();

        for ((_, entity_id), (kind, entity_changes)) in by_entity {
            let entity = match self.store.get_entity(kind, entity_id).await {
                Ok(entity) => entity,
                Err(e) => {
                    report.failures.push(ApplyFailure {
                        entity_label: entity_id.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let requested = entity_changes.len();
            match self.apply_entity(&entity, &entity_changes).await {
                Ok(writes) => {
                    report.skipped += requested - writes.len();
                    report.writes.extend(writes);
                }
                Err(e) => {
                    report.failures.push(ApplyFailure {
                        entity_label: entity.label(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Manual corrections enter the same write path with top priority
    pub async fn apply_corrections(
        &self,
        corrections: &[Correction],
    ) -> EngineResult<ApplyRunReport> {
        let changes: Vec<ApprovedChange> = corrections
            .iter()
            .map(|c| ApprovedChange {
                entity_id: c.entity_id,
                kind: c.kind,
                field: c.field.clone(),
                new_value: c.value.clone(),
                sources: vec![c.source.clone()],
            })
            .collect();

        self.apply_all(changes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_tables(&pool).await.unwrap();
        pool
    }

    async fn seed_movie(pool: &SqlitePool, id: Uuid, title: &str, director: Option<&str>) {
        sqlx::query("INSERT INTO movies (guid, title, year, director) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(title)
            .bind(2009)
            .bind(director)
            .execute(pool)
            .await
            .unwrap();
    }

    fn change(id: Uuid, field: &str, value: &str) -> ApprovedChange {
        ApprovedChange {
            entity_id: id,
            kind: EntityKind::Movie,
            field: field.to_string(),
            new_value: FieldValue::text(value),
            sources: vec!["tmdb".to_string(), "omdb".to_string(), "wikidata".to_string()],
        }
    }

    #[tokio::test]
    async fn test_apply_writes_value_and_provenance() {
        let pool = test_pool().await;
        let id = Uuid::new_v4();
        seed_movie(&pool, id, "Magadheera", None).await;

        let store = EntityStore::new(pool.clone());
        let layer = ApplyLayer::new(store.clone());
        let entity = store.get_entity(EntityKind::Movie, id).await.unwrap();

        let writes = layer
            .apply_entity(&entity, &[change(id, "director", "S. S. Rajamouli")])
            .await
            .unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].old_value, None);

        let reloaded = store.get_entity(EntityKind::Movie, id).await.unwrap();
        assert_eq!(
            reloaded.field("director"),
            Some(&FieldValue::text("S. S. Rajamouli"))
        );
        assert!(reloaded.last_verified_at.is_some());
        assert!(reloaded.grade.is_some());

        let history = db::provenance::list_for_entity(&pool, id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_value, "S. S. Rajamouli");
        assert_eq!(history[0].sources.len(), 3);
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent() {
        let pool = test_pool().await;
        let id = Uuid::new_v4();
        seed_movie(&pool, id, "Magadheera", None).await;

        let store = EntityStore::new(pool.clone());
        let layer = ApplyLayer::new(store.clone());

        let entity = store.get_entity(EntityKind::Movie, id).await.unwrap();
        let first = layer
            .apply_entity(&entity, &[change(id, "director", "S. S. Rajamouli")])
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // Second run with identical consensus inputs: zero writes
        let entity = store.get_entity(EntityKind::Movie, id).await.unwrap();
        let second = layer
            .apply_entity(&entity, &[change(id, "director", "S. S. Rajamouli")])
            .await
            .unwrap();
        assert!(second.is_empty());

        let history = db::provenance::list_for_entity(&pool, id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_read_is_apply_conflict() {
        let pool = test_pool().await;
        let id = Uuid::new_v4();
        seed_movie(&pool, id, "Magadheera", None).await;

        let store = EntityStore::new(pool.clone());
        let layer = ApplyLayer::new(store.clone());
        let entity = store.get_entity(EntityKind::Movie, id).await.unwrap();

        // Entity changes between read and apply
        sqlx::query("UPDATE movies SET director = 'Someone Else', updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now') WHERE guid = ?")
            .bind(id.to_string())
            .execute(&pool)
            .await
            .unwrap();

        let result = layer
            .apply_entity(&entity, &[change(id, "hero", "Ram Charan")])
            .await;
        assert!(matches!(result, Err(ValidationError::ApplyConflict { .. })));

        // Nothing was half-written
        let reloaded = store.get_entity(EntityKind::Movie, id).await.unwrap();
        assert_eq!(reloaded.field("hero"), None);
        let history = db::provenance::list_for_entity(&pool, id).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_entity_batch_is_all_or_nothing() {
        let pool = test_pool().await;
        let id = Uuid::new_v4();
        seed_movie(&pool, id, "Magadheera", Some("S. S. Rajamouli")).await;

        let store = EntityStore::new(pool.clone());
        let layer = ApplyLayer::new(store.clone());
        let entity = store.get_entity(EntityKind::Movie, id).await.unwrap();

        // One already-matching change plus one real change: single write
        let writes = layer
            .apply_entity(
                &entity,
                &[
                    change(id, "director", "S. S. Rajamouli"),
                    change(id, "hero", "Ram Charan"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].field, "hero");
    }

    #[tokio::test]
    async fn test_corrections_flow_through_apply_layer() {
        let pool = test_pool().await;
        let id = Uuid::new_v4();
        seed_movie(&pool, id, "Magadheera", Some("Wrong Name")).await;

        let store = EntityStore::new(pool.clone());
        let correction = Correction::manual(
            id,
            EntityKind::Movie,
            "director",
            FieldValue::text("S. S. Rajamouli"),
            Some("curated".to_string()),
        );
        db::corrections::insert(&pool, &correction).await.unwrap();

        let layer = ApplyLayer::new(store.clone());
        let pending = store.pending_corrections(None).await.unwrap();
        assert_eq!(pending.len(), 1);

        let report = layer.apply_corrections(&pending).await.unwrap();
        assert_eq!(report.writes.len(), 1);
        assert_eq!(report.writes[0].old_value.as_deref(), Some("Wrong Name"));

        // Correction is flagged applied and the trusted value replaced
        let remaining = store.pending_corrections(None).await.unwrap();
        assert!(remaining.is_empty());
        let reloaded = store.get_entity(EntityKind::Movie, id).await.unwrap();
        assert_eq!(
            reloaded.field("director"),
            Some(&FieldValue::text("S. S. Rajamouli"))
        );
    }
}
