//! Field write provenance
//!
//! Every Apply Layer write records the old value, new value, contributing
//! sources and timestamp. Enough for a human to audit any change and roll
//! it back by hand.

use cinerec_common::Result;
use crate::types::EntityKind;
use sqlx::{Row, Sqlite, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ProvenanceRecord {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub sources: Vec<String>,
    pub applied_at: String,
}

/// Record one field write (inside the entity's apply transaction)
pub async fn record_write<'e, E>(
    executor: E,
    entity_id: Uuid,
    kind: EntityKind,
    field: &str,
    old_value: Option<&str>,
    new_value: &str,
    sources: &[String],
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sources_json = serde_json::to_string(sources)
        .map_err(|e| cinerec_common::Error::Internal(format!("Encode sources failed: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO field_provenance (entity_id, entity_kind, field, old_value, new_value, sources)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entity_id.to_string())
    .bind(kind.as_str())
    .bind(field)
    .bind(old_value)
    .bind(new_value)
    .bind(sources_json)
    .execute(executor)
    .await?;

    Ok(())
}

/// Write history for one entity, newest first
pub async fn list_for_entity(pool: &SqlitePool, entity_id: Uuid) -> Result<Vec<ProvenanceRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT entity_id, entity_kind, field, old_value, new_value, sources, applied_at
        FROM field_provenance
        WHERE entity_id = ?
        ORDER BY id DESC
        "#,
    )
    .bind(entity_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let entity_id: String = row.try_get("entity_id")?;
            let entity_id = Uuid::parse_str(&entity_id)
                .map_err(|e| cinerec_common::Error::Internal(format!("Bad guid: {}", e)))?;
            let kind_raw: String = row.try_get("entity_kind")?;
            let kind = EntityKind::parse(&kind_raw).unwrap_or(EntityKind::Movie);
            let sources_raw: String = row.try_get("sources")?;
            let sources: Vec<String> = serde_json::from_str(&sources_raw).unwrap_or_default();

            Ok(ProvenanceRecord {
                entity_id,
                kind,
                field: row.try_get("field")?,
                old_value: row.try_get("old_value")?,
                new_value: row.try_get("new_value")?,
                sources,
                applied_at: row.try_get("applied_at")?,
            })
        })
        .collect()
}
