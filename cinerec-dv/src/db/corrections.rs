//! Manual correction records
//!
//! One declarative table replaces the portal's pile of one-off fix
//! scripts: each row names an entity, a field and the curated value, and
//! the Apply Layer consumes them exactly like automated consensus output
//! (with top source priority). Applied rows are flagged, not deleted, so
//! the curation history stays queryable.

use crate::types::{Correction, EntityKind, FieldValue};
use cinerec_common::{Error, Result};
use sqlx::{Row, Sqlite, SqlitePool};
use uuid::Uuid;

/// Corrections not yet applied, oldest first
pub async fn pending(pool: &SqlitePool, kind: Option<EntityKind>) -> Result<Vec<Correction>> {
    let mut sql =
        "SELECT entity_id, entity_kind, field, value, rationale FROM corrections WHERE applied = 0"
            .to_string();
    if kind.is_some() {
        sql.push_str(" AND entity_kind = ?");
    }
    sql.push_str(" ORDER BY id ASC");

    let mut query = sqlx::query(&sql);
    if let Some(kind) = kind {
        query = query.bind(kind.as_str());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            let entity_id: String = row.try_get("entity_id")?;
            let entity_id = Uuid::parse_str(&entity_id)
                .map_err(|e| Error::Internal(format!("Bad correction entity_id: {}", e)))?;
            let kind_raw: String = row.try_get("entity_kind")?;
            let kind = EntityKind::parse(&kind_raw)
                .ok_or_else(|| Error::Internal(format!("Bad entity_kind: {}", kind_raw)))?;
            let field: String = row.try_get("field")?;
            let value: String = row.try_get("value")?;
            let rationale: Option<String> = row.try_get("rationale")?;

            Ok(Correction::manual(
                entity_id,
                kind,
                field.clone(),
                FieldValue::parse_for_field(&field, &value),
                rationale,
            ))
        })
        .collect()
}

pub async fn insert(pool: &SqlitePool, correction: &Correction) -> Result<()> {
    sqlx::query(
        "INSERT INTO corrections (entity_id, entity_kind, field, value, rationale) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(correction.entity_id.to_string())
    .bind(correction.kind.as_str())
    .bind(&correction.field)
    .bind(correction.value.to_string())
    .bind(&correction.rationale)
    .execute(pool)
    .await?;

    Ok(())
}

/// Flag a correction as applied (inside the entity's apply transaction)
pub async fn mark_applied<'e, E>(executor: E, entity_id: Uuid, field: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE corrections SET applied = 1 WHERE entity_id = ? AND field = ? AND applied = 0")
        .bind(entity_id.to_string())
        .bind(field)
        .execute(executor)
        .await?;

    Ok(())
}
