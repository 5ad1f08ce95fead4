//! Canonical entity rows (movies, people) and the field/column mapping
//!
//! The engine addresses descriptive data by field name; this module owns
//! the translation to concrete columns and value encodings (cast lists are
//! stored as JSON arrays, runtimes as integers, the rest as text).

use crate::types::{CastMember, Entity, EntityKind, FieldValue};
use cinerec_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use sqlx::sqlite::SqliteRow;
use std::collections::HashMap;
use uuid::Uuid;

/// field name -> column name, per entity kind
const MOVIE_COLUMNS: &[(&str, &str)] = &[
    ("language", "language"),
    ("director", "director"),
    ("hero", "hero"),
    ("heroine", "heroine"),
    ("music_director", "music_director"),
    ("genre", "genre"),
    ("synopsis", "synopsis"),
    ("runtime", "runtime"),
    ("cast", "cast_list"),
];

const PERSON_COLUMNS: &[(&str, &str)] = &[
    ("occupation", "occupation"),
    ("birthplace", "birthplace"),
    ("bio", "bio"),
];

const EXTERNAL_ID_COLUMNS: &[&str] = &["tmdb_id", "imdb_id", "wikidata_id"];

pub fn field_columns(kind: EntityKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        EntityKind::Movie => MOVIE_COLUMNS,
        EntityKind::Person => PERSON_COLUMNS,
    }
}

/// Column backing a field, if the field is known for this kind
pub fn column_for_field(kind: EntityKind, field: &str) -> Option<&'static str> {
    field_columns(kind)
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, c)| *c)
}

pub fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Movie => "movies",
        EntityKind::Person => "people",
    }
}

fn title_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Movie => "title",
        EntityKind::Person => "name",
    }
}

fn year_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Movie => "year",
        EntityKind::Person => "birth_year",
    }
}

/// Encode a field value for its column. Cast lists serialize to JSON so
/// the detailed shape survives the round trip.
pub fn encode_field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.clone(),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Cast(members) => {
            serde_json::to_string(members).unwrap_or_else(|_| "[]".to_string())
        }
    }
}

fn decode_text_field(field: &str, raw: String) -> FieldValue {
    match field {
        "cast" => {
            let members: Vec<CastMember> = serde_json::from_str(&raw).unwrap_or_default();
            FieldValue::Cast(members)
        }
        _ => FieldValue::Text(raw),
    }
}

fn entity_from_row(kind: EntityKind, row: &SqliteRow) -> Result<Entity> {
    let guid: String = row.try_get("guid")?;
    let id = Uuid::parse_str(&guid)
        .map_err(|e| Error::Internal(format!("Bad entity guid {}: {}", guid, e)))?;

    let title: String = row.try_get(title_column(kind))?;
    let year: Option<i64> = row.try_get(year_column(kind))?;

    let mut fields = HashMap::new();
    for (field, column) in field_columns(kind) {
        if *field == "runtime" {
            let value: Option<i64> = row.try_get(*column)?;
            if let Some(n) = value {
                fields.insert(field.to_string(), FieldValue::Number(n));
            }
        } else {
            let value: Option<String> = row.try_get(*column)?;
            if let Some(raw) = value {
                if !raw.trim().is_empty() {
                    fields.insert(field.to_string(), decode_text_field(field, raw));
                }
            }
        }
    }

    let mut external_ids = HashMap::new();
    for column in EXTERNAL_ID_COLUMNS {
        let value: Option<String> = row.try_get(*column)?;
        if let Some(id_value) = value {
            if !id_value.trim().is_empty() {
                external_ids.insert(column.to_string(), id_value);
            }
        }
    }

    let grade: Option<String> = row.try_get("grade")?;
    let last_verified_at: Option<String> = row.try_get("last_verified_at")?;
    let last_verified_at = last_verified_at
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let needs_manual_review: i64 = row.try_get("needs_manual_review")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Entity {
        id,
        kind,
        title,
        year: year.map(|y| y as i32),
        fields,
        external_ids,
        grade,
        last_verified_at,
        needs_manual_review: needs_manual_review != 0,
        updated_at,
    })
}

pub async fn get_entity(pool: &SqlitePool, kind: EntityKind, id: Uuid) -> Result<Entity> {
    let sql = format!("SELECT * FROM {} WHERE guid = ?", table_for(kind));
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{} {}", kind, id)))?;

    entity_from_row(kind, &row)
}

/// Filters for selecting the batch of entities to validate
#[derive(Debug, Clone)]
pub struct ValidationFilter {
    pub kind: EntityKind,
    /// Max entities per run
    pub limit: Option<u32>,
    /// Restrict to release years within one decade (e.g. 1990)
    pub decade: Option<i32>,
    /// Only entities holding at least one stored provider id
    pub require_external_id: bool,
}

impl ValidationFilter {
    pub fn all(kind: EntityKind) -> Self {
        Self {
            kind,
            limit: None,
            decade: None,
            require_external_id: false,
        }
    }
}

/// Entities due for validation, least-recently-verified first
///
/// Ordering is pinned (verification age, then guid) so repeated runs over
/// the same data walk the same sequence.
pub async fn list_entities_needing_validation(
    pool: &SqlitePool,
    filter: &ValidationFilter,
) -> Result<Vec<Entity>> {
    let table = table_for(filter.kind);
    let year_col = year_column(filter.kind);

    let mut sql = format!("SELECT * FROM {} WHERE 1=1", table);
    if filter.decade.is_some() {
        sql.push_str(&format!(" AND {} BETWEEN ? AND ?", year_col));
    }
    if filter.require_external_id {
        sql.push_str(" AND (tmdb_id IS NOT NULL OR imdb_id IS NOT NULL OR wikidata_id IS NOT NULL)");
    }
    sql.push_str(" ORDER BY COALESCE(last_verified_at, '') ASC, guid ASC");
    if filter.limit.is_some() {
        sql.push_str(" LIMIT ?");
    }

    let mut query = sqlx::query(&sql);
    if let Some(decade) = filter.decade {
        query = query.bind(decade).bind(decade + 9);
    }
    if let Some(limit) = filter.limit {
        query = query.bind(limit);
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter()
        .map(|row| entity_from_row(filter.kind, row))
        .collect()
}
