//! Entity store access for cinerec-dv
//!
//! SQLite-backed store holding the portal's canonical movie and people
//! records, plus the engine's corrections queue and provenance audit
//! trail. The store is constructed once per run and passed through the
//! pipeline; every component except the Apply Layer is read-only with
//! respect to persisted state.

pub mod corrections;
pub mod entities;
pub mod provenance;

pub use entities::ValidationFilter;

use crate::types::{Correction, Entity, EntityKind};
use cinerec_common::Result;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

/// Initialize database connection pool
///
/// Connects to the portal database, creating it (and the engine's own
/// tables) if missing.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize tables if they don't exist
///
/// `movies` and `people` are the portal's canonical records; `corrections`
/// and `field_provenance` belong to the reconciliation engine.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS movies (
            guid TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            year INTEGER,
            language TEXT,
            director TEXT,
            hero TEXT,
            heroine TEXT,
            music_director TEXT,
            genre TEXT,
            synopsis TEXT,
            runtime INTEGER,
            cast_list TEXT,
            tmdb_id TEXT,
            imdb_id TEXT,
            wikidata_id TEXT,
            grade TEXT,
            last_verified_at TEXT,
            needs_manual_review INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS people (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            birth_year INTEGER,
            occupation TEXT,
            birthplace TEXT,
            bio TEXT,
            tmdb_id TEXT,
            imdb_id TEXT,
            wikidata_id TEXT,
            grade TEXT,
            last_verified_at TEXT,
            needs_manual_review INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corrections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            field TEXT NOT NULL,
            value TEXT NOT NULL,
            rationale TEXT,
            applied INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_provenance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            field TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT NOT NULL,
            sources TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (movies, people, corrections, field_provenance)"
    );

    Ok(())
}

/// Handle to the entity store, passed through the pipeline
///
/// Created at run start, dropped at run end; no module-level client.
#[derive(Clone)]
pub struct EntityStore {
    pool: SqlitePool,
}

impl EntityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Raw pool handle for the Apply Layer's transactions
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get_entity(&self, kind: EntityKind, id: Uuid) -> Result<Entity> {
        entities::get_entity(&self.pool, kind, id).await
    }

    pub async fn list_entities_needing_validation(
        &self,
        filter: &ValidationFilter,
    ) -> Result<Vec<Entity>> {
        entities::list_entities_needing_validation(&self.pool, filter).await
    }

    pub async fn pending_corrections(
        &self,
        kind: Option<EntityKind>,
    ) -> Result<Vec<Correction>> {
        corrections::pending(&self.pool, kind).await
    }
}
