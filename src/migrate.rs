//! Metadata store schema migrations.
//!
//! Creates the tables the index builder must populate: files, chunks,
//! entities, chunk_entities, definitions, members, and the FTS5 index over
//! definitions. Idempotent; run via `ueq init` or at store creation in
//! tests.
//!
//! Deleting a file cascades to its chunks, definitions, chunk-entity edges,
//! and definition members.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            origin TEXT NOT NULL CHECK (origin IN ('engine', 'project')),
            sha256 TEXT NOT NULL,
            is_header INTEGER NOT NULL DEFAULT 0,
            is_implementation INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            byte_len INTEGER NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            vector_index INTEGER NOT NULL UNIQUE,
            has_uproperty INTEGER NOT NULL DEFAULT 0,
            has_uclass INTEGER NOT NULL DEFAULT 0,
            has_ufunction INTEGER NOT NULL DEFAULT 0,
            has_ustruct INTEGER NOT NULL DEFAULT 0,
            has_uenum INTEGER NOT NULL DEFAULT 0,
            UNIQUE (file_id, chunk_index),
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL CHECK (kind IN ('struct', 'class', 'enum', 'function', 'delegate', 'unknown')),
            prefix TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_entities (
            chunk_id INTEGER NOT NULL,
            entity_id INTEGER NOT NULL,
            PRIMARY KEY (chunk_id, entity_id),
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE,
            FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS definitions (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            entity_id INTEGER NOT NULL,
            line_start INTEGER NOT NULL,
            line_end INTEGER NOT NULL,
            content TEXT NOT NULL,
            UNIQUE (file_id, entity_id, line_start),
            FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE,
            FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY,
            definition_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            member_type TEXT,
            is_uproperty INTEGER NOT NULL DEFAULT 0,
            is_ufunction INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (definition_id) REFERENCES definitions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual tables cannot be created with IF NOT EXISTS; check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='fts_definitions'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE fts_definitions USING fts5(
                definition_id UNINDEXED,
                entity_name,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_definitions_file_id ON definitions(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_definitions_entity_id ON definitions(entity_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_entities_entity ON chunk_entities(entity_id)")
        .execute(pool)
        .await?;

    Ok(())
}
