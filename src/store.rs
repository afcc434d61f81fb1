//! Relational metadata store.
//!
//! SQLite (WAL mode) holding files, chunks, entities, definitions, and the
//! FTS5 index over definition text. The query pipeline only reads; writes
//! happen at index-build time through the same API, which the test suite
//! also uses to assemble fixture indexes.
//!
//! The store is the source of truth for `vector_index`: every chunk maps to
//! exactly one row of the dense vector matrix, with no gaps.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::QueryError;
use crate::migrate;
use crate::models::{EntityKind, Origin};

/// A chunk row joined with its file and entities, as loaded for the
/// in-memory filter structures.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub vector_index: usize,
    pub path: String,
    pub origin: Origin,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub is_header: bool,
    pub is_implementation: bool,
    pub has_uproperty: bool,
    pub has_uclass: bool,
    pub has_ufunction: bool,
    pub has_ustruct: bool,
    pub has_uenum: bool,
    /// `(name, kind)` for every entity the chunk references.
    pub entities: Vec<(String, EntityKind)>,
    /// Chunk text when the post-build store kept it; empty text is stored
    /// as `None`.
    pub content: Option<String>,
}

impl ChunkMeta {
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// A definition row returned by full-text search.
#[derive(Debug, Clone)]
pub struct FtsDefinition {
    pub entity_name: String,
    pub entity_kind: EntityKind,
    pub file_path: String,
    pub origin: Origin,
    pub line_start: i64,
    pub line_end: i64,
    pub content: String,
}

/// Fields describing one chunk at insert time.
#[derive(Debug, Clone)]
pub struct NewChunk<'a> {
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub byte_len: i64,
    pub content: &'a str,
    pub vector_index: i64,
    pub has_uproperty: bool,
    pub has_uclass: bool,
    pub has_ufunction: bool,
    pub has_ustruct: bool,
    pub has_uenum: bool,
}

/// Handle to the SQLite metadata store.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open an existing store read-write; fails fast when the database file
    /// is missing (the index has not been built).
    pub async fn open(path: &Path) -> Result<Self, QueryError> {
        if !path.exists() {
            return Err(QueryError::NotReady {
                path: path.to_path_buf(),
                reason: "metadata store missing; build the index first".to_string(),
            });
        }
        Self::connect(path, false).await.map_err(QueryError::Internal)
    }

    /// Create (or open) a store, running migrations. Used by `ueq init`,
    /// index builders, and tests.
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::connect(path, true).await?;
        migrate::run_migrations(&store.pool).await?;
        Ok(store)
    }

    async fn connect(path: &Path, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(create)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open metadata store at {}", path.display()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Cheap liveness probe for `/health`.
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    // -- read side ----------------------------------------------------------

    /// Load every chunk with its file attributes and entity references,
    /// ordered by `vector_index`.
    pub async fn load_chunk_meta(&self) -> Result<Vec<ChunkMeta>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.vector_index, c.chunk_index, c.total_chunks, c.content,
                   c.has_uproperty, c.has_uclass, c.has_ufunction, c.has_ustruct, c.has_uenum,
                   f.path, f.origin, f.is_header, f.is_implementation
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            ORDER BY c.vector_index
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut meta: Vec<ChunkMeta> = Vec::with_capacity(rows.len());
        let mut chunk_ids: Vec<i64> = Vec::with_capacity(rows.len());

        for row in &rows {
            let content: String = row.get("content");
            let origin: String = row.get("origin");
            chunk_ids.push(row.get("id"));
            meta.push(ChunkMeta {
                vector_index: row.get::<i64, _>("vector_index") as usize,
                path: row.get("path"),
                origin: origin.parse().unwrap_or_default(),
                chunk_index: row.get("chunk_index"),
                total_chunks: row.get("total_chunks"),
                is_header: row.get::<i64, _>("is_header") != 0,
                is_implementation: row.get::<i64, _>("is_implementation") != 0,
                has_uproperty: row.get::<i64, _>("has_uproperty") != 0,
                has_uclass: row.get::<i64, _>("has_uclass") != 0,
                has_ufunction: row.get::<i64, _>("has_ufunction") != 0,
                has_ustruct: row.get::<i64, _>("has_ustruct") != 0,
                has_uenum: row.get::<i64, _>("has_uenum") != 0,
                entities: Vec::new(),
                content: if content.is_empty() { None } else { Some(content) },
            });
        }

        // Second pass: attach entity references.
        let entity_rows = sqlx::query(
            r#"
            SELECT ce.chunk_id, e.name, e.kind
            FROM chunk_entities ce
            JOIN entities e ON e.id = ce.entity_id
            ORDER BY ce.chunk_id, e.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_chunk: std::collections::HashMap<i64, Vec<(String, EntityKind)>> =
            std::collections::HashMap::new();
        for row in &entity_rows {
            let kind: String = row.get("kind");
            by_chunk
                .entry(row.get("chunk_id"))
                .or_default()
                .push((row.get("name"), kind.parse().unwrap_or(EntityKind::Unknown)));
        }

        for (chunk_meta, chunk_id) in meta.iter_mut().zip(chunk_ids) {
            if let Some(entities) = by_chunk.remove(&chunk_id) {
                chunk_meta.entities = entities;
            }
        }

        Ok(meta)
    }

    /// Distinct indexed files with their origins, for the definition
    /// extractor's per-scope candidate cache.
    pub async fn indexed_files(&self) -> Result<Vec<(String, Origin)>> {
        let rows = sqlx::query("SELECT path, origin FROM files ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let origin: String = row.get("origin");
                (row.get("path"), origin.parse().unwrap_or_default())
            })
            .collect())
    }

    /// Full-text search over definition content and entity names, ordered by
    /// FTS rank. Used as the definition-branch fallback when source scanning
    /// finds nothing.
    pub async fn search_definitions(&self, query: &str, limit: i64) -> Result<Vec<FtsDefinition>> {
        // FTS5 treats most punctuation as syntax; quote the query to search
        // it as a literal string.
        let escaped = format!("\"{}\"", query.replace('"', "\"\""));

        let rows = sqlx::query(
            r#"
            SELECT e.name AS entity_name, e.kind AS entity_kind,
                   f.path AS file_path, f.origin,
                   d.line_start, d.line_end, d.content
            FROM fts_definitions fts
            JOIN definitions d ON d.id = fts.definition_id
            JOIN entities e ON e.id = d.entity_id
            JOIN files f ON f.id = d.file_id
            WHERE fts_definitions MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(escaped)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let kind: String = row.get("entity_kind");
                let origin: String = row.get("origin");
                FtsDefinition {
                    entity_name: row.get("entity_name"),
                    entity_kind: kind.parse().unwrap_or(EntityKind::Unknown),
                    file_path: row.get("file_path"),
                    origin: origin.parse().unwrap_or_default(),
                    line_start: row.get("line_start"),
                    line_end: row.get("line_end"),
                    content: row.get("content"),
                }
            })
            .collect())
    }

    /// Verify store-level invariants against the vector matrix shape:
    /// vector indices are unique (schema-enforced), in range, and gap-free.
    pub async fn verify_vector_indices(&self, expected_rows: usize) -> Result<(), QueryError> {
        let (count, min_idx, max_idx): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MIN(vector_index), MAX(vector_index) FROM chunks",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| QueryError::Internal(e.into()))?;

        if count as usize != expected_rows {
            return Err(QueryError::Internal(anyhow::anyhow!(
                "metadata store has {} chunks but the vector file has {} rows",
                count,
                expected_rows
            )));
        }
        if count > 0 {
            let min_idx = min_idx.unwrap_or(0);
            let max_idx = max_idx.unwrap_or(0);
            if min_idx != 0 || max_idx as usize != expected_rows - 1 {
                return Err(QueryError::Internal(anyhow::anyhow!(
                    "chunk vector indices span {}..={} but must span 0..={}",
                    min_idx,
                    max_idx,
                    expected_rows - 1
                )));
            }
        }
        Ok(())
    }

    // -- write side (index builder + tests) ---------------------------------

    /// Insert or update a file row, returning its id. Updating replaces the
    /// hash and flags but preserves the id (and therefore child rows).
    pub async fn upsert_file(
        &self,
        path: &str,
        origin: Origin,
        sha256: &str,
        is_header: bool,
        is_implementation: bool,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO files (path, origin, sha256, is_header, is_implementation)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                origin = excluded.origin,
                sha256 = excluded.sha256,
                is_header = excluded.is_header,
                is_implementation = excluded.is_implementation
            "#,
        )
        .bind(path)
        .bind(origin.as_str())
        .bind(sha256)
        .bind(is_header as i64)
        .bind(is_implementation as i64)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM files WHERE path = ?")
            .bind(path)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Delete a file; cascades to chunks, definitions, members, and
    /// chunk-entity edges.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn file_id(&self, path: &str) -> Result<Option<i64>> {
        Ok(sqlx::query_scalar("SELECT id FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn insert_chunk(&self, file_id: i64, chunk: &NewChunk<'_>) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO chunks
                (file_id, chunk_index, total_chunks, byte_len, content, vector_index,
                 has_uproperty, has_uclass, has_ufunction, has_ustruct, has_uenum)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file_id)
        .bind(chunk.chunk_index)
        .bind(chunk.total_chunks)
        .bind(chunk.byte_len)
        .bind(chunk.content)
        .bind(chunk.vector_index)
        .bind(chunk.has_uproperty as i64)
        .bind(chunk.has_uclass as i64)
        .bind(chunk.has_ufunction as i64)
        .bind(chunk.has_ustruct as i64)
        .bind(chunk.has_uenum as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Insert an entity if new; return its id either way.
    pub async fn insert_entity(
        &self,
        name: &str,
        kind: EntityKind,
        prefix: Option<char>,
    ) -> Result<i64> {
        sqlx::query(
            "INSERT INTO entities (name, kind, prefix) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(kind.as_str())
        .bind(prefix.map(String::from))
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM entities WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn link_chunk_entity(&self, chunk_id: i64, entity_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO chunk_entities (chunk_id, entity_id) VALUES (?, ?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(chunk_id)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a definition (and its FTS row), returning its id.
    pub async fn insert_definition(
        &self,
        file_id: i64,
        entity_id: i64,
        line_start: i64,
        line_end: i64,
        content: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO definitions (file_id, entity_id, line_start, line_end, content)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(file_id)
        .bind(entity_id)
        .bind(line_start)
        .bind(line_end)
        .bind(content)
        .execute(&self.pool)
        .await?;
        let definition_id = result.last_insert_rowid();

        let entity_name: String = sqlx::query_scalar("SELECT name FROM entities WHERE id = ?")
            .bind(entity_id)
            .fetch_one(&self.pool)
            .await?;

        sqlx::query(
            "INSERT INTO fts_definitions (definition_id, entity_name, content) VALUES (?, ?, ?)",
        )
        .bind(definition_id)
        .bind(entity_name)
        .bind(content)
        .execute(&self.pool)
        .await?;

        Ok(definition_id)
    }

    pub async fn insert_member(
        &self,
        definition_id: i64,
        name: &str,
        member_type: Option<&str>,
        is_uproperty: bool,
        is_ufunction: bool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO members (definition_id, name, member_type, is_uproperty, is_ufunction) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(definition_id)
        .bind(name)
        .bind(member_type)
        .bind(is_uproperty as i64)
        .bind(is_ufunction as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::create(&dir.path().join("meta.db")).await.unwrap();
        (dir, store)
    }

    async fn seed_file(store: &MetadataStore, path: &str, origin: Origin) -> i64 {
        store
            .upsert_file(path, origin, "deadbeef", path.ends_with(".h"), path.ends_with(".cpp"))
            .await
            .unwrap()
    }

    fn chunk(vector_index: i64) -> NewChunk<'static> {
        NewChunk {
            chunk_index: vector_index,
            total_chunks: 2,
            byte_len: 100,
            content: "",
            vector_index,
            has_uproperty: false,
            has_uclass: false,
            has_ufunction: false,
            has_ustruct: false,
            has_uenum: false,
        }
    }

    #[tokio::test]
    async fn test_open_missing_store_is_not_ready() {
        let err = MetadataStore::open(Path::new("/no/such/meta.db")).await.unwrap_err();
        assert!(matches!(err, QueryError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_chunk_meta_roundtrip() {
        let (_dir, store) = test_store().await;
        let file_id = seed_file(&store, "/src/HitResult.h", Origin::Engine).await;

        let mut first = chunk(0);
        first.has_ustruct = true;
        first.content = "struct FHitResult {";
        let chunk_id = store.insert_chunk(file_id, &first).await.unwrap();
        store.insert_chunk(file_id, &chunk(1)).await.unwrap();

        let entity_id = store
            .insert_entity("FHitResult", EntityKind::Struct, Some('F'))
            .await
            .unwrap();
        store.link_chunk_entity(chunk_id, entity_id).await.unwrap();

        let meta = store.load_chunk_meta().await.unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[0].vector_index, 0);
        assert!(meta[0].has_ustruct);
        assert!(meta[0].is_header);
        assert_eq!(meta[0].entities, vec![("FHitResult".to_string(), EntityKind::Struct)]);
        assert_eq!(meta[0].content.as_deref(), Some("struct FHitResult {"));
        // Empty content loads as None.
        assert!(meta[1].content.is_none());
        assert!(meta[1].entities.is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (_dir, store) = test_store().await;
        let file_id = seed_file(&store, "/src/Actor.h", Origin::Engine).await;
        let chunk_id = store.insert_chunk(file_id, &chunk(0)).await.unwrap();
        let entity_id = store
            .insert_entity("AActor", EntityKind::Class, Some('A'))
            .await
            .unwrap();
        store.link_chunk_entity(chunk_id, entity_id).await.unwrap();
        let def_id = store
            .insert_definition(file_id, entity_id, 10, 50, "class AActor {};")
            .await
            .unwrap();
        store
            .insert_member(def_id, "RootComponent", Some("USceneComponent*"), true, false)
            .await
            .unwrap();

        store.delete_file("/src/Actor.h").await.unwrap();

        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let defs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM definitions")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let edges: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_entities")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let members: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM members")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!((chunks, defs, edges, members), (0, 0, 0, 0));

        // The entity row survives (entities are global).
        let entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(entities, 1);
    }

    #[tokio::test]
    async fn test_fts_definition_search() {
        let (_dir, store) = test_store().await;
        let file_id = seed_file(&store, "/src/HitResult.h", Origin::Engine).await;
        let entity_id = store
            .insert_entity("FHitResult", EntityKind::Struct, Some('F'))
            .await
            .unwrap();
        store
            .insert_definition(file_id, entity_id, 5, 40, "struct FHitResult { float Time; };")
            .await
            .unwrap();

        let hits = store.search_definitions("FHitResult", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_name, "FHitResult");
        assert_eq!(hits[0].entity_kind, EntityKind::Struct);
        assert_eq!(hits[0].line_start, 5);

        let empty = store.search_definitions("NothingHere", 10).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_vector_index_invariants() {
        let (_dir, store) = test_store().await;
        let file_id = seed_file(&store, "/src/A.h", Origin::Engine).await;
        store.insert_chunk(file_id, &chunk(0)).await.unwrap();
        store.insert_chunk(file_id, &chunk(1)).await.unwrap();

        store.verify_vector_indices(2).await.unwrap();
        assert!(store.verify_vector_indices(3).await.is_err());

        // A duplicate vector_index violates the schema outright.
        let duplicate = store.insert_chunk(file_id, &chunk(1)).await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_upsert_preserves_file_id() {
        let (_dir, store) = test_store().await;
        let first = seed_file(&store, "/src/A.h", Origin::Engine).await;
        let second = store
            .upsert_file("/src/A.h", Origin::Project, "cafebabe", true, false)
            .await
            .unwrap();
        assert_eq!(first, second);

        let files = store.indexed_files().await.unwrap();
        assert_eq!(files, vec![("/src/A.h".to_string(), Origin::Project)]);
    }
}
