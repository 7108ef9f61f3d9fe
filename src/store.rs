//! Index persistence.
//!
//! A persisted index is one SQLite file, `<storage.dir>/index.sqlite`:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `index_metadata` | key/value rows: `schema_version`, model id, dims, chunking, `built_at` |
//! | `document_fingerprints` | document id, content hash |
//! | `document_sources` | document id, source path at build time |
//! | `entries` | one row per chunk, embedding as a little-endian f32 BLOB |
//!
//! [`save`] writes a complete database to a staging file beside the target
//! and renames it over `index.sqlite`, so readers see either the previous
//! index or the new one and never a partial write.

use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use docqa_core::embedding::{blob_to_vec, vec_to_blob};
use docqa_core::index::VectorIndex;
use docqa_core::models::{Chunk, IndexEntry, IndexMetadata};
use docqa_core::{Error, Result};

use crate::db;

pub const INDEX_FILE_NAME: &str = "index.sqlite";
pub const SCHEMA_VERSION: i64 = 1;

/// Location of the persisted index inside a storage directory.
pub fn index_path(storage_dir: &Path) -> PathBuf {
    storage_dir.join(INDEX_FILE_NAME)
}

/// Persist `index` to `path` atomically.
pub async fn save(index: &VectorIndex, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

    let staging = dir.join(format!(".index-{}.sqlite.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = write_database(index, &staging).await {
        remove_if_exists(&staging);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&staging, path) {
        remove_if_exists(&staging);
        return Err(Error::io(path, e));
    }

    tracing::info!(
        path = %path.display(),
        entries = index.len(),
        "saved index"
    );
    Ok(())
}

/// Load a persisted index whose embeddings must have `expected_dims` entries.
///
/// # Errors
///
/// - [`Error::IndexNotFound`] if nothing is persisted at `path`.
/// - [`Error::CorruptIndex`] if the file is not a readable index, was
///   written by another schema version, or disagrees with `expected_dims`.
pub async fn load(path: &Path, expected_dims: usize) -> Result<VectorIndex> {
    if !path.is_file() {
        return Err(Error::IndexNotFound {
            path: path.to_path_buf(),
        });
    }

    let pool = db::open_read_only(path)
        .await
        .map_err(|e| corrupt(path, format!("cannot open: {}", e)))?;
    let result = read_index(&pool, path, expected_dims).await;
    pool.close().await;

    let index = result?;
    tracing::debug!(
        path = %path.display(),
        entries = index.len(),
        "loaded index"
    );
    Ok(index)
}

/// Delete a persisted index. Missing files are not an error.
pub fn discard(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "discarded persisted index");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

async fn write_database(index: &VectorIndex, path: &Path) -> Result<()> {
    let pool = db::create(path).await.map_err(storage)?;
    let result = write_tables(&pool, index).await;
    pool.close().await;
    result
}

async fn write_tables(pool: &SqlitePool, index: &VectorIndex) -> Result<()> {
    let mut tx = pool.begin().await.map_err(storage)?;

    sqlx::query(
        r#"
        CREATE TABLE index_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(storage)?;

    sqlx::query(
        r#"
        CREATE TABLE document_fingerprints (
            document_id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(storage)?;

    sqlx::query(
        r#"
        CREATE TABLE document_sources (
            document_id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(storage)?;

    sqlx::query(
        r#"
        CREATE TABLE entries (
            position INTEGER PRIMARY KEY,
            chunk_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            token_start INTEGER NOT NULL,
            token_end INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(storage)?;

    let meta = index.metadata();
    let pairs = [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("embedding_model_id", meta.embedding_model_id.clone()),
        ("dims", meta.dims.to_string()),
        ("chunk_size", meta.chunk_size.to_string()),
        ("chunk_overlap", meta.chunk_overlap.to_string()),
        ("built_at", meta.built_at.to_string()),
    ];
    for (key, value) in pairs {
        sqlx::query("INSERT INTO index_metadata (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
    }

    for (document_id, hash) in &meta.document_fingerprints {
        sqlx::query("INSERT INTO document_fingerprints (document_id, content_hash) VALUES (?, ?)")
            .bind(document_id)
            .bind(hash)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
    }

    for (document_id, source_path) in &meta.source_paths {
        sqlx::query("INSERT INTO document_sources (document_id, source_path) VALUES (?, ?)")
            .bind(document_id)
            .bind(source_path)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
    }

    for (position, entry) in index.entries().iter().enumerate() {
        let chunk = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO entries (position, chunk_id, document_id, sequence_index, token_start, token_end, text, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position as i64)
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.sequence_index as i64)
        .bind(chunk.token_start as i64)
        .bind(chunk.token_end as i64)
        .bind(&chunk.text)
        .bind(vec_to_blob(&entry.embedding))
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
    }

    tx.commit().await.map_err(storage)?;
    Ok(())
}

async fn read_index(pool: &SqlitePool, path: &Path, expected_dims: usize) -> Result<VectorIndex> {
    let sql_err = |e: sqlx::Error| corrupt(path, e.to_string());

    let rows = sqlx::query("SELECT key, value FROM index_metadata")
        .fetch_all(pool)
        .await
        .map_err(sql_err)?;
    let mut values = BTreeMap::new();
    for row in rows {
        let key: String = row.try_get("key").map_err(sql_err)?;
        let value: String = row.try_get("value").map_err(sql_err)?;
        values.insert(key, value);
    }

    let field = |key: &str| -> Result<String> {
        values
            .get(key)
            .cloned()
            .ok_or_else(|| corrupt(path, format!("metadata is missing `{}`", key)))
    };
    let number = |key: &str| -> Result<i64> {
        field(key)?
            .parse::<i64>()
            .map_err(|_| corrupt(path, format!("metadata `{}` is not a number", key)))
    };

    let version = number("schema_version")?;
    if version != SCHEMA_VERSION {
        return Err(corrupt(
            path,
            format!(
                "schema version {} (this build reads {})",
                version, SCHEMA_VERSION
            ),
        ));
    }

    let dims = to_usize(path, "dims", number("dims")?)?;
    if dims != expected_dims {
        return Err(corrupt(
            path,
            format!(
                "stored embeddings have {} dimensions but the embedder produces {}",
                dims, expected_dims
            ),
        ));
    }

    let mut metadata = IndexMetadata {
        embedding_model_id: field("embedding_model_id")?,
        dims,
        chunk_size: to_usize(path, "chunk_size", number("chunk_size")?)?,
        chunk_overlap: to_usize(path, "chunk_overlap", number("chunk_overlap")?)?,
        built_at: number("built_at")?,
        document_fingerprints: BTreeMap::new(),
        source_paths: BTreeMap::new(),
    };

    let rows = sqlx::query("SELECT document_id, content_hash FROM document_fingerprints")
        .fetch_all(pool)
        .await
        .map_err(sql_err)?;
    for row in rows {
        let document_id: String = row.try_get("document_id").map_err(sql_err)?;
        let content_hash: String = row.try_get("content_hash").map_err(sql_err)?;
        metadata
            .document_fingerprints
            .insert(document_id, content_hash);
    }

    let rows = sqlx::query("SELECT document_id, source_path FROM document_sources")
        .fetch_all(pool)
        .await
        .map_err(sql_err)?;
    for row in rows {
        let document_id: String = row.try_get("document_id").map_err(sql_err)?;
        let source_path: String = row.try_get("source_path").map_err(sql_err)?;
        metadata.source_paths.insert(document_id, source_path);
    }

    let rows = sqlx::query(
        r#"
        SELECT chunk_id, document_id, sequence_index, token_start, token_end, text, embedding
        FROM entries
        ORDER BY position
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(sql_err)?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let chunk_id: String = row.try_get("chunk_id").map_err(sql_err)?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(sql_err)?;
        let embedding = blob_to_vec(&blob)
            .ok_or_else(|| corrupt(path, format!("embedding of chunk {} is truncated", chunk_id)))?;

        entries.push(IndexEntry {
            chunk: Chunk {
                document_id: row.try_get("document_id").map_err(sql_err)?,
                sequence_index: to_usize(
                    path,
                    "sequence_index",
                    row.try_get("sequence_index").map_err(sql_err)?,
                )?,
                token_start: to_usize(
                    path,
                    "token_start",
                    row.try_get("token_start").map_err(sql_err)?,
                )?,
                token_end: to_usize(
                    path,
                    "token_end",
                    row.try_get("token_end").map_err(sql_err)?,
                )?,
                text: row.try_get("text").map_err(sql_err)?,
                id: chunk_id,
            },
            embedding,
        });
    }

    VectorIndex::build(entries, metadata).map_err(|e| corrupt(path, e.to_string()))
}

fn to_usize(path: &Path, what: &str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| corrupt(path, format!("`{}` is negative: {}", what, value)))
}

fn corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::CorruptIndex {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn storage(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove staging file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::chunk::chunk_id;
    use tempfile::TempDir;

    fn sample_index() -> VectorIndex {
        let entries = vec![
            entry("auth.md", 0, "To authenticate, send your key.", vec![0.25, -1.5, 3.0]),
            entry("auth.md", 1, "send your key. Done.", vec![1e-7, 0.0, -0.0]),
            entry("guides/limits.md", 0, "100 requests per minute.", vec![0.0, 1.0, 0.5]),
        ];
        let mut fingerprints = BTreeMap::new();
        fingerprints.insert("auth.md".to_string(), "aaa".to_string());
        fingerprints.insert("guides/limits.md".to_string(), "bbb".to_string());
        let source_paths = fingerprints
            .keys()
            .map(|k| (k.clone(), format!("/srv/docs/{}", k)))
            .collect();
        let metadata = IndexMetadata {
            embedding_model_id: "hash:feature-hash-v1".to_string(),
            dims: 3,
            chunk_size: 5,
            chunk_overlap: 2,
            built_at: 1_700_000_000,
            document_fingerprints: fingerprints,
            source_paths,
        };
        VectorIndex::build(entries, metadata).unwrap()
    }

    fn entry(doc: &str, seq: usize, text: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: chunk_id(doc, seq),
                document_id: doc.to_string(),
                text: text.to_string(),
                token_start: seq * 3,
                token_end: seq * 3 + 5,
                sequence_index: seq,
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = index_path(tmp.path());
        let index = sample_index();

        save(&index, &path).await.unwrap();
        let loaded = load(&path, 3).await.unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.metadata().source_paths["auth.md"], "/srv/docs/auth.md");
    }

    #[tokio::test]
    async fn test_save_replaces_previous_and_leaves_no_staging() {
        let tmp = TempDir::new().unwrap();
        let path = index_path(tmp.path());
        save(&sample_index(), &path).await.unwrap();

        let single = VectorIndex::build(
            vec![entry("a.md", 0, "alpha", vec![1.0, 0.0, 0.0])],
            IndexMetadata {
                embedding_model_id: "m".into(),
                dims: 3,
                chunk_size: 5,
                chunk_overlap: 0,
                built_at: 1,
                document_fingerprints: BTreeMap::new(),
                source_paths: BTreeMap::new(),
            },
        )
        .unwrap();
        save(&single, &path).await.unwrap();

        assert_eq!(load(&path, 3).await.unwrap(), single);
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![INDEX_FILE_NAME.to_string()]);
    }

    fn metadata_with(
        fingerprints: &[(&str, &str)],
        sources: &[(&str, &str)],
    ) -> IndexMetadata {
        IndexMetadata {
            embedding_model_id: "hash:feature-hash-v1".to_string(),
            dims: 3,
            chunk_size: 5,
            chunk_overlap: 0,
            built_at: 7,
            document_fingerprints: fingerprints
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            source_paths: sources
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_keeps_fingerprints_and_sources_independent() {
        let tmp = TempDir::new().unwrap();
        let path = index_path(tmp.path());
        let entries = || vec![entry("a.md", 0, "alpha", vec![1.0, 0.0, 0.0])];

        let no_sources = VectorIndex::build(entries(), metadata_with(&[("a.md", "h")], &[])).unwrap();
        save(&no_sources, &path).await.unwrap();
        let loaded = load(&path, 3).await.unwrap();
        assert_eq!(loaded, no_sources);
        assert!(loaded.metadata().source_paths.is_empty());

        let extra_source = VectorIndex::build(
            entries(),
            metadata_with(&[], &[("a.md", "/docs/a.md"), ("b.md", "/docs/b.md")]),
        )
        .unwrap();
        save(&extra_source, &path).await.unwrap();
        assert_eq!(load(&path, 3).await.unwrap(), extra_source);
    }

    #[tokio::test]
    async fn test_roundtrip_with_repeated_chunk_ids() {
        let tmp = TempDir::new().unwrap();
        let path = index_path(tmp.path());
        let mut first = entry("a.md", 0, "alpha", vec![1.0, 0.0, 0.0]);
        let mut second = entry("b.md", 0, "beta", vec![0.0, 1.0, 0.0]);
        first.chunk.id = "same".to_string();
        second.chunk.id = "same".to_string();
        let index = VectorIndex::build(
            vec![first, second],
            metadata_with(&[("a.md", "h1"), ("b.md", "h2")], &[]),
        )
        .unwrap();

        save(&index, &path).await.unwrap();
        assert_eq!(load(&path, 3).await.unwrap(), index);
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = load(&index_path(tmp.path()), 3).await.unwrap_err();
        assert!(matches!(err, Error::IndexNotFound { .. }));
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = index_path(tmp.path());
        std::fs::write(&path, b"definitely not a sqlite database, just some bytes").unwrap();
        let err = load(&path, 3).await.unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_dims_disagreement_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = index_path(tmp.path());
        save(&sample_index(), &path).await.unwrap();
        let err = load(&path, 384).await.unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { .. }));
        assert!(err.to_string().contains("384"));
    }

    #[tokio::test]
    async fn test_discard() {
        let tmp = TempDir::new().unwrap();
        let path = index_path(tmp.path());
        save(&sample_index(), &path).await.unwrap();
        discard(&path).unwrap();
        assert!(!path.exists());
        discard(&path).unwrap();
    }
}
