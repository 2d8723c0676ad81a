//! Vector Index over SQLite.
//!
//! Two tables back the index (see [`crate::migrate`]): `files` holds one
//! [`FileRecord`] per tracked path and `entries` holds at most one vector per
//! `(path, modality)`. Every mutation of a path runs in a single transaction,
//! so a reader sees either the old set of entries for a file or the new one.
//!
//! Queries only consider *live* entries: the owning record is `indexed` and
//! the entry's `content_hash` equals the record's. Anything else is stale and
//! invisible until the file is re-ingested.
//!
//! Similarity is brute-force cosine over the modality's vectors, computed in
//! Rust after loading candidate BLOBs. Cross-modality comparison never
//! happens here.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::IndexError;
use crate::migrate;
use crate::models::{
    FileRecord, FileStatus, FileType, IndexEntry, IndexHit, IndexStats, Modality, SearchFilters,
    Tag,
};

#[derive(Clone)]
pub struct VectorIndex {
    pool: SqlitePool,
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl VectorIndex {
    /// Open (or create) the index at `db_path` and apply migrations.
    pub async fn open(db_path: &Path) -> Result<Self, IndexError> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Replace every entry of `record.path` with `entries` and store the
    /// record, all in one transaction. An empty `entries` leaves the file
    /// tracked with nothing searchable.
    pub async fn upsert(&self, record: &FileRecord, entries: &[IndexEntry]) -> Result<(), IndexError> {
        for entry in entries {
            let expected = entry.modality.dims();
            if entry.vector.len() != expected {
                return Err(IndexError::Dimension {
                    modality: entry.modality,
                    expected,
                    actual: entry.vector.len(),
                });
            }
        }

        let key = path_key(&record.path);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO files (path, content_hash, file_type, size, modified_at, created_at,
                               status, error, width, height, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                file_type = excluded.file_type,
                size = excluded.size,
                modified_at = excluded.modified_at,
                created_at = excluded.created_at,
                status = excluded.status,
                error = excluded.error,
                width = excluded.width,
                height = excluded.height,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&key)
        .bind(&record.content_hash)
        .bind(record.file_type.as_str())
        .bind(record.size as i64)
        .bind(record.modified_at)
        .bind(record.created_at)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.width.map(i64::from))
        .bind(record.height.map(i64::from))
        .bind(record.indexed_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM entries WHERE path = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            let tags_json = serde_json::to_string(&entry.tags)?;
            sqlx::query(
                r#"
                INSERT INTO entries (path, modality, dims, embedding, snippet, tags_json, content_hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&key)
            .bind(entry.modality.as_str())
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .bind(&entry.snippet)
            .bind(&tags_json)
            .bind(&entry.content_hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove a path's record and all its entries. Returns whether anything
    /// was tracked.
    pub async fn delete(&self, path: &Path) -> Result<bool, IndexError> {
        let key = path_key(path);
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entries WHERE path = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    /// Remove every record strictly below `dir`. Returns the removed paths.
    pub async fn delete_under(&self, dir: &Path) -> Result<Vec<PathBuf>, IndexError> {
        let doomed: Vec<PathBuf> = self
            .all_paths()
            .await?
            .into_iter()
            .filter(|p| p != dir && p.starts_with(dir))
            .collect();
        if doomed.is_empty() {
            return Ok(doomed);
        }

        let mut tx = self.pool.begin().await?;
        for path in &doomed {
            let key = path_key(path);
            sqlx::query("DELETE FROM entries WHERE path = ?")
                .bind(&key)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM files WHERE path = ?")
                .bind(&key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(doomed)
    }

    /// Move a record and its entries to a new path without re-embedding.
    /// Anything previously tracked at `to` is replaced. Returns false when
    /// `from` was not tracked.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<bool, IndexError> {
        let (from_key, to_key) = (path_key(from), path_key(to));
        let mut tx = self.pool.begin().await?;

        // Write before any read: a WAL read transaction cannot be upgraded
        // once another connection has committed.
        sqlx::query(
            "DELETE FROM entries WHERE path = ? AND EXISTS (SELECT 1 FROM files WHERE path = ?)",
        )
        .bind(&to_key)
        .bind(&from_key)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM files WHERE path = ? AND EXISTS (SELECT 1 FROM files WHERE path = ?)",
        )
        .bind(&to_key)
        .bind(&from_key)
        .execute(&mut *tx)
        .await?;
        // entries follow through ON UPDATE CASCADE
        let moved = sqlx::query("UPDATE files SET path = ?, file_type = ? WHERE path = ?")
            .bind(&to_key)
            .bind(FileType::from_path(to).as_str())
            .bind(&from_key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if moved == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_record(&self, path: &Path) -> Result<Option<FileRecord>, IndexError> {
        let row = sqlx::query("SELECT * FROM files WHERE path = ?")
            .bind(path_key(path))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    /// All records, most recently modified first.
    pub async fn list_records(&self) -> Result<Vec<FileRecord>, IndexError> {
        let rows = sqlx::query("SELECT * FROM files ORDER BY modified_at DESC, path ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    pub async fn all_paths(&self) -> Result<Vec<PathBuf>, IndexError> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM files")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths.into_iter().map(PathBuf::from).collect())
    }

    pub async fn is_empty(&self) -> Result<bool, IndexError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count == 0)
    }

    /// Stored entries for one path, live or not.
    pub async fn entries_for(&self, path: &Path) -> Result<Vec<IndexEntry>, IndexError> {
        let rows = sqlx::query(
            "SELECT path, modality, embedding, snippet, tags_json, content_hash \
             FROM entries WHERE path = ? ORDER BY modality",
        )
        .bind(path_key(path))
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let modality: String = row.get("modality");
            let Some(modality) = Modality::parse(&modality) else {
                continue;
            };
            let blob: Vec<u8> = row.get("embedding");
            let tags_json: String = row.get("tags_json");
            entries.push(IndexEntry {
                path: PathBuf::from(row.get::<String, _>("path")),
                modality,
                vector: blob_to_vec(&blob),
                snippet: row.get("snippet"),
                tags: serde_json::from_str(&tags_json)?,
                content_hash: row.get("content_hash"),
            });
        }
        Ok(entries)
    }

    /// The `k` live entries of `modality` nearest to `vector`, restricted by
    /// `filters`. Ties fall back to newer files first, then path order.
    pub async fn query(
        &self,
        modality: Modality,
        vector: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<IndexHit>, IndexError> {
        if vector.len() != modality.dims() {
            return Err(IndexError::Dimension {
                modality,
                expected: modality.dims(),
                actual: vector.len(),
            });
        }
        if k == 0 || !filters.admits_modality(modality) {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT e.path, e.embedding, e.snippet, e.tags_json, f.file_type, f.modified_at
            FROM entries e
            JOIN files f ON f.path = e.path
            WHERE e.modality = ?
              AND f.status = 'indexed'
              AND e.content_hash = f.content_hash
              AND (? IS NULL OR f.modified_at >= ?)
              AND (? IS NULL OR f.modified_at <= ?)
            "#,
        )
        .bind(modality.as_str())
        .bind(filters.modified_after)
        .bind(filters.modified_after)
        .bind(filters.modified_before)
        .bind(filters.modified_before)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let file_type = FileType::parse(row.get::<&str, _>("file_type")).unwrap_or(FileType::Other);
            let modified_at: i64 = row.get("modified_at");
            if !filters.matches(file_type, modified_at) {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let tags_json: String = row.get("tags_json");
            let tags: Vec<Tag> = serde_json::from_str(&tags_json)?;
            hits.push(IndexHit {
                path: PathBuf::from(row.get::<String, _>("path")),
                modality,
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                file_type,
                modified_at,
                snippet: row.get("snippet"),
                tags,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.modified_at.cmp(&a.modified_at))
                .then_with(|| a.path.cmp(&b.path))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// One random indexed record, if any.
    pub async fn random_indexed(&self) -> Result<Option<FileRecord>, IndexError> {
        let row = sqlx::query("SELECT * FROM files WHERE status = 'indexed' ORDER BY RANDOM() LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    /// Counts by type, status, and live entries per modality. `in_flight` is
    /// left empty; only the pipeline knows about it.
    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        let total_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;

        let by_type = grouped_counts(
            &self.pool,
            "SELECT file_type AS k, COUNT(*) AS n FROM files GROUP BY file_type",
        )
        .await?;
        let by_status = grouped_counts(
            &self.pool,
            "SELECT status AS k, COUNT(*) AS n FROM files GROUP BY status",
        )
        .await?;
        let entries_by_modality = grouped_counts(
            &self.pool,
            "SELECT e.modality AS k, COUNT(*) AS n FROM entries e \
             JOIN files f ON f.path = e.path \
             WHERE f.status = 'indexed' AND e.content_hash = f.content_hash \
             GROUP BY e.modality",
        )
        .await?;

        Ok(IndexStats {
            total_files,
            by_type,
            by_status,
            entries_by_modality,
            in_flight: BTreeMap::new(),
            watcher_error: None,
        })
    }
}

async fn grouped_counts(pool: &SqlitePool, sql: &str) -> Result<BTreeMap<String, i64>, IndexError> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("k"), row.get::<i64, _>("n")))
        .collect())
}

fn record_from_row(row: &SqliteRow) -> FileRecord {
    let file_type: String = row.get("file_type");
    let status: String = row.get("status");
    let size: i64 = row.get("size");
    let width: Option<i64> = row.get("width");
    let height: Option<i64> = row.get("height");
    FileRecord {
        path: PathBuf::from(row.get::<String, _>("path")),
        content_hash: row.get("content_hash"),
        file_type: FileType::parse(&file_type).unwrap_or(FileType::Other),
        size: size.max(0) as u64,
        modified_at: row.get("modified_at"),
        created_at: row.get("created_at"),
        status: FileStatus::parse(&status).unwrap_or(FileStatus::Discovered),
        error: row.get("error"),
        width: width.map(|w| w as u32),
        height: height.map(|h| h as u32),
        indexed_at: row.get("indexed_at"),
    }
}
