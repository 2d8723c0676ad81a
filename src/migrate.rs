use sqlx::SqlitePool;

use crate::error::IndexError;

/// Create the `files` and `entries` tables. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), IndexError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            file_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            width INTEGER,
            height INTEGER,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One vector per (file, modality); content_hash ties it to the file
    // version it was computed from.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            path TEXT NOT NULL,
            modality TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            snippet TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            content_hash TEXT NOT NULL,
            PRIMARY KEY (path, modality),
            FOREIGN KEY (path) REFERENCES files(path) ON DELETE CASCADE ON UPDATE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_modality ON entries(modality)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_status ON files(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_modified_at ON files(modified_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
