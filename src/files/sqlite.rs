//! SQLite metadata store

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use super::store::{FileRecord, MetadataStore, StoreError};

const SQL_CREATE_FILES: &str = "CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    username TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    content_id TEXT NOT NULL
)";

const SQL_INSERT_FILE: &str =
    "INSERT INTO files (id, name, username, timestamp, content_id) VALUES (?, ?, ?, ?, ?)";

const SQL_SELECT_ALL_FILES: &str =
    "SELECT id, name, username, timestamp, content_id FROM files ORDER BY timestamp ASC, rowid ASC";

const SQL_SELECT_FILE_BY_ID: &str =
    "SELECT id, name, username, timestamp, content_id FROM files WHERE id = ?";

type FileRow = (String, String, String, i64, String);

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        Self {
            id: row.0,
            name: row.1,
            username: row.2,
            timestamp: row.3,
            content_id: row.4,
        }
    }
}

/// File metadata persisted in SQLite
#[derive(Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Connect to `url` (e.g. `sqlite://files.db` or `sqlite::memory:`) and
    /// create the schema if missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = pool_options(url).connect_with(options).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SQL_CREATE_FILES).execute(&pool).await?;
        Ok(Self { pool })
    }
}

/// Pool settings for `url`. An in-memory database lives only as long as its
/// single connection, so that connection is never reaped.
fn pool_options(url: &str) -> SqlitePoolOptions {
    if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert(&self, record: FileRecord) -> Result<(), StoreError> {
        let result = sqlx::query(SQL_INSERT_FILE)
            .bind(&record.id)
            .bind(&record.name)
            .bind(&record.username)
            .bind(record.timestamp)
            .bind(&record.content_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(record.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<FileRecord>, StoreError> {
        let rows: Vec<FileRow> = sqlx::query_as(SQL_SELECT_ALL_FILES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, StoreError> {
        let row: Option<FileRow> = sqlx::query_as(SQL_SELECT_FILE_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(FileRecord::from))
    }
}
