//! Storage Collaborators
//!
//! File bodies live in a content-addressable store; file metadata lives in a
//! metadata store. Both are reached through the traits below so the
//! coordinator never depends on a concrete backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Identifier assigned by a content store
pub type ContentId = String;

/// Metadata row for an uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub username: String,
    pub timestamp: i64,
    pub content_id: ContentId,
}

/// Collaborator I/O failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Content store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Record already exists: {0}")]
    Duplicate(String),
    #[error("Invalid content id: {0}")]
    InvalidContentId(String),
    #[error("Unexpected backend response: {0}")]
    Backend(String),
}

/// Put/get access to an external content-addressable store
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, StoreError>;
    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Persistence for file metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, record: FileRecord) -> Result<(), StoreError>;
    /// All records, oldest first
    async fn list(&self) -> Result<Vec<FileRecord>, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<FileRecord>, StoreError>;
}

/// SHA-256 of the body, hex encoded
pub fn content_digest(bytes: &[u8]) -> ContentId {
    hex::encode(Sha256::digest(bytes))
}

/// In-process content store
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, StoreError> {
        let id = content_digest(&bytes);
        self.blobs.write().insert(id.clone(), bytes);
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.read().get(id).cloned())
    }
}

/// Content store keeping each body in a file named by its digest
#[derive(Debug)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Open the store, creating `root` if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.len() != 64 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StoreError::InvalidContentId(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, StoreError> {
        let id = content_digest(&bytes);
        let path = self.path_for(&id)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(id);
        }

        // Write then rename so readers never see a partial body
        let tmp = self.root.join(format!("{}.{}.tmp", id, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process metadata store
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: RwLock<Vec<FileRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: FileRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Duplicate(record.id));
        }
        records.push(record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FileRecord>, StoreError> {
        let mut records = self.records.read().clone();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, StoreError> {
        Ok(self.records.read().iter().find(|r| r.id == id).cloned())
    }
}
