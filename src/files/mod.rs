//! File Exchange
//!
//! Stores encrypted file bodies and serves them back by id. Bodies go to a
//! content store, metadata to a metadata store; the body is always written
//! first so a listed file can always be fetched.

pub mod ipfs;
pub mod sqlite;
pub mod store;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::Identity;
use store::{ContentStore, FileRecord, MetadataStore, StoreError};

/// A shared file including its envelope body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileShare {
    pub id: String,
    pub name: String,
    /// Envelope string
    pub data: String,
    pub username: String,
    pub timestamp: i64,
}

/// A shared file without its body, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: String,
    pub name: String,
    pub username: String,
    pub timestamp: i64,
}

impl From<FileRecord> for FileSummary {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            username: record.username,
            timestamp: record.timestamp,
        }
    }
}

/// File exchange errors
#[derive(Debug, Error)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

/// Coordinates uploads and downloads across the two stores
#[derive(Clone)]
pub struct FileExchange {
    metadata: Arc<dyn MetadataStore>,
    content: Arc<dyn ContentStore>,
}

impl FileExchange {
    pub fn new(metadata: Arc<dyn MetadataStore>, content: Arc<dyn ContentStore>) -> Self {
        Self { metadata, content }
    }

    /// Store a new file owned by `owner`
    pub async fn upload(
        &self,
        owner: &Identity,
        name: String,
        data: String,
    ) -> Result<FileShare, FileError> {
        if name.trim().is_empty() {
            return Err(FileError::InvalidRequest("name is required"));
        }
        if data.is_empty() {
            return Err(FileError::InvalidRequest("data is required"));
        }

        let content_id = self.content.put(data.clone().into_bytes()).await?;
        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            name,
            username: owner.username.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            content_id,
        };
        self.metadata.insert(record.clone()).await?;

        log::info!(
            "Stored file {} ({}, {} bytes) for {}",
            record.id,
            record.name,
            data.len(),
            record.username
        );
        Ok(FileShare {
            id: record.id,
            name: record.name,
            data,
            username: record.username,
            timestamp: record.timestamp,
        })
    }

    /// All files, oldest first, without bodies
    pub async fn list_all(&self) -> Result<Vec<FileSummary>, FileError> {
        let records = self.metadata.list().await?;
        Ok(records.into_iter().map(FileSummary::from).collect())
    }

    /// The envelope body of file `id`
    pub async fn fetch_body(&self, id: &str) -> Result<String, FileError> {
        let record = self
            .metadata
            .get(id)
            .await?
            .ok_or_else(|| FileError::NotFound(id.to_string()))?;

        let bytes = self.content.get(&record.content_id).await?.ok_or_else(|| {
            StoreError::Backend(format!("body {} missing for file {}", record.content_id, id))
        })?;

        String::from_utf8(bytes)
            .map_err(|_| StoreError::Backend(format!("body of file {} is not text", id)).into())
    }
}
