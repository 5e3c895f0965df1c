//! IPFS content store
//!
//! Talks to a Kubo node over its HTTP RPC API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::store::{ContentId, ContentStore, StoreError};

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Content store backed by an IPFS node
#[derive(Debug, Clone)]
pub struct IpfsContentStore {
    client: reqwest::Client,
    api_url: String,
}

impl IpfsContentStore {
    pub fn new(api_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, command)
    }
}

#[async_trait]
impl ContentStore for IpfsContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentId, StoreError> {
        let size = bytes.len();
        let form = Form::new().part("file", Part::bytes(bytes).file_name("blob"));
        let response = self
            .client
            .post(self.endpoint("add"))
            .query(&[("pin", "true"), ("raw-leaves", "true")])
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "add returned {}",
                response.status()
            )));
        }

        let added: AddResponse = response.json().await?;
        log::info!("Added {} bytes to IPFS with CID {}", size, added.hash);
        Ok(added.hash)
    }

    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>, StoreError> {
        let response = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", id.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StoreError::Backend(format!(
                "cat {} returned {}",
                id,
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        log::debug!("Retrieved {} bytes from IPFS for {}", bytes.len(), id);
        Ok(Some(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_building() {
        let store = IpfsContentStore::new("http://127.0.0.1:5001/");
        assert_eq!(store.endpoint("add"), "http://127.0.0.1:5001/api/v0/add");
        assert_eq!(store.endpoint("cat"), "http://127.0.0.1:5001/api/v0/cat");
    }

    #[test]
    fn test_add_response_parsing() {
        let added: AddResponse =
            serde_json::from_str(r#"{"Name":"blob","Hash":"bafkreib","Size":"12"}"#).unwrap();
        assert_eq!(added.hash, "bafkreib");
    }
}
