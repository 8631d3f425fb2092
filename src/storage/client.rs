use super::{StorageService, StoredAsset};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hours an uploaded result stays available.
const ASSET_LIFETIME_HOURS: u32 = 24;

#[derive(Debug, Serialize)]
struct CreateAssetRequest<'a> {
    name: &'a str,
    contents: String,
    mime_type: &'a str,
    lifetime_hours: u32,
}

#[derive(Debug, Deserialize)]
struct CreateAssetResponse {
    asset_id: String,
}

#[derive(Debug, Deserialize)]
struct AssetContentsResponse {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    contents: Option<String>,
}

#[derive(Debug, Serialize)]
struct PermissionRequest<'a> {
    agent_address: &'a str,
    read: bool,
    write: bool,
}

/// REST client for the agent storage service.
pub struct StorageClient {
    client: Client,
    storage_url: String,
    api_token: String,
}

impl StorageClient {
    pub fn new(storage_url: String, api_token: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            });
        Self::new_with_client(storage_url, api_token, client)
    }

    pub fn new_with_client(storage_url: String, api_token: String, client: Client) -> Self {
        Self {
            client,
            storage_url: storage_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    pub fn storage_url(&self) -> &str {
        &self.storage_url
    }

    fn asset_url(&self, asset_id: &str, suffix: &str) -> String {
        format!("{}/assets/{}/{}", self.storage_url, asset_id, suffix)
    }
}

async fn ensure_success(response: Response, action: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let error_text = response.text().await?;
    tracing::error!("Storage {} failed (status {}): {}", action, status, error_text);
    Err(Error::Storage(format!(
        "{} failed (status {}): {}",
        action, status, error_text
    )))
}

#[async_trait]
impl StorageService for StorageClient {
    async fn download(&self, asset_id: &str) -> Result<StoredAsset> {
        tracing::debug!("Downloading asset {}", asset_id);

        let response = self
            .client
            .get(self.asset_url(asset_id, "contents/"))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to reach storage for asset {}: {}", asset_id, e);
                e
            })?;
        let response = ensure_success(response, "download").await?;
        let body: AssetContentsResponse = response.json().await?;

        let encoded = body
            .contents
            .filter(|contents| !contents.is_empty())
            .ok_or_else(|| Error::Storage(format!("Asset {} has no contents", asset_id)))?;
        let contents = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Storage(format!("Invalid asset encoding: {}", e)))?;

        Ok(StoredAsset {
            mime_type: body.mime_type.unwrap_or_default(),
            contents,
        })
    }

    async fn create_asset(&self, name: &str, contents: &[u8], mime_type: &str) -> Result<String> {
        let request = CreateAssetRequest {
            name,
            contents: base64::engine::general_purpose::STANDARD.encode(contents),
            mime_type,
            lifetime_hours: ASSET_LIFETIME_HOURS,
        };

        let response = self
            .client
            .post(format!("{}/assets/", self.storage_url))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response, "asset creation").await?;
        let created: CreateAssetResponse = response.json().await?;

        tracing::debug!("Created asset {} ({} bytes)", created.asset_id, contents.len());
        Ok(created.asset_id)
    }

    async fn set_permissions(&self, asset_id: &str, agent_address: &str) -> Result<()> {
        let request = PermissionRequest {
            agent_address,
            read: true,
            write: false,
        };

        let response = self
            .client
            .put(self.asset_url(asset_id, "permissions/"))
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;
        ensure_success(response, "permission update").await?;
        Ok(())
    }

    fn asset_uri(&self, asset_id: &str) -> String {
        format!("agent-storage://{}/{}", self.storage_url, asset_id)
    }
}
