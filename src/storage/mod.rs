//! Attachment storage integration
//!
//! Chat attachments are exchanged by opaque asset id through the agent
//! storage service: inbound images are downloaded from it, and segmented
//! results are uploaded to it and shared with the requesting agent.

pub mod client;
pub mod mock;

pub use client::StorageClient;
pub use mock::MockStorageClient;

use crate::Result;
use async_trait::async_trait;

/// Asset contents fetched from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAsset {
    pub mime_type: String,
    pub contents: Vec<u8>,
}

#[async_trait]
pub trait StorageService: Send + Sync {
    async fn download(&self, asset_id: &str) -> Result<StoredAsset>;
    /// Store `contents` and return the new asset id.
    async fn create_asset(&self, name: &str, contents: &[u8], mime_type: &str) -> Result<String>;
    /// Grant `agent_address` read access to the asset.
    async fn set_permissions(&self, asset_id: &str, agent_address: &str) -> Result<()>;
    /// URI under which other agents can reference the asset.
    fn asset_uri(&self, asset_id: &str) -> String;
}
