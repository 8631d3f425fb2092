use super::{StorageService, StoredAsset};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone)]
pub struct MockStorageClient {
    assets: Arc<Mutex<HashMap<String, StoredAsset>>>,
    permissions: Arc<Mutex<Vec<(String, String)>>>,
    failing_downloads: Arc<Mutex<HashSet<String>>>,
    fail_uploads: Arc<Mutex<bool>>,
    download_count: Arc<Mutex<usize>>,
    base_url: String,
}

impl MockStorageClient {
    pub fn new() -> Self {
        Self {
            assets: Arc::new(Mutex::new(HashMap::new())),
            permissions: Arc::new(Mutex::new(Vec::new())),
            failing_downloads: Arc::new(Mutex::new(HashSet::new())),
            fail_uploads: Arc::new(Mutex::new(false)),
            download_count: Arc::new(Mutex::new(0)),
            base_url: "https://mock-storage.example.com/v1/storage".to_string(),
        }
    }

    pub fn with_asset(self, asset_id: &str, mime_type: &str, contents: Vec<u8>) -> Self {
        self.assets.lock().unwrap().insert(
            asset_id.to_string(),
            StoredAsset {
                mime_type: mime_type.to_string(),
                contents,
            },
        );
        self
    }

    /// Make downloads of `asset_id` fail.
    pub fn with_failing_download(self, asset_id: &str) -> Self {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(asset_id.to_string());
        self
    }

    pub fn with_upload_failure(self, should_fail: bool) -> Self {
        *self.fail_uploads.lock().unwrap() = should_fail;
        self
    }

    pub fn get_download_count(&self) -> usize {
        *self.download_count.lock().unwrap()
    }

    pub fn get_asset(&self, asset_id: &str) -> Option<StoredAsset> {
        self.assets.lock().unwrap().get(asset_id).cloned()
    }

    pub fn get_asset_count(&self) -> usize {
        self.assets.lock().unwrap().len()
    }

    /// `(asset_id, agent_address)` grants, in call order.
    pub fn get_permissions(&self) -> Vec<(String, String)> {
        self.permissions.lock().unwrap().clone()
    }
}

impl Default for MockStorageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageService for MockStorageClient {
    async fn download(&self, asset_id: &str) -> Result<StoredAsset> {
        *self.download_count.lock().unwrap() += 1;

        if self.failing_downloads.lock().unwrap().contains(asset_id) {
            return Err(Error::Storage(format!("Mock download failure for {}", asset_id)));
        }

        self.assets
            .lock()
            .unwrap()
            .get(asset_id)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("Asset not found: {}", asset_id)))
    }

    async fn create_asset(&self, _name: &str, contents: &[u8], mime_type: &str) -> Result<String> {
        if *self.fail_uploads.lock().unwrap() {
            return Err(Error::Storage("Mock upload failure".to_string()));
        }

        let asset_id = Uuid::new_v4().to_string();
        self.assets.lock().unwrap().insert(
            asset_id.clone(),
            StoredAsset {
                mime_type: mime_type.to_string(),
                contents: contents.to_vec(),
            },
        );
        Ok(asset_id)
    }

    async fn set_permissions(&self, asset_id: &str, agent_address: &str) -> Result<()> {
        if !self.assets.lock().unwrap().contains_key(asset_id) {
            return Err(Error::Storage(format!("Asset not found: {}", asset_id)));
        }
        self.permissions
            .lock()
            .unwrap()
            .push((asset_id.to_string(), agent_address.to_string()));
        Ok(())
    }

    fn asset_uri(&self, asset_id: &str) -> String {
        format!("agent-storage://{}/{}", self.base_url, asset_id)
    }
}
