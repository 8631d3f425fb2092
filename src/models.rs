//! Data models and configuration
//!
//! Defines the transient content items gathered from a chat message, the
//! outcome of a segmentation request, and the environment-driven agent
//! configuration.

use crate::{Error, Result};

/// One usable part of an inbound message after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    Text(String),
    Resource { mime_type: String, bytes: Vec<u8> },
}

impl ContentItem {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentItem::Text(text) => Some(text),
            ContentItem::Resource { .. } => None,
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, ContentItem::Resource { .. })
    }
}

/// Outcome of one segmentation request.
///
/// A missing image means the request failed; `analysis` then explains why.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationResult {
    pub image: Option<Vec<u8>>,
    pub analysis: String,
}

impl SegmentationResult {
    pub fn success(image: Vec<u8>, analysis: impl Into<String>) -> Self {
        Self {
            image: Some(image),
            analysis: analysis.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            image: None,
            analysis: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.image.is_some()
    }
}

pub const DEFAULT_AGENTVERSE_URL: &str = "https://agentverse.ai";
pub const DEFAULT_SEGMENTATION_URL: &str = "https://evitsam.hanlab.ai";
pub const DEFAULT_SEGMENTATION_API_PREFIX: &str = "/gradio_api";
pub const DEFAULT_SEGMENTATION_API_NAME: &str = "/lambda_3";
pub const DEFAULT_AGENT_ADDRESS: &str = "evitsam-segmentation-agent";

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub agentverse_url: String,
    pub agentverse_api_key: String,
    pub segmentation_url: String,
    pub segmentation_api_prefix: String,
    pub segmentation_api_name: String,
    pub agent_address: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let agentverse_api_key = lookup("AGENTVERSE_API_KEY")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| Error::Config("AGENTVERSE_API_KEY not set".to_string()))?;

        Ok(Self {
            agentverse_url: var("AGENTVERSE_URL", DEFAULT_AGENTVERSE_URL)
                .trim_end_matches('/')
                .to_string(),
            agentverse_api_key,
            segmentation_url: var("SEGMENTATION_URL", DEFAULT_SEGMENTATION_URL)
                .trim_end_matches('/')
                .to_string(),
            segmentation_api_prefix: var(
                "SEGMENTATION_API_PREFIX",
                DEFAULT_SEGMENTATION_API_PREFIX,
            ),
            segmentation_api_name: var("SEGMENTATION_API_NAME", DEFAULT_SEGMENTATION_API_NAME),
            agent_address: var("AGENT_ADDRESS", DEFAULT_AGENT_ADDRESS),
        })
    }

    pub fn storage_url(&self) -> String {
        format!("{}/v1/storage", self.agentverse_url)
    }

    pub fn submit_url(&self) -> String {
        format!("{}/v1/submit", self.agentverse_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_requires_api_key() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("AGENTVERSE_API_KEY"));

        let err = Config::from_lookup(lookup_from(&[("AGENTVERSE_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup_from(&[("AGENTVERSE_API_KEY", "key")])).unwrap();
        assert_eq!(config.agentverse_api_key, "key");
        assert_eq!(config.storage_url(), "https://agentverse.ai/v1/storage");
        assert_eq!(config.submit_url(), "https://agentverse.ai/v1/submit");
        assert_eq!(config.segmentation_url, DEFAULT_SEGMENTATION_URL);
        assert_eq!(config.segmentation_api_name, "/lambda_3");
        assert_eq!(config.agent_address, DEFAULT_AGENT_ADDRESS);
    }

    #[test]
    fn test_config_overrides_trim_trailing_slash() {
        let config = Config::from_lookup(lookup_from(&[
            ("AGENTVERSE_API_KEY", "key"),
            ("AGENTVERSE_URL", "http://localhost:9000/"),
            ("SEGMENTATION_URL", "http://localhost:7860/"),
        ]))
        .unwrap();
        assert_eq!(config.storage_url(), "http://localhost:9000/v1/storage");
        assert_eq!(config.segmentation_url, "http://localhost:7860");
    }

    #[test]
    fn test_segmentation_result_constructors() {
        let ok = SegmentationResult::success(vec![1], "done");
        assert!(ok.is_success());

        let failed = SegmentationResult::failure("boom");
        assert!(!failed.is_success());
        assert_eq!(failed.analysis, "boom");
    }

    #[test]
    fn test_content_item_accessors() {
        let text = ContentItem::Text("hi".to_string());
        assert_eq!(text.as_text(), Some("hi"));
        assert!(!text.is_resource());

        let resource = ContentItem::Resource {
            mime_type: "image/png".to_string(),
            bytes: vec![],
        };
        assert!(resource.is_resource());
        assert_eq!(resource.as_text(), None);
    }
}
