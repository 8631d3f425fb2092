//! Remote image segmentation
//!
//! Forwards images to the hosted EfficientViT-SAM demo app and returns the
//! rendered segmentation overlay.

pub mod client;
pub mod mock;

pub use client::GradioSegmentationClient;
pub use mock::MockSegmentationClient;

use crate::params::SegmentationParams;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SegmentationService: Send + Sync {
    /// Segment `image` and return the encoded result image.
    async fn segment(&self, image: &[u8], params: &SegmentationParams) -> Result<Vec<u8>>;
}
