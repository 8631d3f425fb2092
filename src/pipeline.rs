//! Turns gathered message content into a segmentation result.

use crate::mime::effective_mime;
use crate::models::{ContentItem, SegmentationResult};
use crate::params::{self, ParamOverrides};
use crate::segment::SegmentationService;
use tracing::{error, info};

pub const MODEL_NAME: &str = "EfficientViT SAM";

/// Join every text item into one prompt, in arrival order.
pub fn prompt_from(items: &[ContentItem]) -> String {
    items
        .iter()
        .filter_map(ContentItem::as_text)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Segment the first image among `items`.
///
/// Never fails: every problem is reported through the result's analysis text.
pub async fn run_segmentation(
    items: &[ContentItem],
    overrides: &ParamOverrides,
    service: &dyn SegmentationService,
) -> SegmentationResult {
    let Some((declared_mime, bytes)) = items.iter().find_map(|item| match item {
        ContentItem::Resource { mime_type, bytes } => Some((mime_type.as_str(), bytes)),
        ContentItem::Text(_) => None,
    }) else {
        return SegmentationResult::failure("No valid image content found");
    };

    let mime_type = effective_mime(declared_mime, bytes);
    if !mime_type.starts_with("image/") {
        return SegmentationResult::failure(format!("Unsupported mime type: {}", mime_type));
    }

    let prompt = prompt_from(items);
    let params = params::resolve(&prompt, overrides);
    info!(
        "Segmenting {} image ({} bytes) with {}",
        mime_type,
        bytes.len(),
        params
    );

    match service.segment(bytes, &params).await {
        Ok(image) if image.is_empty() => {
            SegmentationResult::failure("Segmentation returned an empty image")
        }
        Ok(image) => SegmentationResult::success(
            image,
            format!("Image processed with {} model ({})", MODEL_NAME, params),
        ),
        Err(e) => {
            error!("Segmentation failed: {}", e);
            SegmentationResult::failure(format!("Error processing image: {}", e))
        }
    }
}
