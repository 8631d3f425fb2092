//! Chat message handling.
//!
//! Each inbound chat message is acknowledged, classified part by part,
//! resolved into a segmentation request and answered with the result.

use crate::mime::detect_image_mime;
use crate::models::{ContentItem, SegmentationResult};
use crate::params::ParamOverrides;
use crate::pipeline;
use crate::protocol::{AgentContent, ChatAcknowledgement, ChatMessage, ProtocolMessage};
use crate::segment::SegmentationService;
use crate::storage::StorageService;
use crate::transport::MessageSender;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const SEND_IMAGE_PROMPT: &str = "Please send an image to analyze.";
pub const DOWNLOAD_FAILED: &str = "Failed to download resource.";
pub const PROCESSING_FAILED: &str = "Error processing image. Please try again.";
pub const SEGMENTATION_FAILED: &str = "Failed to process image.";

/// Last sender seen per session. Concurrent writers race; the last one wins.
#[derive(Debug, Default)]
pub struct SessionNotes {
    senders: Mutex<HashMap<Uuid, String>>,
}

impl SessionNotes {
    pub fn record(&self, session: Uuid, sender: &str) {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session, sender.to_string());
    }

    pub fn sender_for(&self, session: Uuid) -> Option<String> {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&session)
            .cloned()
    }
}

/// Injectable service bundle used to construct [`MessageHandler`].
pub struct HandlerServices {
    pub storage: Box<dyn StorageService>,
    pub segmenter: Box<dyn SegmentationService>,
    pub sender: Box<dyn MessageSender>,
}

/// Where a published result can be found.
struct PublishedImage {
    asset_id: Uuid,
    uri: String,
    mime_type: &'static str,
}

pub struct MessageHandler {
    storage: Box<dyn StorageService>,
    segmenter: Box<dyn SegmentationService>,
    sender: Box<dyn MessageSender>,
    notes: SessionNotes,
}

impl MessageHandler {
    pub fn new(services: HandlerServices) -> Self {
        Self {
            storage: services.storage,
            segmenter: services.segmenter,
            sender: services.sender,
            notes: SessionNotes::default(),
        }
    }

    pub fn notes(&self) -> &SessionNotes {
        &self.notes
    }

    /// Route any protocol message to its handler.
    pub async fn dispatch(
        &self,
        sender: &str,
        session: Uuid,
        message: ProtocolMessage,
    ) -> Result<()> {
        match message {
            ProtocolMessage::ChatMessage(chat) => self.handle_message(sender, session, chat).await,
            ProtocolMessage::ChatAcknowledgement(ack) => {
                self.handle_acknowledgement(sender, &ack);
                Ok(())
            }
        }
    }

    pub fn handle_acknowledgement(&self, sender: &str, ack: &ChatAcknowledgement) {
        info!(
            "Got an acknowledgement from {} for {}",
            sender, ack.acknowledged_msg_id
        );
    }

    /// Handle one chat message end to end.
    ///
    /// The acknowledgement goes out before anything else. A failed resource
    /// download is reported to the sender and ends processing of the message.
    pub async fn handle_message(
        &self,
        sender: &str,
        session: Uuid,
        msg: ChatMessage,
    ) -> Result<()> {
        self.notes.record(session, sender);
        info!("Got a message from {} ({})", sender, msg.msg_id);

        self.send(sender, session, ChatAcknowledgement::for_message(msg.msg_id).into())
            .await?;

        let mut items = Vec::new();
        let mut overrides = ParamOverrides::default();

        for content in msg.content {
            match content {
                AgentContent::StartSession => {
                    info!("Got a start session message from {}", sender);
                    let metadata =
                        HashMap::from([("attachments".to_string(), "true".to_string())]);
                    self.send(sender, session, ChatMessage::metadata(metadata).into())
                        .await?;
                }
                AgentContent::Text { text } => {
                    debug!("Got text: {}", text);
                    items.push(ContentItem::Text(text));
                }
                AgentContent::Resource { resource_id, .. } => {
                    match self.download(resource_id).await {
                        Ok(item) => items.push(item),
                        Err(e) => {
                            error!("Failed to download resource {}: {}", resource_id, e);
                            self.send(sender, session, ChatMessage::text(DOWNLOAD_FAILED).into())
                                .await?;
                            return Ok(());
                        }
                    }
                }
                AgentContent::Metadata { metadata } => {
                    overrides.merge(&ParamOverrides::from_metadata(&metadata));
                }
                AgentContent::EndSession => debug!("Session {} ended by {}", session, sender),
                AgentContent::Unknown => warn!("Ignoring unsupported content from {}", sender),
            }
        }

        if items.iter().any(ContentItem::is_resource) {
            self.reply_with_segmentation(sender, session, &items, &overrides)
                .await
        } else if !items.is_empty() {
            self.send(sender, session, ChatMessage::text(SEND_IMAGE_PROMPT).into())
                .await
        } else {
            warn!("No valid content found in message {}", msg.msg_id);
            Ok(())
        }
    }

    async fn download(&self, resource_id: Uuid) -> Result<ContentItem> {
        info!("Downloading resource {}", resource_id);
        let asset = self.storage.download(&resource_id.to_string()).await?;
        if asset.contents.is_empty() {
            return Err(Error::Storage(format!(
                "Resource {} has no contents",
                resource_id
            )));
        }
        Ok(ContentItem::Resource {
            mime_type: asset.mime_type,
            bytes: asset.contents,
        })
    }

    async fn reply_with_segmentation(
        &self,
        sender: &str,
        session: Uuid,
        items: &[ContentItem],
        overrides: &ParamOverrides,
    ) -> Result<()> {
        let SegmentationResult { image, analysis } =
            pipeline::run_segmentation(items, overrides, self.segmenter.as_ref()).await;

        let Some(image) = image else {
            let text = if analysis.is_empty() {
                SEGMENTATION_FAILED.to_string()
            } else {
                analysis
            };
            return self.send(sender, session, ChatMessage::text(text).into()).await;
        };

        let published = match self.publish(sender, &image).await {
            Ok(published) => published,
            Err(e) => {
                error!("Failed to publish segmented image: {}", e);
                return self
                    .send(sender, session, ChatMessage::text(PROCESSING_FAILED).into())
                    .await;
            }
        };

        if !analysis.is_empty() {
            self.send(sender, session, ChatMessage::text(analysis).into())
                .await?;
        }
        self.send(
            sender,
            session,
            ChatMessage::generated_image(published.asset_id, published.uri, published.mime_type)
                .into(),
        )
        .await
    }

    /// Store the result and share it with `sender`.
    async fn publish(&self, sender: &str, image: &[u8]) -> Result<PublishedImage> {
        let mime_type = detect_image_mime(image);
        let name = format!("segmented_{}", Uuid::new_v4());

        let asset_id = self.storage.create_asset(&name, image, mime_type).await?;
        info!("Created asset with ID: {}", asset_id);

        let parsed_id = Uuid::parse_str(&asset_id)
            .map_err(|e| Error::Storage(format!("Invalid asset id '{}': {}", asset_id, e)))?;

        self.storage.set_permissions(&asset_id, sender).await?;
        info!("Set permissions for {} on asset {}", sender, asset_id);

        Ok(PublishedImage {
            asset_id: parsed_id,
            uri: self.storage.asset_uri(&asset_id),
            mime_type,
        })
    }

    async fn send(&self, target: &str, session: Uuid, message: ProtocolMessage) -> Result<()> {
        self.sender.send(target, session, message).await
    }
}
