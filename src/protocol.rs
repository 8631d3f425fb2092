//! Chat protocol messages and the envelope that carries them between agents.

use crate::{Error, Result};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Envelope format version accepted by `/submit`.
pub const ENVELOPE_VERSION: u32 = 1;

/// One typed unit within a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "resource")]
    Resource {
        resource_id: Uuid,
        resource: Resource,
    },
    #[serde(rename = "metadata")]
    Metadata { metadata: HashMap<String, String> },
    #[serde(rename = "start-session")]
    StartSession,
    #[serde(rename = "end-session")]
    EndSession,
    #[serde(other)]
    Unknown,
}

/// Location and description of a stored asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub timestamp: DateTime<Utc>,
    pub msg_id: Uuid,
    pub content: Vec<AgentContent>,
}

impl ChatMessage {
    pub fn new(content: Vec<AgentContent>) -> Self {
        Self {
            timestamp: Utc::now(),
            msg_id: Uuid::new_v4(),
            content,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![AgentContent::Text { text: text.into() }])
    }

    pub fn metadata(metadata: HashMap<String, String>) -> Self {
        Self::new(vec![AgentContent::Metadata { metadata }])
    }

    /// Reference to an image asset produced by this agent.
    pub fn generated_image(asset_id: Uuid, uri: String, mime_type: &str) -> Self {
        let metadata = HashMap::from([
            ("mime_type".to_string(), mime_type.to_string()),
            ("role".to_string(), "generated-image".to_string()),
        ]);
        Self::new(vec![AgentContent::Resource {
            resource_id: asset_id,
            resource: Resource { uri, metadata },
        }])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAcknowledgement {
    pub timestamp: DateTime<Utc>,
    pub acknowledged_msg_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ChatAcknowledgement {
    pub fn for_message(msg_id: Uuid) -> Self {
        Self {
            timestamp: Utc::now(),
            acknowledged_msg_id: msg_id,
            metadata: None,
        }
    }
}

/// Every message kind spoken by the chat protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolMessage {
    ChatMessage(ChatMessage),
    ChatAcknowledgement(ChatAcknowledgement),
}

impl From<ChatMessage> for ProtocolMessage {
    fn from(message: ChatMessage) -> Self {
        ProtocolMessage::ChatMessage(message)
    }
}

impl From<ChatAcknowledgement> for ProtocolMessage {
    fn from(ack: ChatAcknowledgement) -> Self {
        ProtocolMessage::ChatAcknowledgement(ack)
    }
}

/// Addressed wrapper with a base64 JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub sender: String,
    pub target: String,
    pub session: Uuid,
    pub payload: String,
}

impl Envelope {
    pub fn seal(
        sender: &str,
        target: &str,
        session: Uuid,
        message: &ProtocolMessage,
    ) -> Result<Self> {
        let json = serde_json::to_vec(message)?;
        Ok(Self {
            version: ENVELOPE_VERSION,
            sender: sender.to_string(),
            target: target.to_string(),
            session,
            payload: base64::engine::general_purpose::STANDARD.encode(json),
        })
    }

    pub fn open(&self) -> Result<ProtocolMessage> {
        if self.version != ENVELOPE_VERSION {
            return Err(Error::Protocol(format!(
                "Unsupported envelope version {}",
                self.version
            )));
        }
        let json = base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .map_err(|e| Error::Protocol(format!("Invalid envelope payload encoding: {}", e)))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_content_type_tags() {
        let json = serde_json::to_value(AgentContent::StartSession).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "start-session" }));

        let json = serde_json::to_value(AgentContent::Text {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "type": "text", "text": "hi" }));
    }

    #[test]
    fn test_unknown_content_type_decodes() {
        let content: AgentContent =
            serde_json::from_value(serde_json::json!({ "type": "start-stream" })).unwrap();
        assert_eq!(content, AgentContent::Unknown);
    }

    #[test]
    fn test_resource_content_decodes_without_metadata() {
        let id = Uuid::new_v4();
        let content: AgentContent = serde_json::from_value(serde_json::json!({
            "type": "resource",
            "resource_id": id,
            "resource": { "uri": "agent-storage://x/y" }
        }))
        .unwrap();
        match content {
            AgentContent::Resource {
                resource_id,
                resource,
            } => {
                assert_eq!(resource_id, id);
                assert!(resource.metadata.is_empty());
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_generated_image_metadata() {
        let id = Uuid::new_v4();
        let message = ChatMessage::generated_image(id, "agent-storage://s/a".into(), "image/png");
        let AgentContent::Resource { resource, .. } = &message.content[0] else {
            panic!("expected resource content");
        };
        assert_eq!(resource.metadata["mime_type"], "image/png");
        assert_eq!(resource.metadata["role"], "generated-image");
    }

    #[test]
    fn test_envelope_seal_and_open() {
        let message: ProtocolMessage = ChatMessage::text("hello").into();
        let envelope = Envelope::seal("agent-a", "agent-b", Uuid::new_v4(), &message).unwrap();
        assert_eq!(envelope.open().unwrap(), message);
    }

    #[test]
    fn test_envelope_rejects_bad_payload() {
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            sender: "a".into(),
            target: "b".into(),
            session: Uuid::new_v4(),
            payload: "***".into(),
        };
        assert!(matches!(envelope.open(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_envelope_rejects_unknown_version() {
        let message: ProtocolMessage = ChatAcknowledgement::for_message(Uuid::new_v4()).into();
        let mut envelope = Envelope::seal("a", "b", Uuid::new_v4(), &message).unwrap();
        envelope.version = 99;
        assert!(matches!(envelope.open(), Err(Error::Protocol(_))));
    }
}
