use super::MessageSender;
use crate::protocol::{AgentContent, ProtocolMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A message captured by [`MockSender`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub target: String,
    pub session: Uuid,
    pub message: ProtocolMessage,
}

impl SentMessage {
    pub fn is_acknowledgement(&self) -> bool {
        matches!(self.message, ProtocolMessage::ChatAcknowledgement(_))
    }

    /// Text of a single-part text message.
    pub fn text(&self) -> Option<&str> {
        match &self.message {
            ProtocolMessage::ChatMessage(chat) => match chat.content.as_slice() {
                [AgentContent::Text { text }] => Some(text),
                _ => None,
            },
            ProtocolMessage::ChatAcknowledgement(_) => None,
        }
    }

    pub fn is_resource(&self) -> bool {
        match &self.message {
            ProtocolMessage::ChatMessage(chat) => chat
                .content
                .iter()
                .any(|content| matches!(content, AgentContent::Resource { .. })),
            ProtocolMessage::ChatAcknowledgement(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct MockSender {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockSender {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            should_fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    pub fn get_sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Everything sent except acknowledgements.
    pub fn get_replies(&self) -> Vec<SentMessage> {
        self.get_sent()
            .into_iter()
            .filter(|sent| !sent.is_acknowledgement())
            .collect()
    }

    pub fn get_ack_count(&self) -> usize {
        self.get_sent()
            .iter()
            .filter(|sent| sent.is_acknowledgement())
            .count()
    }
}

impl Default for MockSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSender for MockSender {
    async fn send(&self, target: &str, session: Uuid, message: ProtocolMessage) -> Result<()> {
        if *self.should_fail.lock().unwrap() {
            return Err(Error::Transport("Mock delivery failure".to_string()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            target: target.to_string(),
            session,
            message,
        });
        Ok(())
    }
}
