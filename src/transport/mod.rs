//! Outbound delivery of protocol messages to other agents.

pub mod http;
pub mod mock;

pub use http::HttpSender;
pub use mock::{MockSender, SentMessage};

use crate::protocol::ProtocolMessage;
use crate::Result;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, target: &str, session: Uuid, message: ProtocolMessage) -> Result<()>;
}
