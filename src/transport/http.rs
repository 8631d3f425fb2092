use super::MessageSender;
use crate::protocol::{Envelope, ProtocolMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio_retry::{strategy::FixedInterval, Retry};
use uuid::Uuid;

const DELIVERY_RETRY_INTERVAL_MS: u64 = 500;
const DELIVERY_RETRIES: usize = 2;

/// Acknowledgements are posted at most once.
fn retries_for(message: &ProtocolMessage) -> usize {
    match message {
        ProtocolMessage::ChatAcknowledgement(_) => 0,
        ProtocolMessage::ChatMessage(_) => DELIVERY_RETRIES,
    }
}

/// Posts sealed envelopes to a submit endpoint (mailbox relay or peer).
pub struct HttpSender {
    client: Client,
    submit_url: String,
    agent_address: String,
}

impl HttpSender {
    pub fn new(submit_url: String, agent_address: String) -> Self {
        Self::new_with_client(submit_url, agent_address, Client::new())
    }

    pub fn new_with_client(submit_url: String, agent_address: String, client: Client) -> Self {
        Self {
            client,
            submit_url,
            agent_address,
        }
    }

    async fn post(&self, envelope: &Envelope) -> Result<()> {
        let response = self
            .client
            .post(&self.submit_url)
            .timeout(Duration::from_secs(10))
            .json(envelope)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(Error::Transport(format!(
                "Delivery to {} rejected (status {}): {}",
                envelope.target, status, error_text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSender for HttpSender {
    async fn send(&self, target: &str, session: Uuid, message: ProtocolMessage) -> Result<()> {
        let envelope = Envelope::seal(&self.agent_address, target, session, &message)?;
        let retries = retries_for(&message);
        let retry_strategy =
            FixedInterval::from_millis(DELIVERY_RETRY_INTERVAL_MS).take(retries);

        Retry::spawn(retry_strategy, || async {
            self.post(&envelope).await.map_err(|e| {
                tracing::warn!("Delivery to {} failed: {}", target, e);
                e
            })
        })
        .await
        .map_err(|e| {
            tracing::error!("Giving up delivering message to {}: {}", target, e);
            e
        })
    }
}
