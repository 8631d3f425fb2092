//! Inbound envelope endpoint.
//!
//! `POST /submit` accepts an [`Envelope`], answers as soon as the payload has
//! been decoded and handles the message on its own task.

use crate::handler::MessageHandler;
use crate::protocol::Envelope;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tracing::{error, warn};

pub fn router(handler: Arc<MessageHandler>) -> Router {
    Router::new()
        .route("/submit", post(submit))
        .route("/health", get(health))
        .with_state(handler)
}

async fn submit(State(handler): State<Arc<MessageHandler>>, body: Bytes) -> StatusCode {
    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Rejecting malformed envelope: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let message = match envelope.open() {
        Ok(message) => message,
        Err(e) => {
            warn!("Rejecting envelope from {}: {}", envelope.sender, e);
            return StatusCode::BAD_REQUEST;
        }
    };

    tokio::spawn(async move {
        let Envelope {
            sender, session, ..
        } = envelope;
        if let Err(e) = handler.dispatch(&sender, session, message).await {
            error!("Failed to handle message from {}: {}", sender, e);
        }
    });

    StatusCode::ACCEPTED
}

async fn health() -> &'static str {
    "ok"
}
