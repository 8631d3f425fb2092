use anyhow::{Context, Result};
use clap::Parser;
use evitsam_agent::handler::{HandlerServices, MessageHandler};
use evitsam_agent::models::Config;
use evitsam_agent::segment::GradioSegmentationClient;
use evitsam_agent::server;
use evitsam_agent::storage::StorageClient;
use evitsam_agent::transport::HttpSender;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "evitsam-agent")]
#[command(about = "Chat agent that segments images with EfficientViT-SAM")]
struct CliArgs {
    /// Address the envelope endpoint listens on.
    #[arg(long, env = "AGENT_LISTEN", default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Directory for temporary segmentation files.
    #[arg(long, env = "AGENT_TEMP_DIR")]
    temp_dir: Option<PathBuf>,
}

fn build_handler(config: &Config, args: &CliArgs) -> MessageHandler {
    // Reuse one HTTP connection pool across the remote clients.
    let http_client = reqwest::Client::new();

    let mut segmenter = GradioSegmentationClient::new_with_client(
        config.segmentation_url.clone(),
        config.segmentation_api_prefix.clone(),
        config.segmentation_api_name.clone(),
        http_client.clone(),
    );
    if let Some(dir) = &args.temp_dir {
        segmenter = segmenter.with_temp_dir(dir.clone());
    }

    let storage = StorageClient::new(config.storage_url(), config.agentverse_api_key.clone());
    let sender = HttpSender::new_with_client(
        config.submit_url(),
        config.agent_address.clone(),
        http_client,
    );

    MessageHandler::new(HandlerServices {
        storage: Box::new(storage),
        segmenter: Box::new(segmenter),
        sender: Box::new(sender),
    })
}

async fn run(args: CliArgs) -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        "Agent {} using segmentation app at {}",
        config.agent_address, config.segmentation_url
    );

    let handler = Arc::new(build_handler(&config, &args));
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("Listening on {}", args.listen);

    axum::serve(listener, server::router(handler))
        .with_graceful_shutdown(wait_for_shutdown(tokio::signal::ctrl_c()))
        .await?;
    Ok(())
}

/// Resolves once `signal` fires. If the signal cannot be listened for, never resolves.
async fn wait_for_shutdown(signal: impl Future<Output = std::io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evitsam_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting evitsam-agent");

    let args = CliArgs::parse();

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Agent stopped: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{wait_for_shutdown, CliArgs};
    use clap::Parser;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_resolves_on_signal() {
        wait_for_shutdown(async { Ok(()) }).await;
    }

    #[tokio::test]
    async fn test_failed_signal_registration_keeps_serving() {
        let failed = async { Err(std::io::Error::other("no signal handler")) };
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(failed)).await;
        assert!(outcome.is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let args = CliArgs::try_parse_from(["evitsam-agent"]).unwrap();
        assert_eq!(args.listen.to_string(), "127.0.0.1:8000");
        assert!(args.temp_dir.is_none());
    }

    #[test]
    fn test_cli_rejects_bad_listen_address() {
        assert!(CliArgs::try_parse_from(["evitsam-agent", "--listen", "nowhere"]).is_err());
    }
}
