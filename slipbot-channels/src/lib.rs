//! Slipbot Channels - WhatsApp self-service for salary slips.
//!
//! This crate provides:
//! - The WhatsApp Business Cloud gateway
//! - The self-registration conversation engine
//! - Per-contact message dispatch and conversation sweeping
//! - The HTTP admin surface and webhook endpoints
//!
//! ## Architecture
//!
//! ```text
//! User WhatsApp → webhook → mpsc → dispatcher → per-contact worker → ConversationEngine
//!                                                                       │        │
//! User ←───────────── WhatsAppChannel (MessageGateway) ←────────────────┘        ↓
//!                                                                        DirectoryService
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod conversation;
pub mod dispatcher;
pub mod message;
pub mod routes;
pub mod traits;
pub mod whatsapp;

// Re-export commonly used types
pub use conversation::{Conversation, ConversationEngine, Outcome, Stage};
pub use dispatcher::{spawn_sweeper, ConversationDispatcher};
pub use message::{ChannelMessage, MessageContent};
pub use routes::{build_router, create_state, ApiError, AppState};
pub use traits::{
    ChannelError, ChannelResult, ConnectionState, DisconnectedGateway, GatewayStatus,
    MessageGateway,
};
pub use whatsapp::WhatsAppChannel;

use anyhow::Context;
use slipbot_common::{Config, PhoneMatcher};
use slipbot_directory::DirectoryService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body (webhooks and admin JSON).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// How long shutdown waits for queued conversations to finish.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect the configured gateway, or a disconnected stub when WhatsApp is off.
async fn connect_gateway(
    config: &Config,
) -> (Option<Arc<WhatsAppChannel>>, Arc<dyn MessageGateway>) {
    if !config.whatsapp.enabled {
        tracing::warn!("WhatsApp disabled; chat delivery unavailable");
        return (None, Arc::new(DisconnectedGateway));
    }

    let whatsapp = Arc::new(WhatsAppChannel::new(&config.whatsapp));
    if let Err(e) = whatsapp.init().await {
        // Stays disconnected; POST /whatsapp/reconnect retries
        tracing::error!(error = %e, "WhatsApp initialization failed");
    }

    let gateway: Arc<dyn MessageGateway> = whatsapp.clone();
    (Some(whatsapp), gateway)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            tracing::error!("failed to install signal handlers");
            return std::future::pending().await;
        };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            return std::future::pending().await;
        }
        tracing::info!("shutting down");
    }
}

/// Wait for the dispatcher to drain, then flush the directory.
///
/// The dispatcher's inbound queue must already be closed. Workers still busy
/// after `grace` are aborted before the flush.
pub async fn drain_and_flush(
    mut dispatcher: JoinHandle<()>,
    directory: &DirectoryService,
    grace: Duration,
) -> anyhow::Result<()> {
    match tokio::time::timeout(grace, &mut dispatcher).await {
        Ok(Ok(())) => tracing::info!("conversation workers drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "conversation dispatcher failed"),
        Err(_) => {
            tracing::warn!(grace_secs = grace.as_secs(), "conversation workers still busy, aborting");
            dispatcher.abort();
        }
    }

    directory
        .shutdown()
        .await
        .context("failed to flush employee directory")
}

/// Start slipbot: directory, gateway, conversation workers and HTTP server.
///
/// Returns after a shutdown signal, once pending directory changes are flushed.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .listen_address()
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_address()))?;

    let directory = Arc::new(DirectoryService::from_config(&config.directory)?);
    directory
        .initialize()
        .await
        .context("failed to initialize employee directory")?;

    let (whatsapp, gateway) = connect_gateway(config).await;

    let engine = Arc::new(ConversationEngine::new(
        Arc::clone(&directory),
        Arc::clone(&gateway),
        PhoneMatcher::new(&config.phone),
        &config.conversation,
    ));

    let (state, rx) = create_state(Arc::clone(&directory), gateway, whatsapp.clone(), config);

    let dispatcher_handle = ConversationDispatcher::new(Arc::clone(&engine)).spawn(rx);
    let sweeper_handle = spawn_sweeper(engine, config.conversation.sweep_interval());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = build_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors);

    tracing::info!("Starting slipbot on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last inbound sender, so the dispatcher now drains
    sweeper_handle.abort();
    let flushed = drain_and_flush(dispatcher_handle, &directory, DRAIN_TIMEOUT).await;

    if let Some(whatsapp) = whatsapp {
        whatsapp.shutdown().await;
    }
    flushed?;

    tracing::info!("slipbot stopped");
    Ok(())
}
