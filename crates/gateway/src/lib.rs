//! Webhook gateway for parley.
//!
//! Accepts Telegram updates over HTTP, hands them to a bounded queue and
//! answers immediately. A single worker drains the queue through the
//! [`MessageProcessor`], so events of one dialog are handled in order.
//!
//! Built on Axum.

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
};
use parley_agent::MessageProcessor;
use parley_channels::parse_update;
use parley_config::AppConfig;
use parley_core::inbound::InboundEvent;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Header Telegram uses to echo the secret given to `setWebhook`.
pub const SECRET_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// Shared state for the webhook routes.
pub struct GatewayState {
    pub webhook_secret: Option<String>,
    pub queue: mpsc::Sender<InboundEvent>,
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/webhook/telegram", post(telegram_webhook_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Drain `queue` through `processor` until every sender is dropped.
pub fn spawn_worker(
    processor: Arc<MessageProcessor>,
    mut queue: mpsc::Receiver<InboundEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = queue.recv().await {
            let chat_id = event.chat_id;
            let message_id = event.message_id;
            let outcome = processor.handle(event).await;
            debug!(chat_id, message_id, %outcome, "Event handled");
        }
        info!("Event queue closed, worker stopping");
    })
}

/// Start the gateway HTTP server and its worker.
pub async fn start(
    config: &AppConfig,
    processor: Arc<MessageProcessor>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let (tx, rx) = mpsc::channel(config.gateway.queue_capacity.max(1));
    let worker = spawn_worker(processor, rx);

    let state = Arc::new(GatewayState {
        webhook_secret: config.gateway.webhook_secret.clone(),
        queue: tx,
    });
    let app = build_router(state);

    info!(
        addr = %addr,
        queue_capacity = config.gateway.queue_capacity,
        secret = config.gateway.webhook_secret.is_some(),
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last sender; let the worker finish what is queued.
    worker.await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// --- Handlers ---

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

fn status(status: &'static str) -> Json<StatusResponse> {
    Json(StatusResponse { status })
}

async fn health_handler() -> Json<StatusResponse> {
    status("ok")
}

async fn telegram_webhook_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<StatusResponse>, StatusCode> {
    if let Some(expected) = state.webhook_secret.as_deref() {
        let provided = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!("Webhook request with a missing or wrong secret token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let event = match parse_update(&body) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Ignoring update");
            return Ok(status("ignored"));
        }
    };

    let (chat_id, message_id) = (event.chat_id, event.message_id);
    match state.queue.try_send(event) {
        Ok(()) => {
            debug!(chat_id, message_id, "Update queued");
            Ok(status("queued"))
        }
        Err(TrySendError::Full(_)) => {
            warn!(chat_id, message_id, "Event queue full, rejecting update");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(TrySendError::Closed(_)) => {
            warn!(chat_id, message_id, "Event worker is gone, rejecting update");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
