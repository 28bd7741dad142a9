use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::broadcaster::Broadcaster;
use crate::error::ArbError;
use crate::market_scanner::MarketScanner;
use crate::poller::SnapshotStore;
use crate::shared_types::EventId;

/// Shared state for the opportunity feed handlers.
#[derive(Clone)]
pub struct FeedState {
    pub store: SnapshotStore,
    pub broadcaster: Arc<Broadcaster>,
    pub scanner: Arc<MarketScanner>,
    on_demand: Arc<Semaphore>,
}

impl FeedState {
    /// At most `on_demand_limit` cache-miss scans hit the upstream at once.
    pub fn new(
        store: SnapshotStore,
        broadcaster: Arc<Broadcaster>,
        scanner: Arc<MarketScanner>,
        on_demand_limit: usize,
    ) -> Self {
        Self {
            store,
            broadcaster,
            scanner,
            on_demand: Arc::new(Semaphore::new(on_demand_limit.max(1))),
        }
    }
}

pub fn router(state: FeedState) -> Router {
    Router::new()
        .route("/api/arbitrage/:event_id", get(get_arbitrage))
        .route("/api/subscribe", get(subscribe))
        .route("/health", get(health))
        .with_state(state)
}

/// Serves until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    state: FeedState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "opportunity feed listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Current snapshot for one event. Events outside the latest cycle are
/// scanned on demand.
async fn get_arbitrage(
    Path(event_id): Path<EventId>,
    State(state): State<FeedState>,
) -> Response {
    if let Some(snapshot) = state.store.get(event_id).await {
        return Json(snapshot.to_wire()).into_response();
    }

    let _permit = match state.on_demand.acquire().await {
        Ok(permit) => permit,
        Err(_) => return error_body(StatusCode::SERVICE_UNAVAILABLE, "shutting down"),
    };
    let scan = if state.store.is_listed(event_id).await {
        state.scanner.scan_event(event_id).await
    } else {
        state.scanner.scan_unlisted_event(event_id).await
    };

    match scan {
        Ok(snapshot) => Json(snapshot.to_wire()).into_response(),
        Err(ArbError::EventNotFound(_)) => error_body(StatusCode::NOT_FOUND, "event not found"),
        Err(e) => {
            warn!(event_id, error = %e, "on-demand scan failed");
            error_body(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}

async fn health(State(state): State<FeedState>) -> Response {
    Json(json!({
        "status": "ok",
        "subscribers": state.broadcaster.subscriber_count().await,
        "events": state.store.len().await,
    }))
    .into_response()
}

async fn subscribe(ws: WebSocketUpgrade, State(state): State<FeedState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: FeedState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.broadcaster.register().await;
    let id = subscription.id;
    info!(subscriber = id, "subscriber connected");

    loop {
        tokio::select! {
            batch = subscription.receiver.recv() => match batch {
                Some(json) => {
                    if sender.send(Message::Text(json.to_string())).await.is_err() {
                        debug!(subscriber = id, "send failed");
                        break;
                    }
                }
                None => {
                    // dropped by the broadcaster: shutdown or lagging
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(subscriber = id, error = %e, "receive failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    state.broadcaster.unregister(id).await;
    info!(subscriber = id, "subscriber disconnected");
}
