//! WebSocket sessions for raw metric streaming

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header::ORIGIN},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, stream::SplitSink, stream::StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use crate::{
    api::state::IngestState,
    realtime::{SessionTransport, TransportError},
};

/// Outbound half of an axum websocket
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    open: AtomicBool,
}

impl WsTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            open: AtomicBool::new(true),
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        self.sink
            .lock()
            .await
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.mark_closed();
        let _ = self.sink.lock().await.close().await;
    }
}

fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }

    match headers.get(ORIGIN).and_then(|origin| origin.to_str().ok()) {
        Some(origin) => allowed.iter().any(|a| a == origin),
        // non-browser clients send no origin
        None => true,
    }
}

/// WebSocket upgrade handler
///
/// GET /ws/metrics
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<IngestState>,
) -> Response {
    if !origin_allowed(&headers, &state.allowed_origins) {
        debug!("rejected websocket from origin {:?}", headers.get(ORIGIN));
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: IngestState) {
    let (sender, mut receiver) = socket.split();
    let transport = Arc::new(WsTransport::new(sender));
    let session_id = state.sessions.register(transport.clone());

    info!("websocket session {session_id} connected");

    // inbound traffic is ignored, the loop only watches for the end of the connection
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Close(_) => break,
            Message::Ping(_) => trace!("received ping"),
            _ => {}
        }
    }

    transport.mark_closed();
    state.sessions.deregister(&session_id).await;

    info!("websocket session {session_id} disconnected");
}
