//! WebSocket event fan-out.
//!
//! The hub is the single subscriber to the tracker's event stream. Each
//! incoming event is serialized once and offered to every connected
//! client through a bounded per-client queue. A client that cannot keep
//! up has its queue closed and is disconnected - load-shedding, not
//! backpressure: the tracker must never block on a slow consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::AppState;
use crate::tracker::Tracker;

/// Per-client send queue depth.
const CLIENT_QUEUE: usize = 256;

/// Fan-out hub owning the set of connected WebSocket clients.
pub struct Hub {
    tracker: Arc<Tracker>,
    clients: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self {
            tracker,
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Pump tracker events to all clients until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut events = self.tracker.subscribe();
        info!("WebSocket hub started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = events.recv() => match result {
                    Ok(event) => {
                        // Serialize once, share the payload with every client.
                        match serde_json::to_string(&event) {
                            Ok(payload) => self.broadcast(&payload),
                            Err(e) => warn!(error = %e, "Failed to serialize event"),
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Hub lagged behind tracker events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        self.clients.lock().unwrap().clear();
        info!("WebSocket hub stopped");
    }

    fn broadcast(&self, payload: &str) {
        let mut clients = self.clients.lock().unwrap();
        clients.retain(|id, tx| match tx.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client = id, "WebSocket client too slow, disconnecting");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        self.clients.lock().unwrap().remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

/// `GET /ws` upgrade handler. Origin checking is intentionally
/// permissive; the endpoint serves the bundled map UI from any host.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (id, mut rx) = hub.register();
    debug!(client = id, total = hub.client_count(), "WebSocket client connected");

    let (mut sink, mut stream) = socket.split();

    // Write pump: drain the hub queue into the socket.
    let mut write_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Read pump: discard inbound frames, notice the close.
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(_)) = stream.next().await {}
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    hub.unregister(id);
    debug!(client = id, total = hub.client_count(), "WebSocket client disconnected");
}
