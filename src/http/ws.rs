//! Live console fan-out.
//!
//! Every decoded group, alert and transcription result is pushed to all
//! connected WebSocket clients as `{topic, payload, timestamp}`. A tokio
//! broadcast channel decouples producers from slow clients; a lagging
//! client just loses old messages.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::store::now_ts;

/// Buffered console messages per subscriber before lag kicks in.
const CONSOLE_BUFFER: usize = 256;

pub type ConsoleBus = broadcast::Sender<String>;

pub fn console_bus() -> ConsoleBus {
    broadcast::channel(CONSOLE_BUFFER).0
}

/// Broadcast one console message to all connected clients.
pub fn console_send(bus: &ConsoleBus, topic: &str, payload: Value) {
    let msg = json!({
        "topic": topic,
        "payload": payload,
        "timestamp": now_ts(),
    });
    // No receivers is fine; nobody is watching the console.
    let _ = bus.send(msg.to_string());
}

/// Serve one console client until it disconnects.
pub async fn serve_console(socket: WebSocket, bus: ConsoleBus) {
    let mut rx = bus.subscribe();
    let (mut sink, mut stream) = socket.split();
    info!("websocket client connected");

    let welcome = json!({
        "topic": "system/connected",
        "payload": {"message": "WebSocket connected"},
        "timestamp": now_ts(),
    });
    if sink.send(Message::Text(welcome.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("websocket client lagged, skipped {n} messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            // The console is push-only; client messages are drained and
            // ignored, and a close frame ends the session.
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
    info!("websocket client disconnected");
}
