// SPDX-License-Identifier: GPL-3.0-only
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::api::handlers::{ApiHandlers, ApiResponse};
use crate::engine::Event;

/// Requests a client may send over the socket.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    ListComponents,
    GetComponent { id: String },
    Update { id: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct WsResponse {
    success: bool,
    data: Option<serde_json::Value>,
    error: Option<String>,
}

impl WsResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl<T: Serialize> From<ApiResponse<T>> for WsResponse {
    fn from(response: ApiResponse<T>) -> Self {
        Self {
            success: response.success,
            data: response
                .data
                .map(|v| serde_json::to_value(v).unwrap_or_default()),
            error: response.error,
        }
    }
}

pub struct WebSocketServer {
    handlers: Arc<ApiHandlers>,
}

impl WebSocketServer {
    pub fn new(handlers: Arc<ApiHandlers>) -> Self {
        Self { handlers }
    }

    pub fn router(&self) -> Router {
        let handlers = self.handlers.clone();
        Router::new().route(
            "/ws",
            get(move |ws: WebSocketUpgrade| async move {
                ws.on_upgrade(move |socket| handle_socket(socket, handlers))
            }),
        )
    }
}

/// Engine events are pushed to the client as they happen; client requests
/// are answered on the same socket.
async fn handle_socket(socket: WebSocket, handlers: Arc<ApiHandlers>) {
    let (sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut send_task = tokio::spawn(async move {
        let mut sender = sender;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sender.send(msg).await {
                error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    let mut events = handlers.service().subscribe();
    let event_tx = tx.clone();
    let mut event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match event_message(&event) {
                    Ok(msg) => {
                        if event_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to serialize engine event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let handlers_clone = handlers.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Err(e) = handle_message(text, &handlers_clone, &tx).await {
                        error!(error = %e, "Failed to handle WebSocket message");
                    }
                }
                Message::Close(_) => {
                    info!("WebSocket connection closed");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
            event_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
            event_task.abort();
        }
        _ = (&mut event_task) => {
            send_task.abort();
            recv_task.abort();
        }
    };
}

fn event_message(event: &Event) -> serde_json::Result<Message> {
    Ok(Message::Text(serde_json::to_string(event)?))
}

async fn handle_message(
    text: String,
    handlers: &ApiHandlers,
    tx: &mpsc::UnboundedSender<Message>,
) -> anyhow::Result<()> {
    let msg: WsMessage = match serde_json::from_str(&text) {
        Ok(m) => m,
        Err(e) => {
            let response = WsResponse::failure(format!("Invalid message format: {}", e));
            tx.send(Message::Text(serde_json::to_string(&response)?))?;
            return Ok(());
        }
    };

    let response = match msg {
        WsMessage::ListComponents => {
            let Json(response) = handlers.list_components().await;
            WsResponse::from(response)
        }
        WsMessage::GetComponent { id } => match handlers.get_component(Path(id)).await {
            Ok(Json(response)) => WsResponse::from(response),
            Err(_) => WsResponse::failure("Component not found"),
        },
        WsMessage::Update { id } => match handlers.update_component(Path(id)).await {
            Ok(Json(response)) => WsResponse::from(response),
            Err(_) => WsResponse::failure("Component not found"),
        },
    };

    tx.send(Message::Text(serde_json::to_string(&response)?))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        let msg: WsMessage = serde_json::from_str(r#"{"type":"update","id":"abc"}"#).unwrap();
        assert!(matches!(msg, WsMessage::Update { id } if id == "abc"));

        let msg: WsMessage = serde_json::from_str(r#"{"type":"list_components"}"#).unwrap();
        assert!(matches!(msg, WsMessage::ListComponents));

        assert!(serde_json::from_str::<WsMessage>(r#"{"type":"install_map"}"#).is_err());
    }

    #[test]
    fn test_event_message_is_json() {
        let Message::Text(text) = event_message(&Event::Updated("abc".to_string())).unwrap() else {
            panic!("expected a text message");
        };
        assert_eq!(text, r#"{"event":"updated","id":"abc"}"#);
    }

    #[test]
    fn test_failure_response() {
        let json = serde_json::to_value(WsResponse::failure("nope")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "nope");
    }
}
