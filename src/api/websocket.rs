use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

use super::signaling::{ProctorMessage, SessionSignalingHandler};
use crate::proctoring::ProctorManager;

pub async fn handle_proctor_websocket(websocket: WebSocket, manager: Arc<ProctorManager>) {
    tracing::info!("New proctoring WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut signaling_handler = SessionSignalingHandler::new(manager, tx);

    // Spawn task to send messages to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                handle_websocket_message(&mut signaling_handler, message).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup().await;
    sender_task.abort();
    tracing::info!("Proctoring WebSocket connection closed");
}

async fn handle_websocket_message(signaling_handler: &mut SessionSignalingHandler, message: Message) {
    let Ok(text) = message.to_str() else {
        return;
    };
    tracing::debug!("Received proctoring message: {}", text);

    match serde_json::from_str::<ProctorMessage>(text) {
        Ok(proctor_message) => {
            signaling_handler.handle_message(proctor_message).await;
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                raw_message = %text,
                "Failed to parse proctoring message"
            );
        }
    }
}
