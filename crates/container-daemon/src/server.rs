//! WebSocket server for the daemon

use crate::handlers::{self, DaemonState};
use crate::protocol::{Request, Response};
use anyhow::{Context, Result};
use async_net::{TcpListener, TcpStream};
use async_tungstenite::accept_async;
use async_tungstenite::tungstenite::Message;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bind the listening socket
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))
}

/// Accept connections until the listener fails
pub async fn serve(listener: TcpListener, state: Arc<DaemonState>) -> Result<()> {
    info!("Daemon listening on ws://{}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!("New connection from {}", peer_addr);
                let state = state.clone();

                smol::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        error!("Connection handler error: {}", e);
                    }
                })
                .detach();
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a WebSocket connection
async fn handle_connection(stream: TcpStream, state: Arc<DaemonState>) -> Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .context("Failed to accept WebSocket connection")?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let response = match serde_json::from_str::<Request>(&text) {
                    Ok(request) => handlers::handle_request(request, &state).await,
                    Err(e) => {
                        warn!("Failed to parse request: {}", e);
                        Response::BadRequest {
                            message: format!("Invalid request format: {}", e),
                        }
                    }
                };

                let response_text = serde_json::to_string(&response)?;
                ws_sender.send(Message::Text(response_text.into())).await?;
            }
            Ok(Message::Close(_)) => {
                debug!("Client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    debug!("Connection closed");
    Ok(())
}
