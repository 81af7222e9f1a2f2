//! WebSocket Relay Server
//!
//! Accepts WebSocket connections and runs one reader loop and one writer task
//! per connection. The reader feeds frames to a [`ConnectionHandler`]; the
//! writer drains that connection's outbound queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{accept_async_with_config, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::config::RelayConfig;
use crate::network::broadcast::{member_channel, OUTBOUND_QUEUE_CAPACITY};
use crate::network::handler::{ConnectionHandler, Dispatch};
use crate::network::registry::SessionRegistry;
use crate::network::session::ConnectionId;

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The relay server.
pub struct RelayServer {
    /// Server configuration.
    config: RelayConfig,
    /// Live sessions.
    registry: Arc<SessionRegistry>,
    /// Open connections.
    connections: Arc<AtomicUsize>,
    /// Next connection id.
    next_connection: AtomicU64,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = SessionRegistry::new(config.registry.clone());

        Self {
            config,
            registry,
            connections: Arc::new(AtomicUsize::new(0)),
            next_connection: AtomicU64::new(1),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, RelayError> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let local = listener.local_addr()?;
        info!("Relay listening on ws://{}", local);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let open = self.connections.load(Ordering::SeqCst);
                            if open >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", display_addr(addr));
                                continue;
                            }
                            self.connections.fetch_add(1, Ordering::SeqCst);
                            let slot = ConnectionSlot(self.connections.clone());

                            let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
                            info!(conn = %id, "New connection from {}", display_addr(addr));
                            self.handle_connection(stream, addr, id, slot);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, id: ConnectionId, slot: ConnectionSlot) {
        let registry = self.registry.clone();
        let ws_config = WebSocketConfig {
            max_message_size: Some(self.config.max_message_bytes),
            max_frame_size: Some(self.config.max_message_bytes),
            ..Default::default()
        };
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;

            let ws_stream = match accept_async_with_config(stream, Some(ws_config)).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(conn = %id, "WebSocket handshake failed for {}: {}", display_addr(addr), e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (frame_tx, mut frame_rx) = member_channel(OUTBOUND_QUEUE_CAPACITY);
            let stall_watch = frame_tx.clone();

            // Writer: frames are already serialized by the broadcast router.
            let sender_task = tokio::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    if ws_sender.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut handler = ConnectionHandler::new(id, frame_tx, registry);

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let dispatch = match msg {
                            Some(Ok(Message::Text(text))) => handler.handle_text(&text).await,
                            Some(Ok(Message::Binary(data))) => handler.handle_binary(&data).await,
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(conn = %id, "Client disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(conn = %id, "WebSocket error: {}", e);
                                break;
                            }
                            // Pings are answered by the protocol layer.
                            Some(Ok(_)) => continue,
                        };
                        if let Dispatch::Dropped(reason) = dispatch {
                            debug!(conn = %id, ?reason, "Event dropped");
                        }
                    }
                    _ = stall_watch.overflowed() => {
                        warn!(conn = %id, "Client not reading, closing");
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!(conn = %id, "Closing for shutdown");
                        break;
                    }
                }
            }

            // Cleanup
            if let Some(departure) = handler.disconnect().await {
                debug!(conn = %id, ?departure, "Left session");
            }
            sender_task.abort();

            info!(conn = %id, "Client {} cleaned up", display_addr(addr));
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get open connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Get live session count.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }
}

/// Client address with IPv4-mapped IPv6 shown as plain IPv4.
fn display_addr(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}
