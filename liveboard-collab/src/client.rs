//! WebSocket client for the live thread connection.
//!
//! Provides:
//! - Connection lifecycle (connect, fail, disconnect)
//! - Ordered, synchronous sends through a writer task
//! - Incoming frames handed to the [`Dispatcher`] in arrival order

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::context::Transport;
use crate::dispatch::{ClientEvent, Dispatcher};
use crate::protocol::{ClientMessage, ProtocolError, SyncRequest};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The server rejected us or the socket failed
    Errored,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8000/api/socket`
    pub server_url: String,
    pub board: String,
    /// Thread to synchronise to
    pub thread: u64,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/api/socket".to_string(),
            board: "all".to_string(),
            thread: 0,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// The sync client.
///
/// Implements [`Transport`], so it is handed to the dispatcher's context
/// before connecting:
///
/// ```no_run
/// # use std::sync::Arc;
/// # use liveboard_collab::{ClientConfig, Context, Dispatcher, SyncClient};
/// # use liveboard_core::ThreadRegistry;
/// # async fn run() -> Result<(), liveboard_collab::ProtocolError> {
/// let config = ClientConfig::default();
/// let client = Arc::new(SyncClient::new(config.clone()));
/// let ctx = Context::new(
///     Arc::new(ThreadRegistry::new()),
///     client.clone(),
///     config.board,
///     config.thread,
/// );
/// let dispatcher = Arc::new(Dispatcher::new(ctx));
/// client.connect(dispatcher).await?;
/// # Ok(())
/// # }
/// ```
pub struct SyncClient {
    config: ClientConfig,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task, present while connected
    outgoing_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl SyncClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn outgoing(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outgoing_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect to the server and synchronise to the configured thread.
    ///
    /// Spawns the writer and reader tasks. The returned handle completes
    /// once the reader has seen the connection end.
    pub async fn connect(
        &self,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<JoinHandle<()>, ProtocolError> {
        self.set_state(ConnectionState::Connecting);

        let url = self.config.server_url.as_str();
        let ws_stream = match tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(url),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ProtocolError::Connect(e.to_string()));
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ProtocolError::Connect(format!("timed out connecting to {url}")));
            }
        };
        log::info!("Connected to {url}");

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                log::trace!("-> {frame}");
                if ws_writer.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        *self.outgoing() = Some(out_tx);

        // Queued ahead of anything the composer sends
        self.send(&ClientMessage::Synchronise(SyncRequest {
            board: self.config.board.clone(),
            thread: self.config.thread,
        }))?;

        self.set_state(ConnectionState::Connected);
        dispatcher.emit(ClientEvent::Connected);

        // Reader task: process incoming frames in order
        let state = self.state.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        log::trace!("<- {}", text.as_str());
                        match dispatcher.dispatch_frame(text.as_str()) {
                            Ok(()) => {}
                            Err(ProtocolError::Fatal(_)) => break,
                            Err(e) => log::warn!("Dropping message: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        log::warn!("WebSocket error: {e}");
                        *state.write().unwrap_or_else(PoisonError::into_inner) =
                            ConnectionState::Errored;
                        break;
                    }
                    _ => {}
                }
            }

            // Connection lost
            {
                let mut state = state.write().unwrap_or_else(PoisonError::into_inner);
                if *state != ConnectionState::Errored {
                    *state = ConnectionState::Disconnected;
                }
            }
            log::info!("Disconnected");
            dispatcher.emit(ClientEvent::Disconnected);
        });

        Ok(reader)
    }

    /// Close the connection. Queued messages are still flushed.
    pub fn disconnect(&self) {
        if self.outgoing().take().is_some() {
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

impl Transport for SyncClient {
    fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        let frame = msg.encode()?;
        match self.outgoing().as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    fn fail(&self, reason: &str) {
        log::error!("Connection failed: {reason}");
        self.outgoing().take();
        self.set_state(ConnectionState::Errored);
    }
}
