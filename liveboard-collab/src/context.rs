//! Collaborators injected into the composer and the dispatcher.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use liveboard_core::PostRegistry;

use crate::protocol::{ClientMessage, ProtocolError};

/// Outbound side of the connection.
pub trait Transport: Send + Sync {
    /// Queue a message for sending. Messages leave in call order.
    fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError>;

    /// Move the connection into its error state. Recovery is up to the
    /// transport.
    fn fail(&self, reason: &str);
}

/// Everything a composer or dispatcher needs from its surroundings.
#[derive(Clone)]
pub struct Context {
    pub registry: Arc<dyn PostRegistry>,
    pub transport: Arc<dyn Transport>,
    /// Board of the displayed thread
    pub board: String,
    /// Thread new posts are created in
    pub thread: u64,
}

impl Context {
    pub fn new(
        registry: Arc<dyn PostRegistry>,
        transport: Arc<dyn Transport>,
        board: impl Into<String>,
        thread: u64,
    ) -> Self {
        Self {
            registry,
            transport,
            board: board.into(),
            thread,
        }
    }
}

/// Transport that records messages instead of sending them.
///
/// Used for headless composition and in tests.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<ClientMessage>>,
    failure: Mutex<Option<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages sent so far, in order.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove and return all messages sent so far.
    pub fn take(&self) -> Vec<ClientMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Reason passed to the last `fail` call.
    pub fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        if self.failure().is_some() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg.clone());
        Ok(())
    }

    fn fail(&self, reason: &str) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
