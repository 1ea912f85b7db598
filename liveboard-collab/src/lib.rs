//! # liveboard-collab — Live post composition over WebSocket
//!
//! Streams a post to the server while it is being typed and applies the
//! edits other clients stream to the posts of the displayed thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   submit_edit    ┌──────────────┐   text frames   ┌────────┐
//! │ input control│ ───────────────► │ PostComposer │ ──────────────► │        │
//! └──────────────┘                  └──────▲───────┘   SyncClient    │ server │
//!                                          │ postID                  │        │
//! ┌──────────────┐   PostChanged    ┌──────┴───────┐ ◄────────────── │        │
//! │ renderer     │ ◄─────────────── │  Dispatcher  │                 └────────┘
//! └──────────────┘                  └──────┬───────┘
//!                                          ▼
//!                                   ┌──────────────┐
//!                                   │ PostRegistry │
//!                                   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Two-digit type + JSON text wire format
//! - [`composer`] — Composition state machine, diff engine, image attachment
//! - [`dispatch`] — Message type to handler table
//! - [`client`] — WebSocket transport with ordered sends
//! - [`context`] — Registry and transport handles shared by the above

pub mod client;
pub mod composer;
pub mod context;
pub mod dispatch;
pub mod protocol;

// Re-exports for convenience
pub use client::{ClientConfig, ConnectionState, SyncClient};
pub use composer::diff::{compute_edit, trim_input, EditOp, TrimmedInput};
pub use composer::reference::insert_reference;
pub use composer::state::{CompositionEvent, CompositionState, PostStateMachine};
pub use composer::{
    ComposeError, ComposerConfig, DraftView, EditOutcome, PostComposer, UploadOutcome,
};
pub use context::{Context, MemoryTransport, Transport};
pub use dispatch::{ClientEvent, Dispatcher, Handler};
pub use protocol::{
    AllocRequest, ClientMessage, FileData, MessageType, ProtocolError, ServerMessage,
    SpliceRequest, SyncCount,
};
