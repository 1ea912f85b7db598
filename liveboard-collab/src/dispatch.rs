//! Message dispatch table.
//!
//! ```text
//! text frame ──► ServerMessage::decode ──┬── concat ──► dispatch each frame
//!                                        ├── postID ──► composer.receive_id
//!                                        ├── invalid ─► halt + transport.fail
//!                                        ├── serverTime ─► clock offset
//!                                        └── handlers[kind] ──► registry / events
//! ```
//!
//! Handlers targeting a post the registry does not know drop the message.
//! Posts scroll out of view or were never displayed; that is not an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use liveboard_core::{Post, PostError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::composer::{ComposerConfig, PostComposer};
use crate::context::{unix_now, Context};
use crate::protocol::{MessageType, ProtocolError, ServerMessage, SyncCount};

/// Notifications for the rendering and page layers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// A post not seen before was added to the registry
    PostInserted(u64),
    /// A registered post was modified
    PostChanged { id: u64, kind: MessageType },
    /// The composer's post received its id
    Allocated(u64),
    /// The server rejected the connection
    Fatal(String),
    ServerTime { server: i64, offset: i64 },
    Redirect(String),
    Notification(String),
    SyncCount(SyncCount),
    CaptchaRequired,
    Synchronised(serde_json::Value),
    Configs(serde_json::Value),
}

/// Events held for a receiver that is slow or was never taken.
const EVENT_CAPACITY: usize = 256;

/// Handler for one message kind.
pub type Handler = fn(&Dispatcher, ServerMessage) -> Result<(), ProtocolError>;

/// Routes decoded server messages to their handlers.
pub struct Dispatcher {
    ctx: Context,
    handlers: HashMap<MessageType, Handler>,
    composer: Mutex<Option<PostComposer>>,
    /// Server time minus local time, in seconds
    server_offset: AtomicI64,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
}

impl Dispatcher {
    pub fn new(ctx: Context) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let mut dispatcher = Self {
            ctx,
            handlers: HashMap::new(),
            composer: Mutex::new(None),
            server_offset: AtomicI64::new(0),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        };

        dispatcher.register(MessageType::InsertPost, handle_insert_post);
        dispatcher.register(MessageType::Append, handle_append);
        dispatcher.register(MessageType::Backspace, handle_backspace);
        dispatcher.register(MessageType::Splice, handle_splice);
        dispatcher.register(MessageType::ClosePost, handle_close);
        dispatcher.register(MessageType::InsertImage, handle_insert_image);
        dispatcher.register(MessageType::Spoiler, handle_spoiler);
        dispatcher.register(MessageType::ModeratePost, handle_moderation);
        for kind in [
            MessageType::Synchronise,
            MessageType::SyncCount,
            MessageType::Redirect,
            MessageType::Notification,
            MessageType::Captcha,
            MessageType::Configs,
        ] {
            dispatcher.register(kind, forward_event);
        }
        dispatcher
    }

    /// Install a handler, replacing any previous one for `kind`.
    pub fn register(&mut self, kind: MessageType, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Take the event receiver (can only be called once).
    ///
    /// Until then, and whenever the receiver falls behind, at most
    /// `EVENT_CAPACITY` events are kept and the rest are dropped.
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::debug!("Event queue full, dropping {event:?}");
            }
            // Receiver taken and dropped, nobody listening
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Start composing a new post and route allocation responses to it.
    pub fn new_composer(&self, config: ComposerConfig) -> PostComposer {
        let composer = PostComposer::new(self.ctx.clone(), config);
        self.attach_composer(composer.clone());
        composer
    }

    pub fn attach_composer(&self, composer: PostComposer) {
        *self.composer.lock().unwrap_or_else(PoisonError::into_inner) = Some(composer);
    }

    pub fn detach_composer(&self) -> Option<PostComposer> {
        self.composer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn composer(&self) -> Option<PostComposer> {
        self.composer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Server time minus local time, in seconds.
    pub fn server_offset(&self) -> i64 {
        self.server_offset.load(Ordering::Relaxed)
    }

    /// Decode and dispatch one text frame.
    pub fn dispatch_frame(&self, frame: &str) -> Result<(), ProtocolError> {
        let msg = ServerMessage::decode(frame)?;
        self.dispatch(msg)
    }

    pub fn dispatch(&self, msg: ServerMessage) -> Result<(), ProtocolError> {
        match msg {
            ServerMessage::Concat(frames) => {
                for frame in frames {
                    match self.dispatch_frame(&frame) {
                        Err(e @ ProtocolError::Fatal(_)) => return Err(e),
                        Err(e) => log::warn!("Dropping batched message: {e}"),
                        Ok(()) => {}
                    }
                }
                Ok(())
            }
            ServerMessage::PostId(id) => self.receive_post_id(id),
            ServerMessage::Invalid(reason) => Err(self.fail(reason)),
            ServerMessage::ServerTime(server) => {
                let Some(offset) = server.checked_sub(unix_now()) else {
                    log::warn!("Server time {server} out of range");
                    return Err(ProtocolError::InvalidPayload(
                        MessageType::ServerTime,
                        format!("server time {server} out of range"),
                    ));
                };
                self.server_offset.store(offset, Ordering::Relaxed);
                self.emit(ClientEvent::ServerTime { server, offset });
                Ok(())
            }
            ServerMessage::Noop => Ok(()),
            msg => {
                let kind = msg.message_type();
                match self.handlers.get(&kind) {
                    Some(handler) => handler(self, msg),
                    None => {
                        log::debug!("No handler for {kind:?}");
                        Ok(())
                    }
                }
            }
        }
    }

    fn receive_post_id(&self, id: u64) -> Result<(), ProtocolError> {
        let Some(composer) = self.composer() else {
            log::warn!("Allocation response for post {id} with no post being composed");
            return Err(ProtocolError::DuplicateAllocation(id));
        };
        if let Err(e) = composer.receive_id(id) {
            log::warn!("{e}");
            return Err(e);
        }
        self.emit(ClientEvent::Allocated(id));
        Ok(())
    }

    /// Fatal server error: surface it, fail the connection and halt
    /// composition.
    fn fail(&self, reason: String) -> ProtocolError {
        log::error!("Server error: {reason}");
        self.ctx.transport.fail(&reason);
        if let Some(composer) = self.composer() {
            composer.halt();
        }
        self.emit(ClientEvent::Fatal(reason.clone()));
        ProtocolError::Fatal(reason)
    }

    /// Run `f` on a registered post. Unknown targets and mutations the post
    /// rejects are logged and dropped.
    fn with_post<F>(&self, id: u64, kind: MessageType, f: F)
    where
        F: FnOnce(&mut Post) -> Result<(), PostError>,
    {
        let mut f = Some(f);
        let mut result = Ok(());
        let found = self.ctx.registry.update(id, &mut |post| {
            if let Some(f) = f.take() {
                result = f(post);
            }
        });

        if !found {
            log::debug!("Dropping {kind:?} for unknown post {id}");
            return;
        }
        match result {
            Ok(()) => self.emit(ClientEvent::PostChanged { id, kind }),
            Err(e) => log::warn!("Could not apply {kind:?} to post {id}: {e}"),
        }
    }
}

fn mismatch(msg: &ServerMessage) -> ProtocolError {
    ProtocolError::Unsupported(msg.message_type())
}

fn handle_insert_post(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let ServerMessage::InsertPost(data) = msg else {
        return Err(mismatch(&msg));
    };
    let id = data.id;

    if let Some(composer) = d.composer() {
        if composer.on_allocation(data.clone()) {
            d.emit(ClientEvent::PostChanged {
                id,
                kind: MessageType::InsertPost,
            });
            return Ok(());
        }
    }
    if d.ctx.registry.contains(id) {
        return Ok(());
    }

    let post = Post {
        op: d.ctx.thread,
        board: d.ctx.board.clone(),
        seen_once: true,
        ..data
    };
    d.ctx.registry.insert(post);
    d.emit(ClientEvent::PostInserted(id));
    Ok(())
}

fn handle_append(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let ServerMessage::Append { id, code } = msg else {
        return Err(mismatch(&msg));
    };
    d.with_post(id, MessageType::Append, |post| post.append(code));
    Ok(())
}

fn handle_backspace(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let ServerMessage::Backspace(id) = msg else {
        return Err(mismatch(&msg));
    };
    d.with_post(id, MessageType::Backspace, |post| {
        post.backspace();
        Ok(())
    });
    Ok(())
}

fn handle_splice(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let ServerMessage::Splice(msg) = msg else {
        return Err(mismatch(&msg));
    };
    let splice = msg.splice;
    d.with_post(msg.id, MessageType::Splice, |post| {
        post.splice(splice.start, splice.len, &splice.text)
    });
    Ok(())
}

fn handle_close(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let ServerMessage::ClosePost(msg) = msg else {
        return Err(mismatch(&msg));
    };
    d.with_post(msg.id, MessageType::ClosePost, |post| {
        post.close(msg.links, msg.commands);
        Ok(())
    });
    Ok(())
}

fn handle_insert_image(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let ServerMessage::InsertImage(msg) = msg else {
        return Err(mismatch(&msg));
    };
    d.with_post(msg.id, MessageType::InsertImage, |post| {
        post.insert_image(msg.image);
        Ok(())
    });
    Ok(())
}

fn handle_spoiler(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let ServerMessage::Spoiler(id) = msg else {
        return Err(mismatch(&msg));
    };
    d.with_post(id, MessageType::Spoiler, |post| {
        if !post.spoiler_image() {
            log::debug!("Post {id} has no image to spoiler");
        }
        Ok(())
    });
    Ok(())
}

fn handle_moderation(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let ServerMessage::ModeratePost(msg) = msg else {
        return Err(mismatch(&msg));
    };
    d.with_post(msg.id, MessageType::ModeratePost, |post| {
        post.apply_moderation(msg.entry);
        Ok(())
    });
    Ok(())
}

/// Page-level messages are passed on as events.
fn forward_event(d: &Dispatcher, msg: ServerMessage) -> Result<(), ProtocolError> {
    let event = match msg {
        ServerMessage::Synchronise(state) => ClientEvent::Synchronised(state),
        ServerMessage::SyncCount(count) => ClientEvent::SyncCount(count),
        ServerMessage::Redirect(url) => ClientEvent::Redirect(url),
        ServerMessage::Notification(text) => ClientEvent::Notification(text),
        ServerMessage::Captcha => ClientEvent::CaptchaRequired,
        ServerMessage::Configs(configs) => ClientEvent::Configs(configs),
        other => return Err(mismatch(&other)),
    };
    d.emit(event);
    Ok(())
}
