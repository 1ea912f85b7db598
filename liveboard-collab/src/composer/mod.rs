//! Post composition engine.
//!
//! Streams a post being written to the server while it is typed:
//!
//! ```text
//! input value ──► trim ──► diff against input_body ──► state gate ──► Transport
//!                                                          ▲
//!                        postID ──► receive_id ──► IdReceived
//! ```
//!
//! `input_body` is what the server has already been told. The input control
//! may run ahead of it while an allocation is in flight; the next edit after
//! allocation then sends a single corrective edit covering the whole gap.

pub mod diff;
pub mod reference;
pub mod state;
pub mod upload;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use liveboard_core::{Image, Post, PostView};
use thiserror::Error;
use tokio::sync::watch;

use crate::context::{unix_now, Context};
use crate::protocol::{AllocRequest, ClientMessage, FileData, MessageType, ProtocolError};
use diff::TrimmedInput;
use state::{CompositionEvent, CompositionState, PostStateMachine};

pub use upload::UploadOutcome;

/// Composer configuration.
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Maximum body length in code points
    pub max_body_len: usize,
    /// Maximum number of lines in a body
    pub max_lines: usize,
    /// Interval between upload re-checks while an allocation is in flight
    pub alloc_retry_interval: Duration,
    /// Poster name sent with the allocation request
    pub poster_name: Option<String>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_body_len: 2000,
            max_lines: 100,
            alloc_retry_interval: Duration::from_millis(200),
            poster_name: None,
        }
    }
}

impl ComposerConfig {
    pub fn trim(&self, val: &str) -> TrimmedInput {
        diff::trim_input(val, self.max_body_len, self.max_lines)
    }
}

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("No transition from {from:?} on {event:?}")]
    InvalidTransition {
        from: CompositionState,
        event: CompositionEvent,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Result of feeding an input value to the composer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    /// Type of the message sent, if any
    pub sent: Option<MessageType>,
    /// Code points trimmed off the input. The input control should be
    /// rolled back by as many.
    pub trimmed: usize,
}

/// Pending one-shot allocation handler.
#[derive(Debug)]
struct AllocationTicket {
    carries_image: bool,
}

#[derive(Debug)]
struct Session {
    /// Owned here until the server allocates it
    draft: Option<Post>,
    id: u64,
    /// Text already sent to the server
    input_body: String,
    /// Latest trimmed input value, possibly ahead of `input_body`
    live_input: String,
    allocating_image: bool,
    has_image: bool,
    pending_alloc: Option<AllocationTicket>,
}

struct Inner {
    config: ComposerConfig,
    ctx: Context,
    machine: PostStateMachine,
    session: Mutex<Session>,
}

/// Composition session for one new post.
///
/// Cheap to clone; clones share the session. All entry points take the
/// session lock only for the duration of a synchronous step, so upload
/// waits never block edits or the allocation response.
#[derive(Clone)]
pub struct PostComposer {
    inner: Arc<Inner>,
}

impl PostComposer {
    /// Start composing a new post in the context's thread.
    pub fn new(ctx: Context, config: ComposerConfig) -> Self {
        let draft = Post::draft(ctx.thread, ctx.board.clone(), unix_now());
        Self {
            inner: Arc::new(Inner {
                config,
                ctx,
                machine: PostStateMachine::new(),
                session: Mutex::new(Session {
                    draft: Some(draft),
                    id: 0,
                    input_body: String::new(),
                    live_input: String::new(),
                    allocating_image: false,
                    has_image: false,
                    pending_alloc: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> CompositionState {
        self.inner.machine.state()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<CompositionState> {
        self.inner.machine.subscribe()
    }

    /// Server-assigned id, zero while unallocated.
    pub fn id(&self) -> u64 {
        self.lock().id
    }

    /// Body text the server has acknowledged or been sent.
    pub fn input_body(&self) -> String {
        self.lock().input_body.clone()
    }

    /// Feed the current input value.
    ///
    /// The value is trimmed to the configured limits first. In `draft` the
    /// first non-empty value requests allocation; in `allocated` the change
    /// is diffed and sent. Values fed while `allocating` or `halted` are
    /// remembered but not sent.
    pub fn submit_edit(&self, val: &str) -> Result<EditOutcome, ComposeError> {
        let mut session = self.lock();
        let TrimmedInput { text, excess } = self.inner.config.trim(val);
        session.live_input.clone_from(&text);
        let mut outcome = EditOutcome {
            sent: None,
            trimmed: excess,
        };

        let state = self.state();
        if !state.accepts_edits() {
            log::trace!("Holding back edit in {state:?}");
            return Ok(outcome);
        }
        if text == session.input_body {
            return Ok(outcome);
        }

        if state == CompositionState::Draft {
            self.request_alloc(&mut session, text, None)?;
            outcome.sent = Some(MessageType::InsertPost);
            return Ok(outcome);
        }

        if let Some(op) = diff::compute_edit(&session.input_body, &text) {
            let msg = op.into_message();
            outcome.sent = Some(msg.message_type());
            self.send(&msg)?;
            session.input_body = text;
        }
        Ok(outcome)
    }

    /// Send an allocation request and arm the one-shot id handler.
    ///
    /// The session is only updated once the request has left, so a failed
    /// send leaves it as it was.
    fn request_alloc(
        &self,
        session: &mut Session,
        body: String,
        image: Option<FileData>,
    ) -> Result<(), ComposeError> {
        let carries_image = image.is_some();
        let mut req = AllocRequest::new();
        req.name.clone_from(&self.inner.config.poster_name);
        req.image = image;
        if !body.is_empty() {
            req.body = Some(body.clone());
        }

        self.send(&ClientMessage::InsertPost(req))?;
        self.inner.machine.feed(CompositionEvent::SentAllocRequest)?;
        if !body.is_empty() {
            if let Some(draft) = session.draft.as_mut() {
                draft.body.clone_from(&body);
            }
            session.input_body = body;
        }
        session.pending_alloc = Some(AllocationTicket { carries_image });
        log::debug!("Requested post allocation (image: {carries_image})");
        Ok(())
    }

    fn send(&self, msg: &ClientMessage) -> Result<(), ComposeError> {
        if self.state() == CompositionState::Halted {
            return Ok(());
        }
        self.inner.ctx.transport.send(msg)?;
        Ok(())
    }

    /// One-shot allocation handler. Consumes the `postID` response, commits
    /// the id and hands the post over to the registry.
    ///
    /// A second response for the same session finds no pending ticket and
    /// is rejected.
    pub fn receive_id(&self, id: u64) -> Result<(), ProtocolError> {
        let mut session = self.lock();
        let ticket = session
            .pending_alloc
            .take()
            .ok_or(ProtocolError::DuplicateAllocation(id))?;

        let ctx = &self.inner.ctx;
        let mut post = session
            .draft
            .take()
            .unwrap_or_else(|| Post::draft(ctx.thread, ctx.board.clone(), unix_now()));
        post.id = id;
        post.op = ctx.thread;
        post.seen_once = true;
        post.body.clone_from(&session.input_body);
        session.id = id;
        if ticket.carries_image {
            session.has_image = true;
        }

        if self.inner.machine.feed(CompositionEvent::IdReceived).is_err() {
            // Closed or errored while the request was in flight
            log::info!("Post {id} allocated after composition halted");
            post.editing = false;
        }
        log::debug!("Allocated post {id}");
        ctx.registry.insert(post);
        Ok(())
    }

    /// Merge the server's echo of the own post into the registry copy. This
    /// is where an image sent with the allocation request arrives.
    pub fn on_allocation(&self, data: Post) -> bool {
        let mut session = self.lock();
        if session.id == 0 || session.id != data.id {
            return false;
        }
        if data.image.is_some() {
            session.has_image = true;
        }
        self.inner
            .ctx
            .registry
            .update(data.id, &mut |post| post.extend_from(data.clone()))
    }

    /// Commit the final input value and close the post.
    pub fn request_close(&self, val: &str) -> Result<(), ComposeError> {
        self.submit_edit(val)?;
        match self.state() {
            CompositionState::Halted => Ok(()),
            CompositionState::Draft => {
                // Nothing reached the server
                self.abandon();
                Ok(())
            }
            CompositionState::Allocating | CompositionState::Allocated => {
                self.send(&ClientMessage::ClosePost)?;
                self.abandon();
                Ok(())
            }
        }
    }

    /// Close the post locally without notifying the server, e.g. after it
    /// expired.
    pub fn abandon(&self) {
        let mut session = self.lock();
        if self.inner.machine.feed(CompositionEvent::PostClosed).is_err() {
            return;
        }
        session.draft = None;
        if session.id != 0 {
            self.inner
                .ctx
                .registry
                .update(session.id, &mut |post| post.editing = false);
        }
        log::debug!("Closed composition of post {}", session.id);
    }

    /// Spoiler the attached image. Returns false, if there is nothing to
    /// spoiler yet.
    pub fn request_spoiler(&self) -> Result<bool, ComposeError> {
        let session = self.lock();
        if self.state() != CompositionState::Allocated
            || !(session.has_image || session.allocating_image)
        {
            return Ok(false);
        }
        self.send(&ClientMessage::Spoiler)?;
        Ok(true)
    }

    /// Halt on a fatal protocol error.
    pub fn halt(&self) {
        // FatalError is accepted from every state
        let _ = self.inner.machine.feed(CompositionEvent::FatalError);
    }

    /// Read-only snapshot for rendering.
    pub fn snapshot(&self) -> DraftView {
        let session = self.lock();
        let post = match &session.draft {
            Some(draft) => draft.clone(),
            None => self
                .inner
                .ctx
                .registry
                .get(session.id)
                .unwrap_or_default(),
        };
        DraftView {
            post,
            input: session.live_input.clone(),
            state: self.state(),
        }
    }
}

/// Snapshot of a composition session.
#[derive(Debug, Clone)]
pub struct DraftView {
    pub post: Post,
    /// Current input value, possibly ahead of what was sent
    pub input: String,
    pub state: CompositionState,
}

impl PostView for DraftView {
    fn id(&self) -> u64 {
        self.post.id
    }

    fn op(&self) -> u64 {
        self.post.op
    }

    fn body(&self) -> &str {
        &self.input
    }

    fn image(&self) -> Option<&Image> {
        self.post.image.as_ref()
    }

    fn is_editing(&self) -> bool {
        self.state != CompositionState::Halted
    }
}
