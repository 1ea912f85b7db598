//! Composition state machine.
//!
//! ```text
//!  draft ──sent alloc──► allocating ──id received──► allocated
//!    │                       │                           │
//!    └──────── closed ───────┴────────── closed ─────────┴──► halted
//!
//!  any ── fatal error ──► halted        (no way out of halted)
//! ```
//!
//! Transitions are published on a `watch` channel, so waiters can react to
//! the allocation without polling.

use tokio::sync::watch;

use super::ComposeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionState {
    /// No server id yet, editing is local
    Draft,
    /// Allocation requested, edits are held back
    Allocating,
    /// Server id assigned, edits are streamed
    Allocated,
    /// Closed or errored, nothing is sent anymore
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionEvent {
    SentAllocRequest,
    IdReceived,
    PostClosed,
    FatalError,
}

impl CompositionState {
    /// State reached by applying `event`, if the transition exists.
    ///
    /// Closing is accepted before allocation too: a draft closed by the
    /// user, or one whose allocation is still in flight, halts as well.
    pub fn next(self, event: CompositionEvent) -> Option<Self> {
        use CompositionEvent::*;
        use CompositionState::*;
        match (self, event) {
            (_, FatalError) => Some(Halted),
            (Draft, SentAllocRequest) => Some(Allocating),
            (Allocating, IdReceived) => Some(Allocated),
            (Draft | Allocating | Allocated, PostClosed) => Some(Halted),
            _ => None,
        }
    }

    /// Whether local edits may be diffed and sent in this state.
    pub fn accepts_edits(self) -> bool {
        matches!(self, Self::Draft | Self::Allocated)
    }
}

/// State machine of a single composition session.
#[derive(Debug)]
pub struct PostStateMachine {
    tx: watch::Sender<CompositionState>,
}

impl PostStateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CompositionState::Draft);
        Self { tx }
    }

    pub fn state(&self) -> CompositionState {
        *self.tx.borrow()
    }

    /// Apply an event, returning the new state.
    pub fn feed(&self, event: CompositionEvent) -> Result<CompositionState, ComposeError> {
        let from = self.state();
        let to = from
            .next(event)
            .ok_or(ComposeError::InvalidTransition { from, event })?;
        if to != from {
            log::debug!("Composition {from:?} -> {to:?} on {event:?}");
            self.tx.send_replace(to);
        }
        Ok(to)
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<CompositionState> {
        self.tx.subscribe()
    }
}

impl Default for PostStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CompositionEvent::*;
    use CompositionState::*;

    #[test]
    fn test_happy_path() {
        let sm = PostStateMachine::new();
        assert_eq!(sm.state(), Draft);
        assert_eq!(sm.feed(SentAllocRequest).unwrap(), Allocating);
        assert_eq!(sm.feed(IdReceived).unwrap(), Allocated);
        assert_eq!(sm.feed(PostClosed).unwrap(), Halted);
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = PostStateMachine::new();
        assert!(matches!(
            sm.feed(IdReceived),
            Err(ComposeError::InvalidTransition {
                from: Draft,
                event: IdReceived
            })
        ));
        sm.feed(SentAllocRequest).unwrap();
        assert!(sm.feed(SentAllocRequest).is_err());
        assert_eq!(sm.state(), Allocating);
    }

    #[test]
    fn test_halted_is_terminal() {
        let sm = PostStateMachine::new();
        sm.feed(FatalError).unwrap();
        for event in [SentAllocRequest, IdReceived, PostClosed] {
            assert!(sm.feed(event).is_err());
        }
        assert_eq!(sm.feed(FatalError).unwrap(), Halted);
    }

    #[test]
    fn test_fatal_from_every_state() {
        for state in [Draft, Allocating, Allocated, Halted] {
            assert_eq!(state.next(FatalError), Some(Halted));
        }
    }

    #[test]
    fn test_edit_gating() {
        assert!(Draft.accepts_edits());
        assert!(Allocated.accepts_edits());
        assert!(!Allocating.accepts_edits());
        assert!(!Halted.accepts_edits());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let sm = PostStateMachine::new();
        let mut rx = sm.subscribe();
        sm.feed(SentAllocRequest).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Allocating);
    }
}
