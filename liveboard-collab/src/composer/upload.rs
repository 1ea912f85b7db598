//! Image attachment coordinator.
//!
//! Uploads finish asynchronously and may race the post allocation:
//!
//! | State at completion | Action                                          |
//! |---------------------|-------------------------------------------------|
//! | draft               | allocate the post with body and image together  |
//! | allocating          | wait for the allocation, then decide again      |
//! | allocated           | send a standalone `insertImage`                 |
//! | halted              | drop the result                                 |
//!
//! The `allocating_image` guard makes sure at most one image message is
//! ever sent per session.

use std::future::Future;

use tokio::time::timeout;

use super::state::CompositionState;
use super::{ComposeError, PostComposer};
use crate::protocol::{ClientMessage, FileData};

/// What became of an upload completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Upload failed or was cancelled
    Discarded,
    /// The session already has an image or one is being attached
    Ignored,
    /// Sent along with the allocation request
    SentWithAllocation,
    /// Sent as a standalone `insertImage`
    Attached,
    /// The session halted before the image could be attached
    Abandoned,
}

impl PostComposer {
    /// Handle an upload completion. `None` means the upload failed or was
    /// cancelled.
    ///
    /// While an allocation is in flight this waits for the state to change,
    /// re-checking at least every `alloc_retry_interval`, and stops once the
    /// session halts.
    pub async fn submit_upload(
        &self,
        completion: Option<FileData>,
    ) -> Result<UploadOutcome, ComposeError> {
        let Some(file) = completion else {
            log::debug!("Upload failed or cancelled, nothing to attach");
            return Ok(UploadOutcome::Discarded);
        };

        let mut states = self.subscribe();
        loop {
            {
                let mut session = self.lock();
                if session.has_image || session.allocating_image {
                    return Ok(UploadOutcome::Ignored);
                }
                match self.state() {
                    // The guard is raised only once the image has left
                    CompositionState::Draft => {
                        let body = session.live_input.clone();
                        self.request_alloc(&mut session, body, Some(file))?;
                        session.allocating_image = true;
                        return Ok(UploadOutcome::SentWithAllocation);
                    }
                    CompositionState::Allocated => {
                        self.send(&ClientMessage::InsertImage(file))?;
                        session.allocating_image = true;
                        return Ok(UploadOutcome::Attached);
                    }
                    CompositionState::Halted => return Ok(UploadOutcome::Abandoned),
                    CompositionState::Allocating => {}
                }
            }

            let interval = self.config().alloc_retry_interval;
            if let Ok(Err(_)) = timeout(interval, states.changed()).await {
                // State machine gone with the session
                return Ok(UploadOutcome::Abandoned);
            }
        }
    }

    /// Retry a failed or cancelled upload. `retry` performs the upload
    /// again; its result goes through the same decision as a first upload.
    pub async fn retry_upload<F>(&self, retry: F) -> Result<UploadOutcome, ComposeError>
    where
        F: Future<Output = Option<FileData>>,
    {
        self.lock().allocating_image = false;
        let completion = retry.await;
        self.submit_upload(completion).await
    }
}
