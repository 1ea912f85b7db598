//! Read-only post access for the rendering layer.

use crate::{Image, Post};

/// Post-like read access, implemented by plain posts and by the composer's
/// draft snapshots so a renderer can treat both the same way.
pub trait PostView {
    fn id(&self) -> u64;
    fn op(&self) -> u64;
    fn body(&self) -> &str;
    fn image(&self) -> Option<&Image>;
    fn is_editing(&self) -> bool;

    /// Not yet allocated by the server.
    fn is_draft(&self) -> bool {
        self.id() == 0
    }
}

impl PostView for Post {
    fn id(&self) -> u64 {
        self.id
    }

    fn op(&self) -> u64 {
        self.op
    }

    fn body(&self) -> &str {
        &self.body
    }

    fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    fn is_editing(&self) -> bool {
        self.editing
    }
}
