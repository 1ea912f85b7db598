//! # liveboard-core — Post model for live forum threads
//!
//! A post is streamed to the server while it is being written, so every
//! visible post may still be `editing` and receive body updates. This crate
//! holds the post data model, the mutations incoming messages apply to it,
//! and the registry of posts currently visible in a thread.
//!
//! ## Modules
//!
//! - [`registry`] — `PostRegistry` trait and the in-memory `ThreadRegistry`
//! - [`view`] — `PostView`, read access shared by posts and draft snapshots

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod registry;
pub mod view;

pub use registry::{PostRegistry, ThreadRegistry};
pub use view::PostView;

/// Errors raised when a mutation cannot be applied to a post body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostError {
    #[error("Invalid code point: {0:#x}")]
    InvalidCodePoint(u32),
    #[error("Splice out of range: start {start}, len {len}, body has {body_len} characters")]
    SpliceOutOfRange {
        start: usize,
        len: usize,
        body_len: usize,
    },
}

/// Go-style `null` slices decode to an empty collection.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Uploaded file attached to a post.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Image {
    pub spoiler: bool,
    pub file_type: u8,
    pub thumb_type: u8,
    /// Source width, height, thumbnail width, thumbnail height
    pub dims: [u16; 4],
    pub size: u64,
    /// Duration in seconds for audio and video
    pub length: u32,
    pub md5: String,
    pub sha1: String,
    pub name: String,
}

/// Link from one post to another, produced by the server when a post closes.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Link {
    pub id: u64,
    pub op: u64,
    #[serde(default)]
    pub board: String,
}

/// Hash command result (dice, flip, ...). The value schema depends on the
/// command type and is rendered, not interpreted.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(rename = "val", default)]
    pub value: serde_json::Value,
}

/// Staff action recorded against a post.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub enum ModerationAction {
    BanPost,
    UnbanPost,
    DeletePost,
    DeleteImage,
    SpoilerImage,
    LockThread,
    DeleteBoard,
    MeidoVision,
    PurgePost,
}

impl TryFrom<u8> for ModerationAction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ModerationAction::*;
        Ok(match value {
            0 => BanPost,
            1 => UnbanPost,
            2 => DeletePost,
            3 => DeleteImage,
            4 => SpoilerImage,
            5 => LockThread,
            6 => DeleteBoard,
            7 => MeidoVision,
            8 => PurgePost,
            other => return Err(format!("unknown moderation action {other}")),
        })
    }
}

impl From<ModerationAction> for u8 {
    fn from(action: ModerationAction) -> Self {
        action as u8
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ModerationEntry {
    #[serde(rename = "type")]
    pub action: ModerationAction,
    /// Ban length in seconds, zero for other actions
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub by: String,
    #[serde(default)]
    pub data: String,
}

/// A forum post.
///
/// `id == 0` marks an unallocated draft. Once the server assigns an id it
/// never changes. Bodies are indexed in Unicode code points everywhere.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Post {
    pub id: u64,
    pub op: u64,
    pub board: String,
    pub time: i64,
    pub editing: bool,
    pub sage: bool,
    pub name: String,
    pub trip: String,
    pub body: String,
    pub image: Option<Image>,
    #[serde(deserialize_with = "null_as_default")]
    pub links: Vec<Link>,
    #[serde(deserialize_with = "null_as_default")]
    pub commands: Vec<Command>,
    #[serde(deserialize_with = "null_as_default")]
    pub moderation: Vec<ModerationEntry>,
    /// Set once the local client has rendered this post, so late server
    /// echoes of the same post are not inserted twice.
    #[serde(skip)]
    pub seen_once: bool,
}

impl Post {
    /// New open draft in thread `op` of `board`.
    pub fn draft(op: u64, board: impl Into<String>, time: i64) -> Self {
        Self {
            op,
            board: board.into(),
            time,
            editing: true,
            ..Self::default()
        }
    }

    /// Number of code points in the body.
    pub fn body_len(&self) -> usize {
        self.body.chars().count()
    }

    /// Append a single code point to the body.
    pub fn append(&mut self, code: u32) -> Result<(), PostError> {
        let c = char::from_u32(code).ok_or(PostError::InvalidCodePoint(code))?;
        self.body.push(c);
        Ok(())
    }

    /// Remove the last code point of the body, if any.
    pub fn backspace(&mut self) {
        self.body.pop();
    }

    /// Replace `len` code points starting at `start` with `text`.
    pub fn splice(&mut self, start: usize, len: usize, text: &str) -> Result<(), PostError> {
        let body_len = self.body_len();
        match start.checked_add(len) {
            Some(end) if end <= body_len => {}
            _ => {
                return Err(PostError::SpliceOutOfRange {
                    start,
                    len,
                    body_len,
                })
            }
        }

        let mut body = String::with_capacity(self.body.len() + text.len());
        body.extend(self.body.chars().take(start));
        body.push_str(text);
        body.extend(self.body.chars().skip(start + len));
        self.body = body;
        Ok(())
    }

    /// Close the post, recording any links and commands the server parsed.
    pub fn close(&mut self, links: Option<Vec<Link>>, commands: Option<Vec<Command>>) {
        if let Some(links) = links {
            self.links = links;
        }
        if let Some(commands) = commands {
            self.commands = commands;
        }
        self.editing = false;
    }

    pub fn insert_image(&mut self, image: Image) {
        self.image = Some(image);
    }

    /// Returns false, if the post has no image to spoiler.
    pub fn spoiler_image(&mut self) -> bool {
        match self.image.as_mut() {
            Some(img) => {
                img.spoiler = true;
                true
            }
            None => false,
        }
    }

    /// Record a staff action and apply its visible effect.
    pub fn apply_moderation(&mut self, entry: ModerationEntry) {
        match entry.action {
            ModerationAction::DeleteImage | ModerationAction::PurgePost => {
                self.image = None;
            }
            ModerationAction::SpoilerImage => {
                self.spoiler_image();
            }
            _ => {}
        }
        self.moderation.push(entry);
    }

    /// Whether staff deleted this post.
    pub fn is_deleted(&self) -> bool {
        self.moderation
            .iter()
            .any(|e| e.action == ModerationAction::DeletePost)
    }

    /// Merge server-provided data into a locally composed post, keeping the
    /// local thread context when the server omits it.
    pub fn extend_from(&mut self, data: Post) {
        let op = if data.op == 0 { self.op } else { data.op };
        let board = if data.board.is_empty() {
            std::mem::take(&mut self.board)
        } else {
            data.board
        };
        let seen_once = self.seen_once;
        let body = std::mem::take(&mut self.body);
        *self = Post {
            op,
            board,
            seen_once,
            // The live body is driven by body updates, not by the echo.
            body: if data.body.is_empty() { body } else { data.body },
            ..data
        };
    }
}
