//! Text protocol shared by client and server.
//!
//! Wire format (one WebSocket text frame per message):
//! ```text
//! ┌──────────┬──────────────────────────┐
//! │ msg_type │ payload                  │
//! │ 2 digits │ JSON, absent if no body  │
//! └──────────┴──────────────────────────┘
//! ```
//!
//! `concat` frames carry a JSON array of complete frames, dispatched in
//! order. Payload schemas differ per direction, so requests the client
//! sends are [`ClientMessage`]s and everything the server pushes is a
//! [`ServerMessage`].

use liveboard_core::{Command, Image, Link, ModerationEntry, Post};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message types of the protocol. Values are shared with the server and
/// must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Fatal error, payload is the reason
    Invalid = 0,

    // 1 - 29 modify post model state
    InsertPost = 1,
    Append = 2,
    Backspace = 3,
    Splice = 4,
    ClosePost = 5,
    InsertImage = 6,
    Spoiler = 7,
    ModeratePost = 8,

    // >= 30 are miscellaneous and do not write to post models
    Synchronise = 30,
    Reclaim = 31,
    /// One-shot response carrying a newly allocated post id
    PostId = 32,
    /// Several frames batched into one
    Concat = 33,
    Noop = 34,
    SyncCount = 35,
    ServerTime = 36,
    Redirect = 37,
    Notification = 38,
    Captcha = 39,
    MeguTv = 40,
    Configs = 41,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use MessageType::*;
        Some(match value {
            0 => Invalid,
            1 => InsertPost,
            2 => Append,
            3 => Backspace,
            4 => Splice,
            5 => ClosePost,
            6 => InsertImage,
            7 => Spoiler,
            8 => ModeratePost,
            30 => Synchronise,
            31 => Reclaim,
            32 => PostId,
            33 => Concat,
            34 => Noop,
            35 => SyncCount,
            36 => ServerTime,
            37 => Redirect,
            38 => Notification,
            39 => Captcha,
            40 => MeguTv,
            41 => Configs,
            _ => return None,
        })
    }

    /// Whether messages of this type mutate a post model.
    pub fn is_post_update(self) -> bool {
        (1..30).contains(&(self as u8))
    }
}

/// Metadata of a finished upload, as returned by the upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileData {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub spoiler: bool,
}

/// First message of every connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRequest {
    pub board: String,
    pub thread: u64,
}

/// Post allocation request. One request may carry both the initial body
/// and an image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocRequest {
    pub open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AllocRequest {
    pub fn new() -> Self {
        Self {
            open: true,
            body: None,
            image: None,
            name: None,
        }
    }
}

impl Default for AllocRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace `len` code points starting at `start` with `text`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpliceRequest {
    pub start: usize,
    pub len: usize,
    pub text: String,
}

/// Splice applied to post `id`, as broadcast by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpliceMessage {
    pub id: u64,
    #[serde(flatten)]
    pub splice: SpliceRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloseMessage {
    pub id: u64,
    #[serde(default)]
    pub links: Option<Vec<Link>>,
    #[serde(default)]
    pub commands: Option<Vec<Command>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageMessage {
    pub id: u64,
    #[serde(flatten)]
    pub image: Image,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationMessage {
    pub id: u64,
    #[serde(flatten)]
    pub entry: ModerationEntry,
}

/// Connected client counters for the current thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCount {
    pub active: u64,
    pub total: u64,
}

/// Requests sent by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Synchronise(SyncRequest),
    InsertPost(AllocRequest),
    /// Code point appended to the open post
    Append(u32),
    Backspace,
    Splice(SpliceRequest),
    ClosePost,
    InsertImage(FileData),
    Spoiler,
    Noop,
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Synchronise(_) => MessageType::Synchronise,
            Self::InsertPost(_) => MessageType::InsertPost,
            Self::Append(_) => MessageType::Append,
            Self::Backspace => MessageType::Backspace,
            Self::Splice(_) => MessageType::Splice,
            Self::ClosePost => MessageType::ClosePost,
            Self::InsertImage(_) => MessageType::InsertImage,
            Self::Spoiler => MessageType::Spoiler,
            Self::Noop => MessageType::Noop,
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let typ = self.message_type();
        match self {
            Self::Synchronise(req) => frame(typ, req),
            Self::InsertPost(req) => frame(typ, req),
            Self::Append(code) => frame(typ, code),
            Self::Splice(req) => frame(typ, req),
            Self::InsertImage(file) => frame(typ, file),
            Self::Backspace | Self::ClosePost | Self::Spoiler | Self::Noop => Ok(bare(typ)),
        }
    }

    /// Parse a text frame sent by a client.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let (typ, data) = split_header(frame)?;
        Ok(match typ {
            MessageType::Synchronise => Self::Synchronise(payload(data)?),
            MessageType::InsertPost => Self::InsertPost(payload(data)?),
            MessageType::Append => Self::Append(payload(data)?),
            MessageType::Backspace => Self::Backspace,
            MessageType::Splice => Self::Splice(payload(data)?),
            MessageType::ClosePost => Self::ClosePost,
            MessageType::InsertImage => Self::InsertImage(payload(data)?),
            MessageType::Spoiler => Self::Spoiler,
            MessageType::Noop => Self::Noop,
            other => return Err(ProtocolError::Unsupported(other)),
        })
    }
}

/// Messages pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Invalid(String),
    InsertPost(Post),
    Append { id: u64, code: u32 },
    Backspace(u64),
    Splice(SpliceMessage),
    ClosePost(CloseMessage),
    InsertImage(ImageMessage),
    Spoiler(u64),
    ModeratePost(ModerationMessage),
    /// Thread synchronisation state, consumed by the page layer
    Synchronise(serde_json::Value),
    PostId(u64),
    Concat(Vec<String>),
    Noop,
    SyncCount(SyncCount),
    /// Server Unix time in seconds
    ServerTime(i64),
    Redirect(String),
    Notification(String),
    Captcha,
    /// Server and board configuration, consumed by the page layer
    Configs(serde_json::Value),
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Invalid(_) => MessageType::Invalid,
            Self::InsertPost(_) => MessageType::InsertPost,
            Self::Append { .. } => MessageType::Append,
            Self::Backspace(_) => MessageType::Backspace,
            Self::Splice(_) => MessageType::Splice,
            Self::ClosePost(_) => MessageType::ClosePost,
            Self::InsertImage(_) => MessageType::InsertImage,
            Self::Spoiler(_) => MessageType::Spoiler,
            Self::ModeratePost(_) => MessageType::ModeratePost,
            Self::Synchronise(_) => MessageType::Synchronise,
            Self::PostId(_) => MessageType::PostId,
            Self::Concat(_) => MessageType::Concat,
            Self::Noop => MessageType::Noop,
            Self::SyncCount(_) => MessageType::SyncCount,
            Self::ServerTime(_) => MessageType::ServerTime,
            Self::Redirect(_) => MessageType::Redirect,
            Self::Notification(_) => MessageType::Notification,
            Self::Captcha => MessageType::Captcha,
            Self::Configs(_) => MessageType::Configs,
        }
    }

    /// Id of the post this message targets, if any.
    pub fn target(&self) -> Option<u64> {
        match self {
            Self::InsertPost(post) => Some(post.id),
            Self::Append { id, .. } | Self::Backspace(id) | Self::Spoiler(id) => Some(*id),
            Self::Splice(msg) => Some(msg.id),
            Self::ClosePost(msg) => Some(msg.id),
            Self::InsertImage(msg) => Some(msg.id),
            Self::ModeratePost(msg) => Some(msg.id),
            _ => None,
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let typ = self.message_type();
        match self {
            Self::Invalid(reason) => frame(typ, reason),
            Self::InsertPost(post) => frame(typ, post),
            Self::Append { id, code } => frame(typ, &[*id, u64::from(*code)]),
            Self::Backspace(id) | Self::Spoiler(id) | Self::PostId(id) => frame(typ, id),
            Self::Splice(msg) => frame(typ, msg),
            Self::ClosePost(msg) => frame(typ, msg),
            Self::InsertImage(msg) => frame(typ, msg),
            Self::ModeratePost(msg) => frame(typ, msg),
            Self::Synchronise(value) | Self::Configs(value) => frame(typ, value),
            Self::Concat(frames) => frame(typ, frames),
            Self::SyncCount(count) => frame(typ, count),
            Self::ServerTime(time) => frame(typ, time),
            Self::Redirect(text) | Self::Notification(text) => frame(typ, text),
            Self::Noop | Self::Captcha => Ok(bare(typ)),
        }
    }

    /// Parse a text frame sent by the server.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let (typ, data) = split_header(frame)?;
        Ok(match typ {
            MessageType::Invalid => Self::Invalid(payload(data)?),
            MessageType::InsertPost => Self::InsertPost(payload(data)?),
            MessageType::Append => {
                let [id, code]: [u64; 2] = payload(data)?;
                let code = u32::try_from(code)
                    .map_err(|_| ProtocolError::InvalidPayload(typ, format!("code point {code}")))?;
                Self::Append { id, code }
            }
            MessageType::Backspace => Self::Backspace(payload(data)?),
            MessageType::Splice => Self::Splice(payload(data)?),
            MessageType::ClosePost => Self::ClosePost(payload(data)?),
            MessageType::InsertImage => Self::InsertImage(payload(data)?),
            MessageType::Spoiler => Self::Spoiler(payload(data)?),
            MessageType::ModeratePost => Self::ModeratePost(payload(data)?),
            MessageType::Synchronise => Self::Synchronise(payload(data)?),
            MessageType::PostId => Self::PostId(payload(data)?),
            MessageType::Concat => Self::Concat(payload(data)?),
            MessageType::Noop => Self::Noop,
            MessageType::SyncCount => Self::SyncCount(payload(data)?),
            MessageType::ServerTime => Self::ServerTime(payload(data)?),
            MessageType::Redirect => Self::Redirect(payload(data)?),
            MessageType::Notification => Self::Notification(payload(data)?),
            MessageType::Captcha => Self::Captcha,
            MessageType::Configs => Self::Configs(payload(data)?),
            MessageType::Reclaim | MessageType::MeguTv => {
                return Err(ProtocolError::Unsupported(typ))
            }
        })
    }
}

fn bare(typ: MessageType) -> String {
    format!("{:02}", typ as u8)
}

fn frame<T: Serialize + ?Sized>(typ: MessageType, payload: &T) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(payload).map_err(ProtocolError::Encode)?;
    Ok(bare(typ) + &json)
}

/// Split a frame into its type and the raw payload after the header.
pub fn split_header(frame: &str) -> Result<(MessageType, &str), ProtocolError> {
    let header = frame
        .get(..2)
        .filter(|h| h.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| ProtocolError::InvalidHeader(frame.chars().take(16).collect()))?;
    let value: u8 = header
        .parse()
        .map_err(|_| ProtocolError::InvalidHeader(header.to_string()))?;
    let typ = MessageType::from_u8(value).ok_or(ProtocolError::UnknownMessageType(value))?;
    Ok((typ, &frame[2..]))
}

fn payload<T: DeserializeOwned>(data: &str) -> Result<T, ProtocolError> {
    serde_json::from_str(data).map_err(ProtocolError::Decode)
}

/// Protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message header: {0:?}")]
    InvalidHeader(String),
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("No payload schema for {0:?} in this direction")]
    Unsupported(MessageType),
    #[error("Invalid {0:?} payload: {1}")]
    InvalidPayload(MessageType, String),
    #[error("Serialization error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Deserialization error: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Server error: {0}")]
    Fatal(String),
    #[error("Unexpected allocation response for post {0}")]
    DuplicateAllocation(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveboard_core::ModerationAction;

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::Invalid as u8, 0);
        assert_eq!(MessageType::InsertPost as u8, 1);
        assert_eq!(MessageType::ModeratePost as u8, 8);
        assert_eq!(MessageType::Synchronise as u8, 30);
        assert_eq!(MessageType::PostId as u8, 32);
        assert_eq!(MessageType::Concat as u8, 33);
        assert_eq!(MessageType::Configs as u8, 41);
        for value in 0..=u8::MAX {
            if let Some(typ) = MessageType::from_u8(value) {
                assert_eq!(typ as u8, value);
            }
        }
        assert!(MessageType::from_u8(9).is_none());
        assert!(MessageType::from_u8(42).is_none());
    }

    #[test]
    fn test_post_update_range() {
        assert!(MessageType::Append.is_post_update());
        assert!(MessageType::ModeratePost.is_post_update());
        assert!(!MessageType::Invalid.is_post_update());
        assert!(!MessageType::PostId.is_post_update());
    }

    #[test]
    fn test_client_frames() {
        assert_eq!(ClientMessage::Append('d' as u32).encode().unwrap(), "02100");
        assert_eq!(ClientMessage::Backspace.encode().unwrap(), "03");
        assert_eq!(ClientMessage::ClosePost.encode().unwrap(), "05");
        assert_eq!(ClientMessage::Noop.encode().unwrap(), "34");

        let splice = ClientMessage::Splice(SpliceRequest {
            start: 6,
            len: 5,
            text: "there".into(),
        });
        assert_eq!(
            splice.encode().unwrap(),
            r#"04{"start":6,"len":5,"text":"there"}"#
        );
    }

    #[test]
    fn test_alloc_request_omits_absent_fields() {
        let msg = ClientMessage::InsertPost(AllocRequest::new());
        assert_eq!(msg.encode().unwrap(), r#"01{"open":true}"#);

        let msg = ClientMessage::InsertPost(AllocRequest {
            body: Some("hi".into()),
            image: Some(FileData {
                token: "abc".into(),
                name: "cat.png".into(),
                spoiler: false,
            }),
            ..AllocRequest::new()
        });
        let frame = msg.encode().unwrap();
        assert!(frame.starts_with("01"));
        assert_eq!(ClientMessage::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_server_append_is_pair() {
        let msg = ServerMessage::decode("02[42,100]").unwrap();
        assert_eq!(msg, ServerMessage::Append { id: 42, code: 100 });
        assert_eq!(msg.target(), Some(42));
        assert_eq!(msg.encode().unwrap(), "02[42,100]");
    }

    #[test]
    fn test_server_append_rejects_wide_code() {
        let err = ServerMessage::decode("02[1,4294967296]").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload(MessageType::Append, _)));
    }

    #[test]
    fn test_server_splice_is_flat() {
        let msg = ServerMessage::decode(r#"04{"id":3,"start":0,"len":2,"text":"ab"}"#).unwrap();
        match msg {
            ServerMessage::Splice(SpliceMessage { id, splice }) => {
                assert_eq!(id, 3);
                assert_eq!(splice.start, 0);
                assert_eq!(splice.len, 2);
                assert_eq!(splice.text, "ab");
            }
            other => panic!("Expected splice, got {other:?}"),
        }
    }

    #[test]
    fn test_close_with_null_links() {
        let msg = ServerMessage::decode(r#"05{"id":7,"links":null,"commands":null}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::ClosePost(CloseMessage {
                id: 7,
                links: None,
                commands: None
            })
        );
    }

    #[test]
    fn test_moderation_message() {
        let msg =
            ServerMessage::decode(r#"08{"id":4,"type":2,"length":0,"by":"admin","data":""}"#)
                .unwrap();
        match msg {
            ServerMessage::ModeratePost(m) => {
                assert_eq!(m.id, 4);
                assert_eq!(m.entry.action, ModerationAction::DeletePost);
            }
            other => panic!("Expected moderation, got {other:?}"),
        }
    }

    #[test]
    fn test_image_message() {
        let msg = ServerMessage::decode(r#"06{"id":9,"name":"cat.png","spoiler":true}"#).unwrap();
        match msg {
            ServerMessage::InsertImage(m) => {
                assert_eq!(m.id, 9);
                assert_eq!(m.image.name, "cat.png");
                assert!(m.image.spoiler);
            }
            other => panic!("Expected image, got {other:?}"),
        }
    }

    #[test]
    fn test_structural_messages() {
        assert_eq!(ServerMessage::decode("3242").unwrap(), ServerMessage::PostId(42));
        assert_eq!(ServerMessage::decode("34").unwrap(), ServerMessage::Noop);
        assert_eq!(
            ServerMessage::decode("361700000000").unwrap(),
            ServerMessage::ServerTime(1_700_000_000)
        );
        assert_eq!(
            ServerMessage::decode(r#"00"banned""#).unwrap(),
            ServerMessage::Invalid("banned".into())
        );

        let concat = ServerMessage::Concat(vec!["3242".into(), "03[42]".into()]);
        let frame = concat.encode().unwrap();
        assert_eq!(frame, r#"33["3242","03[42]"]"#);
        assert_eq!(ServerMessage::decode(&frame).unwrap(), concat);
    }

    #[test]
    fn test_unknown_and_unsupported_kinds() {
        assert!(matches!(
            ServerMessage::decode("99{}"),
            Err(ProtocolError::UnknownMessageType(99))
        ));
        assert!(matches!(
            ServerMessage::decode("31"),
            Err(ProtocolError::Unsupported(MessageType::Reclaim))
        ));
        assert!(matches!(
            ClientMessage::decode("3242"),
            Err(ProtocolError::Unsupported(MessageType::PostId))
        ));
    }

    #[test]
    fn test_invalid_headers() {
        for frame in ["", "1", "x1{}", "-1", "é"] {
            assert!(
                matches!(ServerMessage::decode(frame), Err(ProtocolError::InvalidHeader(_))),
                "frame {frame:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_decode_garbage_payload() {
        assert!(matches!(
            ServerMessage::decode("32not-a-number"),
            Err(ProtocolError::Decode(_))
        ));
    }
}
