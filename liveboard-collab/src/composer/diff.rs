//! Input diffing.
//!
//! Turns the change between the last committed body and the current input
//! into the cheapest wire edit. All positions count Unicode code points, so
//! multi-byte characters are never split.

use crate::protocol::{ClientMessage, SpliceRequest};

/// Minimal edit turning one body into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    /// Single character added at the end
    Append(char),
    /// Last character removed
    Backspace,
    /// `len` characters at `start` replaced with `text`
    Splice {
        start: usize,
        len: usize,
        text: String,
    },
}

impl EditOp {
    /// Apply the edit to `old`.
    pub fn apply(&self, old: &str) -> String {
        match self {
            Self::Append(c) => {
                let mut s = old.to_string();
                s.push(*c);
                s
            }
            Self::Backspace => {
                let mut s = old.to_string();
                s.pop();
                s
            }
            Self::Splice { start, len, text } => {
                let mut s: String = old.chars().take(*start).collect();
                s.push_str(text);
                s.extend(old.chars().skip(start + len));
                s
            }
        }
    }

    pub fn into_message(self) -> ClientMessage {
        match self {
            Self::Append(c) => ClientMessage::Append(c as u32),
            Self::Backspace => ClientMessage::Backspace,
            Self::Splice { start, len, text } => {
                ClientMessage::Splice(SpliceRequest { start, len, text })
            }
        }
    }
}

/// Compute the edit turning `old` into `new`. Returns `None`, if they are
/// equal.
pub fn compute_edit(old: &str, new: &str) -> Option<EditOp> {
    if old == new {
        return None;
    }

    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();

    if new.len() == old.len() + 1 && new.starts_with(&old) {
        return new.last().map(|c| EditOp::Append(*c));
    }
    if old.len() == new.len() + 1 && old.starts_with(&new) {
        return Some(EditOp::Backspace);
    }

    let start = common_prefix(old.iter(), new.iter());
    let till = common_prefix(old[start..].iter().rev(), new[start..].iter().rev());
    Some(EditOp::Splice {
        start,
        len: old.len() - till - start,
        text: new[start..new.len() - till].iter().collect(),
    })
}

fn common_prefix<'a>(
    a: impl Iterator<Item = &'a char>,
    b: impl Iterator<Item = &'a char>,
) -> usize {
    a.zip(b).take_while(|(x, y)| x == y).count()
}

/// Input after applying the length and line policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimmedInput {
    pub text: String,
    /// Code points cut off the end. The input control should drop as many.
    pub excess: usize,
}

/// Cut `val` down to `max_len` code points and `max_lines` lines, dropping
/// trailing content.
pub fn trim_input(val: &str, max_len: usize, max_lines: usize) -> TrimmedInput {
    let len = val.chars().count();
    let mut excess = 0;
    let mut text = if len > max_len {
        excess = len - max_len;
        val.chars().take(max_len).collect()
    } else {
        val.to_string()
    };

    if max_lines > 0 {
        if let Some((idx, _)) = text.match_indices('\n').nth(max_lines - 1) {
            excess += text[idx..].chars().count();
            text.truncate(idx);
        }
    }

    TrimmedInput { text, excess }
}
