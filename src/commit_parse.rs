//! Commit object header parsing and encoding.
//!
//! Extracts the fields traversal needs (tree, parents, author and committer
//! timestamps) without touching the message body.
//!
//! # Commit Object Format
//! ```text
//! tree <hex-oid>\n
//! parent <hex-oid>\n   (zero or more)
//! author <name> <email> <timestamp> <tz>\n
//! committer <name> <email> <timestamp> <tz>\n
//! [other headers]\n
//! \n
//! <message>
//! ```
//!
//! # Parsing Assumptions
//! - `tree`, `parent`*, `author`, `committer` appear in that order.
//! - Identity lines end with `"<timestamp> <timezone>"`; the timestamp is
//!   found by scanning back from the end so names and emails may contain
//!   spaces.
//! - Headers after `committer` (`gpgsig`, `mergetag`, `encoding`) and the
//!   message are not parsed.

use std::fmt;

use memchr::memchr;

use super::limits::CommitParseLimits;
use super::object_id::{ObjectFormat, ObjectId};

/// Commit parsing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommitParseError {
    Corrupt { detail: &'static str },
    TooLarge { size: usize, max: usize },
    TooManyParents { count: usize, max: usize },
    InvalidHex,
    InvalidTimestamp { detail: &'static str },
}

impl CommitParseError {
    #[inline]
    pub const fn corrupt(detail: &'static str) -> Self {
        Self::Corrupt { detail }
    }
}

impl fmt::Display for CommitParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt { detail } => write!(f, "corrupt commit: {detail}"),
            Self::TooLarge { size, max } => {
                write!(f, "commit too large: {size} bytes (max: {max})")
            }
            Self::TooManyParents { count, max } => {
                write!(f, "too many parents: {count} (max: {max})")
            }
            Self::InvalidHex => write!(f, "invalid hex object id"),
            Self::InvalidTimestamp { detail } => write!(f, "invalid timestamp: {detail}"),
        }
    }
}

impl std::error::Error for CommitParseError {}

/// Commit header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommit {
    pub tree: ObjectId,
    /// Parents in header order; the first parent defines linear history.
    pub parents: Vec<ObjectId>,
    /// Seconds since the epoch from the `author` line.
    pub author_time: i64,
    /// Seconds since the epoch from the `committer` line.
    pub committer_time: i64,
}

/// Parses commit headers.
pub fn parse_commit(
    data: &[u8],
    format: ObjectFormat,
    limits: &CommitParseLimits,
) -> Result<ParsedCommit, CommitParseError> {
    if data.len() > limits.max_commit_bytes {
        return Err(CommitParseError::TooLarge {
            size: data.len(),
            max: limits.max_commit_bytes,
        });
    }

    let hex_len = format.hex_len() as usize;
    let mut pos = 0;

    let tree = parse_oid_line(data, &mut pos, b"tree ", hex_len)?
        .ok_or(CommitParseError::corrupt("missing tree line"))?;

    let mut parents = Vec::new();
    while let Some(parent) = parse_oid_line(data, &mut pos, b"parent ", hex_len)? {
        if parents.len() >= limits.max_parents {
            return Err(CommitParseError::TooManyParents {
                count: parents.len() + 1,
                max: limits.max_parents,
            });
        }
        parents.push(parent);
    }

    let author_time = parse_identity_time(data, &mut pos, b"author ")?;
    let committer_time = parse_identity_time(data, &mut pos, b"committer ")?;

    Ok(ParsedCommit {
        tree,
        parents,
        author_time,
        committer_time,
    })
}

/// Parses `"<prefix><hex>\n"`, returning `None` if the prefix is absent.
fn parse_oid_line(
    data: &[u8],
    pos: &mut usize,
    prefix: &[u8],
    hex_len: usize,
) -> Result<Option<ObjectId>, CommitParseError> {
    if !data[*pos..].starts_with(prefix) {
        return Ok(None);
    }
    let start = *pos + prefix.len();
    let end = start + hex_len;
    if data.len() < end + 1 {
        return Err(CommitParseError::corrupt("id line too short"));
    }
    if data[end] != b'\n' {
        return Err(CommitParseError::corrupt("id line missing newline"));
    }
    let oid = ObjectId::from_hex(&data[start..end]).map_err(|_| CommitParseError::InvalidHex)?;
    *pos = end + 1;
    Ok(Some(oid))
}

/// Parses an identity line and returns its timestamp.
///
/// Format: `<prefix><name> <email> <timestamp> <timezone>\n`
fn parse_identity_time(
    data: &[u8],
    pos: &mut usize,
    prefix: &[u8],
) -> Result<i64, CommitParseError> {
    let remaining = &data[*pos..];
    if !remaining.starts_with(prefix) {
        return Err(CommitParseError::corrupt("missing identity line"));
    }
    let newline = memchr(b'\n', remaining)
        .ok_or(CommitParseError::corrupt("identity line missing newline"))?;
    let line = &remaining[..newline];
    *pos += newline + 1;

    let last_space = line
        .iter()
        .rposition(|&b| b == b' ')
        .ok_or(CommitParseError::corrupt("identity line malformed"))?;
    let ts_start = line[..last_space]
        .iter()
        .rposition(|&b| b == b' ')
        .ok_or(CommitParseError::corrupt("identity line malformed"))?
        + 1;

    parse_timestamp(&line[ts_start..last_space])
}

fn parse_timestamp(bytes: &[u8]) -> Result<i64, CommitParseError> {
    let (negative, digits) = match bytes.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return Err(CommitParseError::InvalidTimestamp {
            detail: "empty timestamp",
        });
    }
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(CommitParseError::InvalidTimestamp {
                detail: "non-digit in timestamp",
            });
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i64))
            .ok_or(CommitParseError::InvalidTimestamp {
                detail: "timestamp overflow",
            })?;
    }
    Ok(if negative { -value } else { value })
}

/// Author or committer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the epoch.
    pub time: i64,
    /// Offset from UTC in minutes.
    pub tz_offset_minutes: i32,
}

impl Signature {
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time,
            tz_offset_minutes: 0,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let sign = if self.tz_offset_minutes < 0 { '-' } else { '+' };
        let tz = self.tz_offset_minutes.unsigned_abs();
        out.extend_from_slice(
            format!(
                "{} <{}> {} {sign}{:02}{:02}",
                self.name,
                self.email,
                self.time,
                tz / 60,
                tz % 60
            )
            .as_bytes(),
        );
    }
}

/// Encodes a commit object payload.
#[must_use]
pub fn encode_commit(
    tree: &ObjectId,
    parents: &[ObjectId],
    author: &Signature,
    committer: &Signature,
    message: &str,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + parents.len() * 48 + message.len());
    out.extend_from_slice(b"tree ");
    out.extend_from_slice(tree.to_hex().as_bytes());
    out.push(b'\n');
    for parent in parents {
        out.extend_from_slice(b"parent ");
        out.extend_from_slice(parent.to_hex().as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(b"author ");
    author.write(&mut out);
    out.push(b'\n');
    out.extend_from_slice(b"committer ");
    committer.write(&mut out);
    out.push(b'\n');
    out.push(b'\n');
    out.extend_from_slice(message.as_bytes());
    out
}
