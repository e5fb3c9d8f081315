//! Error types for the object store and history layers.
//!
//! Codec errors (`PackParseError`, `DeltaError`, `IdxError`,
//! `CommitGraphError`, `CommitParseError`) live next to their parsers.
//! `OdbError` is the taxonomy callers match on: it wraps codec failures
//! with the pack path, offset, or chunk that produced them.
//!
//! All enums are `#[non_exhaustive]`; callers should include a fallback
//! match arm.
//!
//! # Recovery Classes
//! - `NotFound` is recoverable; callers decide whether to fall back.
//! - `CorruptDeltaChain`, `ChecksumMismatch`, `MalformedCommitGraph` mark
//!   the affected file unusable, not the process.
//! - `IntegrityMismatch` is always fatal for the object involved.

use std::fmt;
use std::io;
use std::path::PathBuf;

use super::commit_graph::CommitGraphError;
use super::commit_parse::CommitParseError;
use super::object::ObjectKind;
use super::object_id::{ObjectFormat, ObjectId};
use super::pack_delta::DeltaError;
use super::pack_idx::IdxError;
use super::pack_inflate::{InflateError, PackParseError};

/// Failure while decoding one pack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PackEntryError {
    Parse(PackParseError),
    Inflate(InflateError),
    Delta(DeltaError),
}

impl fmt::Display for PackEntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "{err}"),
            Self::Inflate(err) => write!(f, "{err}"),
            Self::Delta(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PackEntryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Inflate(err) => Some(err),
            Self::Delta(err) => Some(err),
        }
    }
}

impl From<PackParseError> for PackEntryError {
    fn from(err: PackParseError) -> Self {
        Self::Parse(err)
    }
}

impl From<InflateError> for PackEntryError {
    fn from(err: InflateError) -> Self {
        Self::Inflate(err)
    }
}

impl From<DeltaError> for PackEntryError {
    fn from(err: DeltaError) -> Self {
        Self::Delta(err)
    }
}

/// Which file a checksum belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumTarget {
    Pack,
    Index,
    CommitGraph,
}

impl fmt::Display for ChecksumTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pack => "pack",
            Self::Index => "pack index",
            Self::CommitGraph => "commit-graph",
        })
    }
}

/// Object store and traversal errors.
#[derive(Debug)]
#[non_exhaustive]
pub enum OdbError {
    /// No provider holds the object.
    NotFound { oid: ObjectId },
    /// A delta chain is longer than the configured bound or loops.
    CorruptDeltaChain {
        pack: PathBuf,
        offset: u64,
        depth: usize,
    },
    /// A trailer checksum does not match the file contents.
    ChecksumMismatch {
        target: ChecksumTarget,
        path: PathBuf,
        expected: ObjectId,
        actual: ObjectId,
    },
    /// A commit-graph file is structurally invalid.
    MalformedCommitGraph {
        path: PathBuf,
        source: CommitGraphError,
    },
    /// Decoded content does not hash to its claimed id.
    IntegrityMismatch { expected: ObjectId, actual: ObjectId },
    /// A pack entry could not be decoded.
    Pack {
        pack: PathBuf,
        offset: u64,
        source: PackEntryError,
    },
    /// A pack index could not be read.
    Idx { path: PathBuf, source: IdxError },
    /// A loose object file is malformed.
    CorruptLooseObject { oid: ObjectId, detail: &'static str },
    /// A commit object could not be parsed.
    Commit {
        oid: ObjectId,
        source: CommitParseError,
    },
    /// The object exists but has a different kind than requested.
    UnexpectedKind {
        oid: ObjectId,
        expected: ObjectKind,
        actual: ObjectKind,
    },
    /// An id of the wrong width was presented to this store.
    FormatMismatch {
        expected: ObjectFormat,
        actual: ObjectFormat,
    },
    /// An object exceeds the configured size limit.
    TooLarge { oid: ObjectId, size: u64, max: usize },
    /// Runtime-loaded limits failed validation.
    InvalidLimits { detail: &'static str },
    Io(io::Error),
}

impl OdbError {
    #[inline]
    pub fn not_found(oid: ObjectId) -> Self {
        Self::NotFound { oid }
    }

    /// True for `NotFound`.
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for OdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { oid } => write!(f, "object {oid} not found"),
            Self::CorruptDeltaChain {
                pack,
                offset,
                depth,
            } => write!(
                f,
                "corrupt delta chain in {} at offset {offset} (depth {depth})",
                pack.display()
            ),
            Self::ChecksumMismatch {
                target,
                path,
                expected,
                actual,
            } => write!(
                f,
                "{target} checksum mismatch in {}: stored {expected}, computed {actual}",
                path.display()
            ),
            Self::MalformedCommitGraph { path, source } => {
                write!(f, "malformed commit-graph {}: {source}", path.display())
            }
            Self::IntegrityMismatch { expected, actual } => {
                write!(f, "object content hashes to {actual}, expected {expected}")
            }
            Self::Pack {
                pack,
                offset,
                source,
            } => write!(
                f,
                "pack {} entry at offset {offset}: {source}",
                pack.display()
            ),
            Self::Idx { path, source } => write!(f, "{}: {source}", path.display()),
            Self::CorruptLooseObject { oid, detail } => {
                write!(f, "corrupt loose object {oid}: {detail}")
            }
            Self::Commit { oid, source } => write!(f, "commit {oid}: {source}"),
            Self::UnexpectedKind {
                oid,
                expected,
                actual,
            } => write!(f, "object {oid} is a {actual}, expected {expected}"),
            Self::FormatMismatch { expected, actual } => {
                write!(f, "object format mismatch: store uses {expected:?}, got {actual:?}")
            }
            Self::TooLarge { oid, size, max } => {
                write!(f, "object {oid} too large: {size} bytes (max: {max})")
            }
            Self::InvalidLimits { detail } => write!(f, "invalid store limits: {detail}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for OdbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedCommitGraph { source, .. } => Some(source),
            Self::Pack { source, .. } => Some(source),
            Self::Idx { source, .. } => Some(source),
            Self::Commit { source, .. } => Some(source),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for OdbError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from repository discovery.
#[derive(Debug)]
#[non_exhaustive]
pub enum RepoOpenError {
    Io(io::Error),
    Canonicalization(io::Error),
    /// Not a Git repository (no .git dir/file, not bare).
    NotARepository,
    /// The .git file is malformed (bad gitdir pointer).
    MalformedGitdirFile,
    GitdirTargetNotDir,
    MalformedCommondirFile,
    CommonDirNotDir,
    ObjectsDirNotDir,
    AlternateNotDir,
    FileTooLarge { size: u64, limit: u32 },
    /// Runtime-loaded options failed validation.
    InvalidLimits { detail: &'static str },
    /// The object store could not be opened.
    Store(OdbError),
}

impl fmt::Display for RepoOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Canonicalization(err) => write!(f, "path canonicalization failed: {err}"),
            Self::NotARepository => write!(f, "not a Git repository"),
            Self::MalformedGitdirFile => {
                write!(f, "malformed .git file (expected 'gitdir: <path>')")
            }
            Self::GitdirTargetNotDir => write!(f, "gitdir target is not a directory"),
            Self::MalformedCommondirFile => write!(f, "malformed commondir file"),
            Self::CommonDirNotDir => write!(f, "common directory is not a directory"),
            Self::ObjectsDirNotDir => write!(f, "objects directory is not a directory"),
            Self::AlternateNotDir => write!(f, "alternate object directory is not a directory"),
            Self::FileTooLarge { size, limit } => {
                write!(f, "file too large: {size} bytes (limit: {limit})")
            }
            Self::InvalidLimits { detail } => write!(f, "invalid repository options: {detail}"),
            Self::Store(err) => write!(f, "object store: {err}"),
        }
    }
}

impl std::error::Error for RepoOpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) | Self::Canonicalization(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<OdbError> for RepoOpenError {
    fn from(err: OdbError) -> Self {
        Self::Store(err)
    }
}
