//! Object kinds, canonical framing, and content addressing.
//!
//! Every object is identified by the hash of `"<kind> <size>\0"` followed by
//! its payload. The same framing is used for loose objects on disk, which
//! makes `compute_id` the single source of truth for identity.

use std::fmt;

use sha1::Digest;

use super::object_id::{ObjectFormat, ObjectId};

/// The four storable object kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// All kinds, in pack type-code order.
    pub const ALL: [ObjectKind; 4] = [Self::Commit, Self::Tree, Self::Blob, Self::Tag];

    /// Name used in object headers (`commit`, `tree`, `blob`, `tag`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Parses a header kind name.
    #[must_use]
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"commit" => Some(Self::Commit),
            b"tree" => Some(Self::Tree),
            b"blob" => Some(Self::Blob),
            b"tag" => Some(Self::Tag),
            _ => None,
        }
    }

    /// 3-bit pack entry type code.
    #[must_use]
    pub const fn pack_code(self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Maps a pack type code back to a kind (delta codes return `None`).
    #[must_use]
    pub const fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully materialized object.
#[derive(Clone, PartialEq, Eq)]
pub struct Object {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

impl Object {
    #[must_use]
    pub fn new(kind: ObjectKind, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Payload size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Computes this object's canonical id.
    #[must_use]
    pub fn id(&self, format: ObjectFormat) -> ObjectId {
        compute_id(format, self.kind, &self.data)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("kind", &self.kind)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Streaming hasher over either supported algorithm.
///
/// Used for object ids as well as pack, idx and commit-graph trailers.
#[derive(Clone)]
pub enum ObjectHasher {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl ObjectHasher {
    #[must_use]
    pub fn new(format: ObjectFormat) -> Self {
        match format {
            ObjectFormat::Sha1 => Self::Sha1(sha1::Sha1::new()),
            ObjectFormat::Sha256 => Self::Sha256(sha2::Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    #[must_use]
    pub fn finish(self) -> ObjectId {
        match self {
            Self::Sha1(h) => {
                let out: [u8; 20] = h.finalize().into();
                ObjectId::sha1(out)
            }
            Self::Sha256(h) => {
                let out: [u8; 32] = h.finalize().into();
                ObjectId::sha256(out)
            }
        }
    }
}

/// Writes the canonical `"<kind> <size>\0"` header into `out`.
pub fn write_header(kind: ObjectKind, size: u64, out: &mut Vec<u8>) {
    out.extend_from_slice(kind.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(size.to_string().as_bytes());
    out.push(0);
}

/// Hashes `data` framed as an object of `kind`.
#[must_use]
pub fn compute_id(format: ObjectFormat, kind: ObjectKind, data: &[u8]) -> ObjectId {
    let mut header = Vec::with_capacity(32);
    write_header(kind, data.len() as u64, &mut header);
    let mut hasher = ObjectHasher::new(format);
    hasher.update(&header);
    hasher.update(data);
    hasher.finish()
}

/// Hashes an arbitrary byte run (trailer checksums).
#[must_use]
pub fn checksum(format: ObjectFormat, data: &[u8]) -> ObjectId {
    let mut hasher = ObjectHasher::new(format);
    hasher.update(data);
    hasher.finish()
}
