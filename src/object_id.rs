//! Object identifiers for SHA-1 and SHA-256 repositories.
//!
//! `ObjectId` is a fixed-size, zero-heap container for either hash width.
//! The width travels with the value so raw slices can be parsed without
//! knowing the repository format in advance.
//!
//! # Ordering Semantics
//! - `ObjectId` compares lexicographically on the truncated slice
//!   (`bytes[0..len]`), which matches the sort order of pack indexes and
//!   commit-graph lookup tables.
//! - A SHA-1 id that is a prefix of a SHA-256 id sorts before it. Mixing
//!   widths inside one repository is a caller bug.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Hash algorithm in use for a repository.
///
/// The discriminants match the `hash version` byte of commit-graph headers.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectFormat {
    /// SHA-1 object IDs (20 bytes).
    #[default]
    Sha1 = 1,
    /// SHA-256 object IDs (32 bytes).
    Sha256 = 2,
}

impl ObjectFormat {
    /// Returns the byte length for ids in this format.
    #[inline]
    #[must_use]
    pub const fn oid_len(self) -> u8 {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Returns the hex string length for ids in this format.
    #[inline]
    #[must_use]
    pub const fn hex_len(self) -> u8 {
        self.oid_len() * 2
    }

    /// Commit-graph `hash version` byte for this format.
    #[must_use]
    pub const fn hash_version(self) -> u8 {
        match self {
            Self::Sha1 => 1,
            Self::Sha256 => 2,
        }
    }

    /// Maps a commit-graph `hash version` byte to a format.
    #[must_use]
    pub const fn from_hash_version(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Sha1),
            2 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Maps a raw id length to a format.
    #[must_use]
    pub const fn from_oid_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// Error returned when parsing a hex object id.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseObjectIdError {
    /// Input is neither 40 nor 64 characters long.
    BadLength(usize),
    /// Input contains a non-hex character.
    BadHex,
}

impl fmt::Display for ParseObjectIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLength(n) => write!(f, "object id must be 40 or 64 hex chars, got {n}"),
            Self::BadHex => write!(f, "object id contains non-hex characters"),
        }
    }
}

impl std::error::Error for ParseObjectIdError {}

/// Fixed-size storage for a SHA-1 or SHA-256 object id.
///
/// # Invariants
/// - `len` is always 20 or 32
/// - Only `bytes[0..len]` contains valid data
/// - `bytes[len..32]` is always zero-padded
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ObjectId {
    len: u8,
    bytes: [u8; 32],
}

impl ObjectId {
    /// Maximum id length (SHA-256).
    pub const MAX_LEN: u8 = 32;
    /// SHA-1 id length.
    pub const SHA1_LEN: u8 = 20;
    /// SHA-256 id length.
    pub const SHA256_LEN: u8 = 32;

    /// Creates a SHA-1 id.
    #[inline]
    #[must_use]
    pub fn sha1(bytes: [u8; 20]) -> Self {
        let mut storage = [0u8; 32];
        storage[..20].copy_from_slice(&bytes);
        Self {
            len: 20,
            bytes: storage,
        }
    }

    /// Creates a SHA-256 id.
    #[inline]
    #[must_use]
    pub fn sha256(bytes: [u8; 32]) -> Self {
        Self { len: 32, bytes }
    }

    /// Returns the all-zero id for `format`.
    #[must_use]
    pub fn null(format: ObjectFormat) -> Self {
        Self {
            len: format.oid_len(),
            bytes: [0u8; 32],
        }
    }

    /// Creates an id from a slice, returning `None` for invalid lengths.
    #[must_use]
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            20 | 32 => {
                let mut storage = [0u8; 32];
                storage[..bytes.len()].copy_from_slice(bytes);
                Some(Self {
                    len: bytes.len() as u8,
                    bytes: storage,
                })
            }
            _ => None,
        }
    }

    /// Parses a 40 or 64 character hex string (either case).
    pub fn from_hex(s: &[u8]) -> Result<Self, ParseObjectIdError> {
        let len = match s.len() {
            40 => 20,
            64 => 32,
            n => return Err(ParseObjectIdError::BadLength(n)),
        };
        let mut storage = [0u8; 32];
        hex::decode_to_slice(s, &mut storage[..len]).map_err(|_| ParseObjectIdError::BadHex)?;
        Ok(Self {
            len: len as u8,
            bytes: storage,
        })
    }

    /// Returns the id bytes (20 or 32 of them).
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        debug_assert!(
            self.len == Self::SHA1_LEN || self.len == Self::SHA256_LEN,
            "invalid oid len: {}",
            self.len
        );
        &self.bytes[..self.len as usize]
    }

    /// Returns the length of the id (20 or 32).
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u8 {
        self.len
    }

    /// Always `false` for valid ids; present for slice-like symmetry.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the hash format implied by the id width.
    #[inline]
    #[must_use]
    pub const fn format(&self) -> ObjectFormat {
        if self.len == 20 {
            ObjectFormat::Sha1
        } else {
            ObjectFormat::Sha256
        }
    }

    /// Returns true if every byte is zero.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.as_slice().iter().all(|&b| b == 0)
    }

    /// First byte, used as the fanout bucket in pack and graph indexes.
    #[inline]
    #[must_use]
    pub const fn first_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_slice())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::null(ObjectFormat::Sha1)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_slice() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s.as_bytes())
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ObjectId {}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = ObjectId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 40 or 64 character hex object id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ObjectId, E> {
                ObjectId::from_hex(v.as_bytes()).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}
