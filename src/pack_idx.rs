//! Pack index (`.idx`) version 2: zero-copy reader and writer.
//!
//! # Layout
//! ```text
//! +----------------+
//! | Magic (4B)     |  0xff 't' 'O' 'c'
//! | Version (4B)   |  Big-endian 2
//! +----------------+
//! | Fanout (1024B) |  256 * u32 BE cumulative counts
//! +----------------+
//! | OID Table      |  N * oid_len bytes (sorted)
//! | CRC Table      |  N * 4 bytes
//! | Offset Table   |  N * 4 bytes (MSB=1 -> large offset index)
//! | Large Offsets  |  M * 8 bytes
//! +----------------+
//! | Pack Checksum  |  oid_len bytes
//! | Idx Checksum   |  oid_len bytes
//! +----------------+
//! ```
//!
//! # Complexity
//! - `lookup()` is O(1) fanout narrowing plus O(log n) binary search.
//! - `offset_at()` is O(1), following large-offset indirection.
//! - `find_by_offset()` builds a sorted reverse map on first use.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use super::bytes::BytesView;
use super::object::{checksum, ObjectHasher};
use super::object_id::{ObjectFormat, ObjectId};

const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const IDX_VERSION: u32 = 2;
const IDX_HEADER_SIZE: usize = 8;
const FANOUT_ENTRIES: usize = 256;
const FANOUT_SIZE: usize = FANOUT_ENTRIES * 4;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;
const MAX_IDX_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Pack index errors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdxError {
    Corrupt { detail: &'static str },
    UnsupportedVersion { version: u32 },
    TooLarge { size: u64, max: u64 },
    FormatMismatch {
        expected: ObjectFormat,
        actual_oid_len: usize,
    },
    LargeOffsetOutOfBounds { index: u32, count: u32 },
    ChecksumMismatch { expected: ObjectId, actual: ObjectId },
}

impl IdxError {
    #[inline]
    pub const fn corrupt(detail: &'static str) -> Self {
        Self::Corrupt { detail }
    }
}

impl fmt::Display for IdxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt { detail } => write!(f, "corrupt pack index: {detail}"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported pack index version: {version} (expected 2)")
            }
            Self::TooLarge { size, max } => {
                write!(f, "pack index too large: {size} bytes (max: {max})")
            }
            Self::FormatMismatch {
                expected,
                actual_oid_len,
            } => write!(
                f,
                "pack index OID length mismatch: expected {} bytes, computed {actual_oid_len}",
                expected.oid_len()
            ),
            Self::LargeOffsetOutOfBounds { index, count } => {
                write!(f, "large offset index out of bounds: {index} >= {count}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "pack index checksum mismatch: stored {expected}, computed {actual}")
            }
        }
    }
}

impl std::error::Error for IdxError {}

/// Section offsets of a validated index file.
#[derive(Debug, Clone, Copy)]
struct IdxLayout {
    format: ObjectFormat,
    object_count: u32,
    oid_table: usize,
    crc_table: usize,
    offset_table: usize,
    large_offsets: usize,
    large_offsets_end: usize,
}

impl IdxLayout {
    fn parse(data: &[u8], format: ObjectFormat) -> Result<Self, IdxError> {
        if data.len() as u64 > MAX_IDX_SIZE {
            return Err(IdxError::TooLarge {
                size: data.len() as u64,
                max: MAX_IDX_SIZE,
            });
        }
        let oid_len = format.oid_len() as usize;
        if data.len() < IDX_HEADER_SIZE + FANOUT_SIZE + 2 * oid_len {
            return Err(IdxError::corrupt("file too small"));
        }
        if data[0..4] != IDX_MAGIC {
            return Err(IdxError::corrupt("invalid magic"));
        }
        let version = be_u32(&data[4..8]);
        if version != IDX_VERSION {
            return Err(IdxError::UnsupportedVersion { version });
        }

        let fanout = &data[IDX_HEADER_SIZE..IDX_HEADER_SIZE + FANOUT_SIZE];
        let object_count = validate_fanout(fanout)?;
        let n = object_count as usize;

        let oid_table = IDX_HEADER_SIZE + FANOUT_SIZE;
        let crc_table = oid_table + n * oid_len;
        let offset_table = crc_table + n * 4;
        let large_offsets = offset_table + n * 4;
        let checksums = 2 * oid_len;

        if data.len() < large_offsets + checksums {
            let remaining = data.len() - oid_table;
            return Err(IdxError::FormatMismatch {
                expected: format,
                actual_oid_len: remaining / n.max(1),
            });
        }
        let large_offsets_end = data.len() - checksums;
        if (large_offsets_end - large_offsets) % 8 != 0 {
            return Err(IdxError::corrupt(
                "large offset table not multiple of 8 bytes",
            ));
        }

        Ok(Self {
            format,
            object_count,
            oid_table,
            crc_table,
            offset_table,
            large_offsets,
            large_offsets_end,
        })
    }
}

/// Zero-copy view over an index file.
///
/// # Invariants
/// - All table ranges lie within `data`.
/// - `object_count == fanout[255]` and fanout is non-decreasing.
#[derive(Debug, Clone, Copy)]
pub struct IdxView<'a> {
    data: &'a [u8],
    layout: IdxLayout,
}

impl<'a> IdxView<'a> {
    /// Parses and validates table layout. Checksums are not verified here;
    /// use `verify_checksum`.
    pub fn parse(data: &'a [u8], format: ObjectFormat) -> Result<Self, IdxError> {
        let layout = IdxLayout::parse(data, format)?;
        Ok(Self { data, layout })
    }

    #[inline]
    pub fn object_count(&self) -> u32 {
        self.layout.object_count
    }

    #[inline]
    pub const fn format(&self) -> ObjectFormat {
        self.layout.format
    }

    #[inline]
    fn oid_len(&self) -> usize {
        self.layout.format.oid_len() as usize
    }

    /// Upper bound (exclusive) of the bucket for `first_byte`.
    #[inline]
    pub fn fanout(&self, first_byte: u8) -> u32 {
        let off = IDX_HEADER_SIZE + first_byte as usize * 4;
        be_u32(&self.data[off..off + 4])
    }

    /// Id bytes at sorted position `idx`.
    #[inline]
    pub fn oid_bytes_at(&self, idx: u32) -> &'a [u8] {
        debug_assert!(idx < self.object_count(), "oid index out of bounds");
        let len = self.oid_len();
        let start = self.layout.oid_table + idx as usize * len;
        &self.data[start..start + len]
    }

    #[inline]
    pub fn oid_at(&self, idx: u32) -> ObjectId {
        ObjectId::try_from_slice(self.oid_bytes_at(idx)).unwrap_or_default()
    }

    /// CRC32 of the compressed entry at `idx`.
    #[inline]
    pub fn crc_at(&self, idx: u32) -> u32 {
        let start = self.layout.crc_table + idx as usize * 4;
        be_u32(&self.data[start..start + 4])
    }

    /// Pack offset of the entry at `idx`.
    pub fn offset_at(&self, idx: u32) -> Result<u64, IdxError> {
        debug_assert!(idx < self.object_count(), "offset index out of bounds");
        let start = self.layout.offset_table + idx as usize * 4;
        let raw = be_u32(&self.data[start..start + 4]);
        if raw & LARGE_OFFSET_FLAG == 0 {
            return Ok(raw as u64);
        }

        let index = raw & !LARGE_OFFSET_FLAG;
        let count = ((self.layout.large_offsets_end - self.layout.large_offsets) / 8) as u32;
        if index >= count {
            return Err(IdxError::LargeOffsetOutOfBounds { index, count });
        }
        let s = self.layout.large_offsets + index as usize * 8;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[s..s + 8]);
        Ok(u64::from_be_bytes(buf))
    }

    /// Sorted position of `oid`, if present.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        let needle = oid.as_slice();
        if needle.len() != self.oid_len() {
            return None;
        }
        let first = oid.first_byte();
        let mut lo = if first == 0 { 0 } else { self.fanout(first - 1) };
        let mut hi = self.fanout(first);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.oid_bytes_at(mid).cmp(needle) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Checksum of the pack this index describes.
    pub fn pack_checksum(&self) -> ObjectId {
        let len = self.oid_len();
        let start = self.data.len() - 2 * len;
        ObjectId::try_from_slice(&self.data[start..start + len]).unwrap_or_default()
    }

    /// Verifies the trailing index checksum.
    pub fn verify_checksum(&self) -> Result<(), IdxError> {
        let len = self.oid_len();
        let split = self.data.len() - len;
        let expected = ObjectId::try_from_slice(&self.data[split..]).unwrap_or_default();
        let actual = checksum(self.format(), &self.data[..split]);
        if expected == actual {
            Ok(())
        } else {
            Err(IdxError::ChecksumMismatch { expected, actual })
        }
    }

    /// Ids in sorted order with their positions.
    pub fn iter_oids(&self) -> impl Iterator<Item = (ObjectId, u32)> + 'a {
        let view = *self;
        (0..view.object_count()).map(move |i| (view.oid_at(i), i))
    }
}

/// Owned index over shared bytes, with a lazily built reverse map.
#[derive(Debug)]
pub struct PackIndex {
    bytes: BytesView,
    layout: IdxLayout,
    by_offset: OnceLock<Vec<(u64, u32)>>,
}

impl PackIndex {
    /// Validates layout and checksum, then takes ownership of the bytes.
    pub fn open(bytes: BytesView, format: ObjectFormat) -> Result<Self, IdxError> {
        let layout = IdxLayout::parse(bytes.as_slice(), format)?;
        let index = Self {
            bytes,
            layout,
            by_offset: OnceLock::new(),
        };
        index.view().verify_checksum()?;
        Ok(index)
    }

    #[inline]
    pub fn view(&self) -> IdxView<'_> {
        IdxView {
            data: self.bytes.as_slice(),
            layout: self.layout,
        }
    }

    #[inline]
    pub fn object_count(&self) -> u32 {
        self.layout.object_count
    }

    /// Finds `(offset, crc32)` for `oid`.
    pub fn find(&self, oid: &ObjectId) -> Result<Option<(u64, u32)>, IdxError> {
        let view = self.view();
        match view.lookup(oid) {
            Some(idx) => Ok(Some((view.offset_at(idx)?, view.crc_at(idx)))),
            None => Ok(None),
        }
    }

    /// Finds the id stored at pack `offset`.
    pub fn find_by_offset(&self, offset: u64) -> Result<Option<ObjectId>, IdxError> {
        let map = match self.by_offset.get() {
            Some(map) => map,
            None => {
                let view = self.view();
                let mut built = Vec::with_capacity(view.object_count() as usize);
                for i in 0..view.object_count() {
                    built.push((view.offset_at(i)?, i));
                }
                built.sort_unstable();
                self.by_offset.get_or_init(|| built)
            }
        };
        Ok(map
            .binary_search_by_key(&offset, |&(off, _)| off)
            .ok()
            .map(|pos| self.view().oid_at(map[pos].1)))
    }
}

/// One row of an index being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdxEntry {
    pub oid: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

/// Serializes an index for `entries` (sorted in place).
///
/// Offsets at or above 2^31 go through the large-offset table.
pub fn write_idx(
    format: ObjectFormat,
    entries: &mut [IdxEntry],
    pack_checksum: &ObjectId,
) -> Vec<u8> {
    entries.sort_unstable_by(|a, b| a.oid.cmp(&b.oid));
    let oid_len = format.oid_len() as usize;
    let n = entries.len();

    let mut out = Vec::with_capacity(IDX_HEADER_SIZE + FANOUT_SIZE + n * (oid_len + 8) + 2 * oid_len);
    out.extend_from_slice(&IDX_MAGIC);
    out.extend_from_slice(&IDX_VERSION.to_be_bytes());

    let mut counts = [0u32; FANOUT_ENTRIES];
    for e in entries.iter() {
        counts[e.oid.first_byte() as usize] += 1;
    }
    let mut running = 0u32;
    for c in counts {
        running += c;
        out.extend_from_slice(&running.to_be_bytes());
    }

    for e in entries.iter() {
        out.extend_from_slice(e.oid.as_slice());
    }
    for e in entries.iter() {
        out.extend_from_slice(&e.crc32.to_be_bytes());
    }
    let mut large: Vec<u64> = Vec::new();
    for e in entries.iter() {
        if e.offset < LARGE_OFFSET_FLAG as u64 {
            out.extend_from_slice(&(e.offset as u32).to_be_bytes());
        } else {
            let raw = LARGE_OFFSET_FLAG | large.len() as u32;
            out.extend_from_slice(&raw.to_be_bytes());
            large.push(e.offset);
        }
    }
    for off in large {
        out.extend_from_slice(&off.to_be_bytes());
    }
    out.extend_from_slice(pack_checksum.as_slice());

    let mut hasher = ObjectHasher::new(format);
    hasher.update(&out);
    out.extend_from_slice(hasher.finish().as_slice());
    out
}

fn validate_fanout(fanout: &[u8]) -> Result<u32, IdxError> {
    let mut prev = 0u32;
    for chunk in fanout.chunks_exact(4) {
        let val = be_u32(chunk);
        if val < prev {
            return Err(IdxError::corrupt("fanout not monotonic"));
        }
        prev = val;
    }
    Ok(prev)
}

#[inline]
fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}
