//! Pack header parsing and bounded zlib inflation.
//!
//! # Scope
//! - Parses the pack header and per-entry headers.
//! - Inflates zlib-compressed entry payloads with strict size caps.
//! - Verifies the whole-pack trailer checksum on request.
//!
//! Delta application lives in `pack_delta`; resolution of base chains lives
//! in the pack provider and stream decoder.
//!
//! # Caller Expectations
//! - Offsets passed to `entry_header_at` must point at entry headers
//!   (typically from idx offsets or a sequential walk).
//! - Size caps must be enforced before allocating outputs.

use std::cell::RefCell;
use std::fmt;

use flate2::Decompress;

use super::object::{checksum, ObjectKind};
use super::object_id::{ObjectFormat, ObjectId};

/// Pack header size: magic(4) + version(4) + object_count(4).
pub const PACK_HEADER_SIZE: usize = 12;

/// Pack entry type codes for delta entries.
pub const OBJ_OFS_DELTA: u8 = 6;
pub const OBJ_REF_DELTA: u8 = 7;

/// Maximum OFS encoding bytes (negative offset varint).
const MAX_OFS_BYTES: usize = 10; // ceil(64/7)

/// Internal inflate buffer size.
const INFLATE_BUF_SIZE: usize = 64 * 1024;

thread_local! {
    static INFLATE_DECOMPRESS: RefCell<Decompress> = RefCell::new(Decompress::new(true));
    static INFLATE_BUF: RefCell<[u8; INFLATE_BUF_SIZE]> =
        const { RefCell::new([0u8; INFLATE_BUF_SIZE]) };
}

/// Runs an inflate operation using per-thread scratch state.
///
/// The scratch state is not re-entrant on the same thread; callers must not
/// invoke inflate helpers from within an `inflate_stream` callback.
fn with_inflate_scratch<F, R>(f: F) -> R
where
    F: FnOnce(&mut Decompress, &mut [u8]) -> R,
{
    INFLATE_DECOMPRESS.with(|de| {
        INFLATE_BUF.with(|buf| {
            let mut de = de.borrow_mut();
            de.reset(true);
            let mut buf = buf.borrow_mut();
            f(&mut de, &mut *buf)
        })
    })
}

/// Parsed pack entry kind from the header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
    /// Whole object (commit, tree, blob, tag).
    Full { kind: ObjectKind },
    /// OFS_DELTA: base at a backward offset in the same pack.
    OfsDelta { base_offset: u64 },
    /// REF_DELTA: base identified by id, possibly outside the pack.
    RefDelta { base_oid: ObjectId },
}

impl EntryKind {
    #[inline]
    #[must_use]
    pub const fn is_delta(&self) -> bool {
        !matches!(self, Self::Full { .. })
    }
}

/// Pack structure errors.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum PackParseError {
    TooSmall,
    BadSignature,
    UnsupportedVersion(u32),
    OffsetOutOfRange(u64),
    HeaderTooLong,
    Truncated,
    BadObjType(u8),
    BadOfsEncoding,
    OfsUnderflow,
    /// Entries did not end exactly at the trailer.
    TrailingGarbage { consumed: usize, data_end: usize },
}

impl fmt::Display for PackParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => write!(f, "pack too small"),
            Self::BadSignature => write!(f, "bad pack signature"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported pack version {v}"),
            Self::OffsetOutOfRange(o) => write!(f, "offset {o} out of range"),
            Self::HeaderTooLong => write!(f, "header exceeded safety bound"),
            Self::Truncated => write!(f, "truncated pack data"),
            Self::BadObjType(t) => write!(f, "bad object type {t}"),
            Self::BadOfsEncoding => write!(f, "bad OFS_DELTA encoding"),
            Self::OfsUnderflow => write!(f, "OFS_DELTA base underflow"),
            Self::TrailingGarbage { consumed, data_end } => write!(
                f,
                "entries end at {consumed} but trailer starts at {data_end}"
            ),
        }
    }
}

impl std::error::Error for PackParseError {}

/// Inflate errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InflateError {
    LimitExceeded,
    TruncatedInput,
    Stalled,
    Backend,
}

impl fmt::Display for InflateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded => write!(f, "inflate limit exceeded"),
            Self::TruncatedInput => write!(f, "truncated input"),
            Self::Stalled => write!(f, "inflate stalled"),
            Self::Backend => write!(f, "inflate backend error"),
        }
    }
}

impl std::error::Error for InflateError {}

/// Entry header parsed from a pack.
///
/// `data_start` points at the zlib stream, after any delta base reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryHeader {
    /// Offset of the header itself.
    pub offset: u64,
    /// Inflated payload size (delta entries: delta stream bytes).
    pub size: u64,
    /// Byte offset where the zlib stream begins.
    pub data_start: usize,
    pub kind: EntryKind,
}

/// Zero-copy view over pack bytes.
///
/// The trailing checksum is excluded from `data_end` so it is never
/// misparsed as entry data.
#[derive(Clone, Copy, Debug)]
pub struct PackFile<'a> {
    bytes: &'a [u8],
    format: ObjectFormat,
    version: u32,
    object_count: u32,
    data_end: usize,
}

impl<'a> PackFile<'a> {
    /// Parses and validates the pack header.
    ///
    /// Expects the full pack bytes including the trailing checksum.
    pub fn parse(bytes: &'a [u8], format: ObjectFormat) -> Result<Self, PackParseError> {
        let hash_len = format.oid_len() as usize;
        if bytes.len() < PACK_HEADER_SIZE + hash_len {
            return Err(PackParseError::TooSmall);
        }
        if &bytes[0..4] != b"PACK" {
            return Err(PackParseError::BadSignature);
        }
        let version = be_u32(&bytes[4..8]);
        if version != 2 && version != 3 {
            return Err(PackParseError::UnsupportedVersion(version));
        }
        let object_count = be_u32(&bytes[8..12]);

        Ok(Self {
            bytes,
            format,
            version,
            object_count,
            data_end: bytes.len() - hash_len,
        })
    }

    #[inline]
    #[must_use]
    pub const fn object_count(&self) -> u32 {
        self.object_count
    }

    #[inline]
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    #[must_use]
    pub const fn format(&self) -> ObjectFormat {
        self.format
    }

    /// Offset where the trailer checksum begins.
    #[inline]
    #[must_use]
    pub const fn data_end(&self) -> usize {
        self.data_end
    }

    /// The checksum stored in the trailer.
    #[must_use]
    pub fn trailer(&self) -> ObjectId {
        ObjectId::try_from_slice(&self.bytes[self.data_end..]).unwrap_or_default()
    }

    /// Recomputes the checksum over everything preceding the trailer.
    ///
    /// Returns `(expected, actual)` on mismatch.
    pub fn verify_checksum(&self) -> Result<ObjectId, (ObjectId, ObjectId)> {
        let expected = self.trailer();
        let actual = checksum(self.format, &self.bytes[..self.data_end]);
        if actual == expected {
            Ok(actual)
        } else {
            Err((expected, actual))
        }
    }

    /// Parses the entry header at `offset`.
    ///
    /// `max_header_bytes` bounds runaway varints on corrupt data.
    pub fn entry_header_at(
        &self,
        offset: u64,
        max_header_bytes: usize,
    ) -> Result<EntryHeader, PackParseError> {
        let mut pos = usize::try_from(offset).map_err(|_| PackParseError::OffsetOutOfRange(offset))?;
        if pos < PACK_HEADER_SIZE || pos >= self.data_end {
            return Err(PackParseError::OffsetOutOfRange(offset));
        }

        let start = pos;
        let first = self.byte_at(pos)?;
        pos += 1;

        let obj_type = (first >> 4) & 0x07;
        let mut size: u64 = (first & 0x0f) as u64;
        let mut shift: u32 = 4;

        let mut byte = first;
        while (byte & 0x80) != 0 {
            if pos - start >= max_header_bytes {
                return Err(PackParseError::HeaderTooLong);
            }
            byte = self.byte_at(pos)?;
            pos += 1;
            size |= ((byte & 0x7f) as u64) << shift;
            shift = shift.saturating_add(7);
            if shift > 63 {
                return Err(PackParseError::HeaderTooLong);
            }
        }

        let kind = match obj_type {
            OBJ_OFS_DELTA => {
                let (base_offset, new_pos) =
                    self.parse_ofs_base(offset, pos, start, max_header_bytes)?;
                pos = new_pos;
                EntryKind::OfsDelta { base_offset }
            }
            OBJ_REF_DELTA => {
                let end = pos + self.format.oid_len() as usize;
                if end > self.data_end {
                    return Err(PackParseError::Truncated);
                }
                let base_oid = ObjectId::try_from_slice(&self.bytes[pos..end])
                    .ok_or(PackParseError::Truncated)?;
                pos = end;
                EntryKind::RefDelta { base_oid }
            }
            code => match ObjectKind::from_pack_code(code) {
                Some(kind) => EntryKind::Full { kind },
                None => return Err(PackParseError::BadObjType(code)),
            },
        };

        Ok(EntryHeader {
            offset,
            size,
            data_start: pos,
            kind,
        })
    }

    /// Raw bytes from `start` to the end of the data region.
    #[inline]
    pub fn slice_from(&self, start: usize) -> &'a [u8] {
        debug_assert!(start <= self.data_end, "slice_from out of range");
        &self.bytes[start.min(self.data_end)..self.data_end]
    }

    /// Raw bytes of `[start, end)`.
    #[inline]
    pub fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        &self.bytes[start..end]
    }

    #[inline]
    fn byte_at(&self, pos: usize) -> Result<u8, PackParseError> {
        if pos >= self.data_end {
            return Err(PackParseError::Truncated);
        }
        Ok(self.bytes[pos])
    }

    /// Parses the OFS_DELTA negative offset.
    ///
    /// Each continuation adds one before shifting so that every encoding
    /// length covers a distinct range; see `gitformat-pack(5)`.
    fn parse_ofs_base(
        &self,
        delta_offset: u64,
        mut pos: usize,
        start: usize,
        max_header_bytes: usize,
    ) -> Result<(u64, usize), PackParseError> {
        let mut c = self.byte_at(pos)?;
        pos += 1;

        let mut val: u64 = (c & 0x7f) as u64;
        let mut bytes_read = 1usize;

        while (c & 0x80) != 0 {
            if bytes_read >= MAX_OFS_BYTES || pos - start >= max_header_bytes {
                return Err(PackParseError::HeaderTooLong);
            }
            c = self.byte_at(pos)?;
            pos += 1;
            bytes_read += 1;
            val = val
                .checked_add(1)
                .and_then(|v| v.checked_shl(7))
                .ok_or(PackParseError::BadOfsEncoding)?;
            val |= (c & 0x7f) as u64;
        }

        if val == 0 || val > delta_offset {
            return Err(PackParseError::OfsUnderflow);
        }

        Ok((delta_offset - val, pos))
    }
}

#[inline]
pub(crate) fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Inflates a zlib stream with a hard output cap.
///
/// Returns the number of input bytes consumed, which lets sequential
/// decoders find the next entry. `out` is cleared first; on error it may
/// hold a partial prefix that callers must discard.
pub fn inflate_limited(
    input: &[u8],
    out: &mut Vec<u8>,
    max_out: usize,
) -> Result<usize, InflateError> {
    use flate2::{FlushDecompress, Status};

    out.clear();

    with_inflate_scratch(|de, buf| {
        let mut in_pos: usize = 0;

        loop {
            let before_in = de.total_in() as usize;
            let before_out = de.total_out() as usize;

            let status = de
                .decompress(&input[in_pos..], buf, FlushDecompress::None)
                .map_err(|_| InflateError::Backend)?;

            let consumed = de.total_in() as usize - before_in;
            let produced = de.total_out() as usize - before_out;
            in_pos += consumed;

            if produced != 0 {
                if out.len() + produced > max_out {
                    return Err(InflateError::LimitExceeded);
                }
                out.extend_from_slice(&buf[..produced]);
            }

            match status {
                Status::StreamEnd => return Ok(in_pos),
                Status::Ok => {
                    if consumed == 0 && produced == 0 {
                        if in_pos >= input.len() {
                            return Err(InflateError::TruncatedInput);
                        }
                        return Err(InflateError::Stalled);
                    }
                }
                Status::BufError => {
                    if in_pos >= input.len() {
                        return Err(InflateError::TruncatedInput);
                    }
                }
            }
        }
    })
}

/// Inflates expecting exactly `expected` output bytes.
///
/// Returns the number of input bytes consumed.
pub fn inflate_exact(
    input: &[u8],
    out: &mut Vec<u8>,
    expected: usize,
) -> Result<usize, InflateError> {
    let consumed = inflate_limited(input, out, expected)?;
    if out.len() != expected {
        return Err(InflateError::TruncatedInput);
    }
    Ok(consumed)
}

/// Inflates only a prefix of a stream, stopping once `want` bytes exist.
///
/// Used for header-only reads of loose objects. Returns fewer bytes if the
/// stream ends first.
pub fn inflate_prefix(input: &[u8], out: &mut Vec<u8>, want: usize) -> Result<(), InflateError> {
    use flate2::{FlushDecompress, Status};

    out.clear();

    with_inflate_scratch(|de, buf| {
        let mut in_pos: usize = 0;
        loop {
            let before_in = de.total_in() as usize;
            let before_out = de.total_out() as usize;
            let status = de
                .decompress(&input[in_pos..], buf, FlushDecompress::None)
                .map_err(|_| InflateError::Backend)?;
            let consumed = de.total_in() as usize - before_in;
            let produced = de.total_out() as usize - before_out;
            in_pos += consumed;

            let take = produced.min(want - out.len());
            out.extend_from_slice(&buf[..take]);
            if out.len() >= want {
                return Ok(());
            }

            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        return Err(InflateError::TruncatedInput);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn pack_with_body(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"PACK");
        out.extend_from_slice(&2u32.to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(body);
        let sum = checksum(ObjectFormat::Sha1, &out);
        out.extend_from_slice(sum.as_slice());
        out
    }

    #[test]
    fn rejects_bad_headers() {
        assert_eq!(
            PackFile::parse(b"PACK", ObjectFormat::Sha1).unwrap_err(),
            PackParseError::TooSmall
        );
        let mut bytes = pack_with_body(&[]);
        bytes[0] = b'X';
        assert_eq!(
            PackFile::parse(&bytes, ObjectFormat::Sha1).unwrap_err(),
            PackParseError::BadSignature
        );
        let mut bytes = pack_with_body(&[]);
        bytes[7] = 9;
        assert_eq!(
            PackFile::parse(&bytes, ObjectFormat::Sha1).unwrap_err(),
            PackParseError::UnsupportedVersion(9)
        );
    }

    #[test]
    fn parses_multi_byte_size_header() {
        // blob of size 300: 0b1011_1100 (type 3, size low nibble 0xc, more), 0x12
        let mut body = vec![0xbc, 0x12];
        body.extend_from_slice(&compress(&[7u8; 300]));
        let bytes = pack_with_body(&body);
        let pack = PackFile::parse(&bytes, ObjectFormat::Sha1).unwrap();
        let hdr = pack.entry_header_at(12, 64).unwrap();
        assert_eq!(hdr.size, 300);
        assert_eq!(hdr.data_start, 14);
        assert_eq!(
            hdr.kind,
            EntryKind::Full {
                kind: ObjectKind::Blob
            }
        );

        let mut out = Vec::with_capacity(300);
        inflate_exact(pack.slice_from(hdr.data_start), &mut out, 300).unwrap();
        assert_eq!(out, vec![7u8; 300]);
        assert!(pack.verify_checksum().is_ok());
    }

    #[test]
    fn ofs_delta_base_offset() {
        // Entry at offset 12 is a placeholder; the delta entry claims a base
        // 12 bytes back from offset 24 (which is offset 12).
        let mut body = vec![0x30, 0x78, 0x9c, 0x03, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        body.extend_from_slice(&[0x60, 0x0c]);
        body.extend_from_slice(&compress(b""));
        let bytes = pack_with_body(&body);
        let pack = PackFile::parse(&bytes, ObjectFormat::Sha1).unwrap();
        let hdr = pack.entry_header_at(24, 64).unwrap();
        assert_eq!(hdr.kind, EntryKind::OfsDelta { base_offset: 12 });
    }

    #[test]
    fn ofs_delta_underflow_is_rejected() {
        let mut body = vec![0x60, 0x7f];
        body.extend_from_slice(&compress(b""));
        let bytes = pack_with_body(&body);
        let pack = PackFile::parse(&bytes, ObjectFormat::Sha1).unwrap();
        assert_eq!(
            pack.entry_header_at(12, 64).unwrap_err(),
            PackParseError::OfsUnderflow
        );
    }

    #[test]
    fn bad_type_and_range() {
        let bytes = pack_with_body(&[0x50, 0x00]);
        let pack = PackFile::parse(&bytes, ObjectFormat::Sha1).unwrap();
        assert_eq!(
            pack.entry_header_at(12, 64).unwrap_err(),
            PackParseError::BadObjType(5)
        );
        assert_eq!(
            pack.entry_header_at(4, 64).unwrap_err(),
            PackParseError::OffsetOutOfRange(4)
        );
    }

    #[test]
    fn corrupted_trailer_is_detected() {
        let mut bytes = pack_with_body(&[]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let pack = PackFile::parse(&bytes, ObjectFormat::Sha1).unwrap();
        let (expected, actual) = pack.verify_checksum().unwrap_err();
        assert_ne!(expected, actual);
    }

    #[test]
    fn inflate_limits() {
        let data = compress(&[1u8; 1000]);
        let mut out = Vec::new();
        assert_eq!(
            inflate_limited(&data, &mut out, 10),
            Err(InflateError::LimitExceeded)
        );
        assert_eq!(
            inflate_exact(&data, &mut out, 2000),
            Err(InflateError::TruncatedInput)
        );
        assert_eq!(
            inflate_limited(&data[..data.len() / 2], &mut out, 2000),
            Err(InflateError::TruncatedInput)
        );
        let consumed = inflate_limited(&data, &mut out, 1000).unwrap();
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn inflate_prefix_stops_early() {
        let data = compress(b"blob 12345\0payload");
        let mut out = Vec::new();
        inflate_prefix(&data, &mut out, 5).unwrap();
        assert_eq!(out, b"blob ");
    }
}
