//! Pack encoding.
//!
//! `PackEncoder` writes entries to any `io::Write` while maintaining the
//! running trailer checksum and the per-entry `(offset, crc32)` records the
//! index writer needs. `encode_pack` layers base selection on top: objects
//! are ordered by kind and descending size, and each one is compared
//! against a sliding window of preceding same-kind objects; the smallest
//! delta below half the payload wins.

use std::io::{self, Write};

use flate2::write::ZlibEncoder;
use flate2::{Compression, Crc};

use super::limits::PackWriteOptions;
use super::object::{compute_id, Object, ObjectHasher, ObjectKind};
use super::object_id::{ObjectFormat, ObjectId};
use super::pack_delta::compute_delta;
use super::pack_idx::IdxEntry;
use super::pack_inflate::{OBJ_OFS_DELTA, OBJ_REF_DELTA, PACK_HEADER_SIZE};

/// Writer that hashes and counts everything passing through.
struct HashingWriter<W> {
    inner: W,
    hasher: ObjectHasher,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming pack writer.
///
/// The object count is written up front; `finish` fails if a different
/// number of entries was written.
pub struct PackEncoder<W: Write> {
    out: HashingWriter<W>,
    format: ObjectFormat,
    level: Compression,
    declared: u32,
    entries: Vec<IdxEntry>,
}

impl<W: Write> PackEncoder<W> {
    pub fn new(
        writer: W,
        format: ObjectFormat,
        object_count: u32,
        compression_level: u32,
    ) -> io::Result<Self> {
        let mut out = HashingWriter {
            inner: writer,
            hasher: ObjectHasher::new(format),
            written: 0,
        };
        out.write_all(b"PACK")?;
        out.write_all(&2u32.to_be_bytes())?;
        out.write_all(&object_count.to_be_bytes())?;
        debug_assert_eq!(out.written, PACK_HEADER_SIZE as u64);
        Ok(Self {
            out,
            format,
            level: Compression::new(compression_level.min(9)),
            declared: object_count,
            entries: Vec::with_capacity(object_count as usize),
        })
    }

    /// Offset the next entry will be written at.
    #[inline]
    pub fn position(&self) -> u64 {
        self.out.written
    }

    /// Writes a whole object; returns its offset.
    pub fn write_full(&mut self, oid: ObjectId, kind: ObjectKind, data: &[u8]) -> io::Result<u64> {
        let header = encode_entry_header(kind.pack_code(), data.len() as u64);
        self.write_entry(oid, &header, data)
    }

    /// Writes an OFS_DELTA entry against the entry at `base_offset`.
    pub fn write_ofs_delta(&mut self, oid: ObjectId, base_offset: u64, delta: &[u8]) -> io::Result<u64> {
        let here = self.position();
        if base_offset >= here {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "OFS_DELTA base must precede the delta",
            ));
        }
        let mut header = encode_entry_header(OBJ_OFS_DELTA, delta.len() as u64);
        header.extend_from_slice(&encode_ofs_distance(here - base_offset));
        self.write_entry(oid, &header, delta)
    }

    /// Writes a REF_DELTA entry against `base`.
    pub fn write_ref_delta(&mut self, oid: ObjectId, base: &ObjectId, delta: &[u8]) -> io::Result<u64> {
        let mut header = encode_entry_header(OBJ_REF_DELTA, delta.len() as u64);
        header.extend_from_slice(base.as_slice());
        self.write_entry(oid, &header, delta)
    }

    fn write_entry(&mut self, oid: ObjectId, header: &[u8], payload: &[u8]) -> io::Result<u64> {
        if self.entries.len() as u64 >= self.declared as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "more entries than declared in the pack header",
            ));
        }
        let offset = self.position();
        let mut enc = ZlibEncoder::new(Vec::with_capacity(payload.len() / 2 + 16), self.level);
        enc.write_all(payload)?;
        let compressed = enc.finish()?;

        let mut crc = Crc::new();
        crc.update(header);
        crc.update(&compressed);

        self.out.write_all(header)?;
        self.out.write_all(&compressed)?;
        self.entries.push(IdxEntry {
            oid,
            offset,
            crc32: crc.sum(),
        });
        Ok(offset)
    }

    /// Appends the trailer and returns the writer, checksum, and entries.
    pub fn finish(mut self) -> io::Result<(W, ObjectId, Vec<IdxEntry>)> {
        if self.entries.len() != self.declared as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fewer entries than declared in the pack header",
            ));
        }
        let HashingWriter {
            mut inner, hasher, ..
        } = self.out;
        let sum = hasher.finish();
        debug_assert_eq!(sum.format(), self.format);
        inner.write_all(sum.as_slice())?;
        inner.flush()?;
        Ok((inner, sum, std::mem::take(&mut self.entries)))
    }
}

/// An encoded pack held in memory.
#[derive(Debug, Clone)]
pub struct EncodedPack {
    pub bytes: Vec<u8>,
    pub checksum: ObjectId,
    /// One row per object, in pack order.
    pub entries: Vec<IdxEntry>,
}

/// Encodes `objects` into a pack, choosing delta bases heuristically.
///
/// Duplicate objects are written once.
pub fn encode_pack(
    format: ObjectFormat,
    objects: &[Object],
    options: &PackWriteOptions,
) -> io::Result<EncodedPack> {
    options
        .try_validate()
        .map_err(|detail| io::Error::new(io::ErrorKind::InvalidInput, detail))?;

    let mut seen = std::collections::HashSet::with_capacity(objects.len());
    let mut items: Vec<(ObjectId, &Object)> = Vec::with_capacity(objects.len());
    for obj in objects {
        let oid = compute_id(format, obj.kind, &obj.data);
        if seen.insert(oid) {
            items.push((oid, obj));
        }
    }
    // Larger objects first so smaller ones delta against them.
    items.sort_by(|a, b| {
        a.1.kind
            .cmp(&b.1.kind)
            .then(b.1.data.len().cmp(&a.1.data.len()))
            .then(a.0.cmp(&b.0))
    });

    let count = u32::try_from(items.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many objects for one pack"))?;
    let mut enc = PackEncoder::new(Vec::new(), format, count, options.compression_level)?;

    // (offset, depth) of each written item, parallel to `items`.
    let mut placed: Vec<(u64, u8)> = Vec::with_capacity(items.len());
    for (i, (oid, obj)) in items.iter().enumerate() {
        let choice = select_base(&items, &placed, i, options);
        let placement = match choice {
            Some((base_idx, delta)) => {
                let (base_offset, base_depth) = placed[base_idx];
                let offset = enc.write_ofs_delta(*oid, base_offset, &delta)?;
                (offset, base_depth + 1)
            }
            None => (enc.write_full(*oid, obj.kind, &obj.data)?, 0),
        };
        placed.push(placement);
    }

    let (bytes, checksum, entries) = enc.finish()?;
    tracing::debug!(
        objects = entries.len(),
        bytes = bytes.len(),
        %checksum,
        "encoded pack"
    );
    Ok(EncodedPack {
        bytes,
        checksum,
        entries,
    })
}

fn select_base(
    items: &[(ObjectId, &Object)],
    placed: &[(u64, u8)],
    i: usize,
    options: &PackWriteOptions,
) -> Option<(usize, Vec<u8>)> {
    let target = items[i].1;
    if options.window == 0 || target.data.len() < options.min_delta_source_bytes {
        return None;
    }
    let mut best: Option<(usize, Vec<u8>)> = None;
    let limit = target.data.len() / 2;
    for j in (i.saturating_sub(options.window)..i).rev() {
        let base = items[j].1;
        if base.kind != target.kind || placed[j].1 >= options.max_delta_depth {
            continue;
        }
        // Size-ratio prefilter: a base much smaller than the target cannot
        // produce a delta under the limit.
        if base.data.len() * 2 < target.data.len() {
            continue;
        }
        let delta = compute_delta(&base.data, &target.data);
        let better = best.as_ref().map_or(delta.len() < limit, |(_, d)| delta.len() < d.len());
        if better {
            best = Some((j, delta));
        }
    }
    best
}

/// Encodes a pack entry type/size header.
pub(crate) fn encode_entry_header(obj_type: u8, mut size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    let mut first = (obj_type & 0x07) << 4;
    first |= (size & 0x0f) as u8;
    size >>= 4;
    if size != 0 {
        first |= 0x80;
    }
    out.push(first);
    while size != 0 {
        let mut byte = (size & 0x7f) as u8;
        size >>= 7;
        if size != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}

/// Encodes an OFS_DELTA backward distance (must be positive).
pub(crate) fn encode_ofs_distance(mut dist: u64) -> Vec<u8> {
    debug_assert!(dist > 0);
    let mut bytes = Vec::with_capacity(10);
    bytes.push((dist & 0x7f) as u8);
    dist >>= 7;
    while dist > 0 {
        dist -= 1;
        bytes.push(((dist & 0x7f) as u8) | 0x80);
        dist >>= 7;
    }
    bytes.reverse();
    bytes
}
