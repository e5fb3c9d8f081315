//! Sequential decoding of a complete pack stream.
//!
//! Used for imports, where every entry is needed and there is no index yet.
//! The walk has two phases:
//!
//! 1. Scan: parse each entry header in order, inflate its payload within
//!    the configured caps, and record the CRC-32 of the raw entry bytes.
//!    The scan must land exactly on the trailer, whose checksum is then
//!    verified. Any failure here returns no objects.
//! 2. Resolve: full entries hash directly. Each delta is filed under the
//!    base it waits on (an entry for OFS_DELTA, an object id for
//!    REF_DELTA); settling an object settles its waiters in turn, so every
//!    entry is visited once whatever the pack order. REF_DELTA bases still
//!    unresolved afterwards live outside the pack (thin packs) and are
//!    fetched through the caller's lookup.
//!
//! Chain depth is tracked per entry; exceeding the limit is reported as a
//! corrupt chain at the offending offset.

use std::path::Path;

use ahash::AHashMap;
use flate2::Crc;

use super::errors::{ChecksumTarget, OdbError, PackEntryError};
use super::limits::PackDecodeLimits;
use super::object::{compute_id, Object, ObjectKind};
use super::object_id::{ObjectFormat, ObjectId};
use super::pack_delta::apply_delta;
use super::pack_idx::IdxEntry;
use super::pack_inflate::{inflate_exact, EntryKind, PackFile, PackParseError, PACK_HEADER_SIZE};

/// One fully resolved pack entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
    /// Offset of the entry header in the pack.
    pub offset: u64,
    /// CRC-32 of the raw (compressed) entry bytes.
    pub crc32: u32,
    /// Delta depth; zero for whole objects.
    pub depth: u8,
}

/// Result of decoding a pack stream.
#[derive(Clone, Debug)]
pub struct PackContents {
    pub format: ObjectFormat,
    pub checksum: ObjectId,
    /// Objects in pack order.
    pub objects: Vec<PackObject>,
    /// Ids of REF_DELTA bases that were supplied from outside the pack.
    pub external_bases: Vec<ObjectId>,
}

impl PackContents {
    /// Index rows for every entry, in pack order.
    pub fn idx_entries(&self) -> Vec<IdxEntry> {
        self.objects
            .iter()
            .map(|o| IdxEntry {
                oid: o.id,
                offset: o.offset,
                crc32: o.crc32,
            })
            .collect()
    }

    /// True when some delta base lives outside the pack.
    #[inline]
    pub fn is_thin(&self) -> bool {
        !self.external_bases.is_empty()
    }
}

/// Decode options.
#[derive(Clone, Copy, Debug)]
pub struct StreamOptions {
    pub limits: PackDecodeLimits,
    pub max_delta_depth: u8,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            limits: PackDecodeLimits::DEFAULT,
            max_delta_depth: 64,
        }
    }
}

struct RawEntry {
    offset: u64,
    kind: EntryKind,
    payload: Vec<u8>,
    crc32: u32,
}

enum Slot {
    Pending,
    Done {
        id: ObjectId,
        kind: ObjectKind,
        data: Vec<u8>,
        depth: u8,
    },
}

/// Decodes every entry in `bytes`.
///
/// `label` names the pack in error context. `external` supplies REF_DELTA
/// bases missing from the pack; return `Ok(None)` when a base is unknown.
pub fn decode_pack<F>(
    bytes: &[u8],
    format: ObjectFormat,
    label: &Path,
    options: &StreamOptions,
    mut external: F,
) -> Result<PackContents, OdbError>
where
    F: FnMut(&ObjectId) -> Result<Option<Object>, OdbError>,
{
    let entry_err = |offset: u64, source: PackEntryError| OdbError::Pack {
        pack: label.to_path_buf(),
        offset,
        source,
    };

    let pack = PackFile::parse(bytes, format).map_err(|e| entry_err(0, e.into()))?;
    let raw = scan_entries(&pack, &options.limits).map_err(|(off, e)| entry_err(off, e))?;

    if let Err((expected, actual)) = pack.verify_checksum() {
        return Err(OdbError::ChecksumMismatch {
            target: ChecksumTarget::Pack,
            path: label.to_path_buf(),
            expected,
            actual,
        });
    }
    let checksum = pack.trailer();

    let by_offset: AHashMap<u64, usize> =
        raw.iter().enumerate().map(|(i, e)| (e.offset, i)).collect();
    let mut slots: Vec<Slot> = (0..raw.len()).map(|_| Slot::Pending).collect();
    let mut external_bases = Vec::new();
    let step = DeltaStep {
        format,
        label,
        max_depth: options.max_delta_depth,
        max_out: options.limits.max_object_bytes,
    };

    // Deltas keyed by the base they wait on. Each entry is listed once, in
    // pack order.
    let mut waiting_on_entry: AHashMap<usize, Vec<usize>> = AHashMap::new();
    let mut waiting_on_id: AHashMap<ObjectId, Vec<usize>> = AHashMap::new();
    let mut settled: Vec<usize> = Vec::new();
    for (i, entry) in raw.iter().enumerate() {
        match entry.kind {
            EntryKind::Full { kind } => {
                slots[i] = Slot::Done {
                    id: compute_id(format, kind, &entry.payload),
                    kind,
                    data: entry.payload.clone(),
                    depth: 0,
                };
                settled.push(i);
            }
            EntryKind::OfsDelta { base_offset } => {
                let base_idx = *by_offset.get(&base_offset).ok_or_else(|| {
                    entry_err(
                        entry.offset,
                        PackParseError::OffsetOutOfRange(base_offset).into(),
                    )
                })?;
                waiting_on_entry.entry(base_idx).or_default().push(i);
            }
            EntryKind::RefDelta { base_oid } => {
                waiting_on_id.entry(base_oid).or_default().push(i);
            }
        }
    }

    let mut scratch = Vec::new();
    loop {
        // Every settled entry releases the deltas built on it.
        while let Some(b) = settled.pop() {
            let Slot::Done { id, .. } = &slots[b] else {
                continue;
            };
            let mut waiters = waiting_on_entry.remove(&b).unwrap_or_default();
            waiters.extend(waiting_on_id.remove(id).unwrap_or_default());
            for w in waiters {
                let Slot::Done {
                    kind, data, depth, ..
                } = &slots[b]
                else {
                    continue;
                };
                let slot = step.apply(&raw[w], *kind, data, *depth, &mut scratch)?;
                slots[w] = slot;
                settled.push(w);
            }
        }

        // Remaining REF_DELTA bases are not in the pack; ask outside for
        // the one the earliest entry needs.
        let next = waiting_on_id
            .iter()
            .min_by_key(|(_, waiters)| waiters.first().copied())
            .map(|(oid, _)| *oid);
        let Some(base_oid) = next else {
            break;
        };
        let Some(base) = external(&base_oid)? else {
            return Err(OdbError::not_found(base_oid));
        };
        tracing::trace!(base = %base_oid, "thin pack base supplied externally");
        for w in waiting_on_id.remove(&base_oid).unwrap_or_default() {
            let slot = step.apply(&raw[w], base.kind, &base.data, 0, &mut scratch)?;
            slots[w] = slot;
            settled.push(w);
        }
        external_bases.push(base_oid);
    }

    // Anything left waits on an entry that never resolved.
    if let Some(i) = slots.iter().position(|s| matches!(s, Slot::Pending)) {
        return Err(OdbError::CorruptDeltaChain {
            pack: label.to_path_buf(),
            offset: raw[i].offset,
            depth: 0,
        });
    }

    let mut objects = Vec::with_capacity(raw.len());
    for (entry, slot) in raw.into_iter().zip(slots) {
        if let Slot::Done {
            id,
            kind,
            data,
            depth,
        } = slot
        {
            objects.push(PackObject {
                id,
                kind,
                data,
                offset: entry.offset,
                crc32: entry.crc32,
                depth,
            });
        }
    }

    tracing::debug!(
        pack = %label.display(),
        objects = objects.len(),
        thin = !external_bases.is_empty(),
        "decoded pack stream"
    );

    Ok(PackContents {
        format,
        checksum,
        objects,
        external_bases,
    })
}

/// Shared parameters for applying one delta entry.
struct DeltaStep<'a> {
    format: ObjectFormat,
    label: &'a Path,
    max_depth: u8,
    max_out: usize,
}

impl DeltaStep<'_> {
    fn apply(
        &self,
        entry: &RawEntry,
        kind: ObjectKind,
        base_data: &[u8],
        base_depth: u8,
        scratch: &mut Vec<u8>,
    ) -> Result<Slot, OdbError> {
        let depth = base_depth.saturating_add(1);
        if depth > self.max_depth {
            return Err(OdbError::CorruptDeltaChain {
                pack: self.label.to_path_buf(),
                offset: entry.offset,
                depth: depth as usize,
            });
        }
        apply_delta(base_data, &entry.payload, scratch, self.max_out).map_err(|e| OdbError::Pack {
            pack: self.label.to_path_buf(),
            offset: entry.offset,
            source: e.into(),
        })?;
        let data = std::mem::take(scratch);
        Ok(Slot::Done {
            id: compute_id(self.format, kind, &data),
            kind,
            data,
            depth,
        })
    }
}

fn scan_entries(
    pack: &PackFile<'_>,
    limits: &PackDecodeLimits,
) -> Result<Vec<RawEntry>, (u64, PackEntryError)> {
    let count = pack.object_count() as usize;
    let mut out = Vec::with_capacity(count.min(1 << 16));
    let mut offset = PACK_HEADER_SIZE as u64;

    for _ in 0..count {
        let hdr = pack
            .entry_header_at(offset, limits.max_header_bytes)
            .map_err(|e| (offset, e.into()))?;
        let cap = if hdr.kind.is_delta() {
            limits.max_delta_bytes
        } else {
            limits.max_object_bytes
        };
        if hdr.size > cap as u64 {
            return Err((offset, crate::pack_inflate::InflateError::LimitExceeded.into()));
        }
        let mut payload = Vec::with_capacity(hdr.size as usize);
        let consumed = inflate_exact(pack.slice_from(hdr.data_start), &mut payload, hdr.size as usize)
            .map_err(|e| (offset, e.into()))?;
        let end = hdr.data_start + consumed;

        let mut crc = Crc::new();
        crc.update(pack.slice(offset as usize, end));
        out.push(RawEntry {
            offset,
            kind: hdr.kind,
            payload,
            crc32: crc.sum(),
        });
        offset = end as u64;
    }

    if offset as usize != pack.data_end() {
        return Err((
            offset,
            PackParseError::TrailingGarbage {
                consumed: offset as usize,
                data_end: pack.data_end(),
            }
            .into(),
        ));
    }
    Ok(out)
}
