//! Random-access reads from one pack and its index.
//!
//! Lookups go idx fanout + binary search → pack offset → entry header.
//! Delta chains are resolved without recursion: the reader walks from the
//! requested entry toward its base, collecting inflated delta streams on a
//! stack, then applies them base-first. The walk is capped at the smaller
//! of the configured `max_delta_depth` and the caller's remaining budget;
//! a deeper (or cyclic) chain is reported as `CorruptDeltaChain`.
//!
//! REF_DELTA bases missing from this pack are requested from the
//! `BaseResolver`, which is how the composite store links packs together.

use std::path::{Path, PathBuf};

use super::bytes::BytesView;
use super::errors::{ChecksumTarget, OdbError, PackEntryError};
use super::limits::StoreLimits;
use super::object::{compute_id, Object};
use super::object_id::{ObjectFormat, ObjectId};
use super::object_store::{BaseResolver, ObjectHeader, ObjectProvider};
use super::pack_delta::{apply_delta, delta_sizes};
use super::pack_idx::PackIndex;
use super::pack_inflate::{inflate_exact, inflate_prefix, EntryHeader, EntryKind, PackFile};

/// Bytes of a delta stream needed to read both size varints.
const DELTA_SIZES_PREFIX: usize = 20;

/// A pack file paired with its index.
#[derive(Debug)]
pub struct PackProvider {
    pack_path: PathBuf,
    pack: BytesView,
    index: PackIndex,
    format: ObjectFormat,
    limits: StoreLimits,
}

impl PackProvider {
    /// Maps `pack-*.pack` and the sibling `.idx`.
    ///
    /// The index checksum is verified, and the pack checksum recorded in the
    /// index must match the pack trailer. The full pack checksum is only
    /// recomputed by `verify`.
    pub fn open(pack_path: &Path, format: ObjectFormat, limits: StoreLimits) -> Result<Self, OdbError> {
        let idx_path = pack_path.with_extension("idx");
        let idx_bytes = BytesView::map_file(&idx_path)?;
        let pack_bytes = BytesView::map_file(pack_path)?;
        let index = PackIndex::open(idx_bytes, format).map_err(|source| OdbError::Idx {
            path: idx_path.clone(),
            source,
        })?;
        let provider = Self::from_parts(pack_path.to_path_buf(), pack_bytes, index, format, limits)?;
        tracing::debug!(
            pack = %pack_path.display(),
            objects = provider.object_count(),
            mapped = provider.pack.is_mapped(),
            "opened pack"
        );
        Ok(provider)
    }

    /// Builds a provider over already loaded bytes.
    pub fn from_parts(
        pack_path: PathBuf,
        pack: BytesView,
        index: PackIndex,
        format: ObjectFormat,
        limits: StoreLimits,
    ) -> Result<Self, OdbError> {
        let view = PackFile::parse(pack.as_slice(), format).map_err(|e| OdbError::Pack {
            pack: pack_path.clone(),
            offset: 0,
            source: e.into(),
        })?;
        let expected = index.view().pack_checksum();
        let actual = view.trailer();
        if expected != actual {
            return Err(OdbError::ChecksumMismatch {
                target: ChecksumTarget::Pack,
                path: pack_path,
                expected,
                actual,
            });
        }
        if view.object_count() != index.object_count() {
            return Err(OdbError::Pack {
                pack: pack_path,
                offset: 0,
                source: PackEntryError::Parse(super::pack_inflate::PackParseError::Truncated),
            });
        }
        Ok(Self {
            pack_path,
            pack,
            index,
            format,
            limits,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.pack_path
    }

    #[inline]
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    #[inline]
    pub fn object_count(&self) -> u32 {
        self.index.object_count()
    }

    /// Checksum stored in the pack trailer.
    pub fn checksum(&self) -> ObjectId {
        self.index.view().pack_checksum()
    }

    /// Recomputes the pack trailer checksum.
    pub fn verify(&self) -> Result<(), OdbError> {
        self.pack_file()?
            .verify_checksum()
            .map(|_| ())
            .map_err(|(expected, actual)| OdbError::ChecksumMismatch {
                target: ChecksumTarget::Pack,
                path: self.pack_path.clone(),
                expected,
                actual,
            })
    }

    fn pack_file(&self) -> Result<PackFile<'_>, OdbError> {
        PackFile::parse(self.pack.as_slice(), self.format).map_err(|e| self.entry_err(0, e.into()))
    }

    fn entry_err(&self, offset: u64, source: PackEntryError) -> OdbError {
        OdbError::Pack {
            pack: self.pack_path.clone(),
            offset,
            source,
        }
    }

    fn find(&self, oid: &ObjectId) -> Result<Option<u64>, OdbError> {
        self.index
            .find(oid)
            .map(|hit| hit.map(|(offset, _)| offset))
            .map_err(|source| OdbError::Idx {
                path: self.pack_path.with_extension("idx"),
                source,
            })
    }

    fn header_at(&self, pack: &PackFile<'_>, offset: u64) -> Result<EntryHeader, OdbError> {
        pack.entry_header_at(offset, self.limits.decode.max_header_bytes)
            .map_err(|e| self.entry_err(offset, e.into()))
    }

    fn inflate_entry(&self, pack: &PackFile<'_>, hdr: &EntryHeader) -> Result<Vec<u8>, OdbError> {
        let cap = if hdr.kind.is_delta() {
            self.limits.decode.max_delta_bytes
        } else {
            self.limits.decode.max_object_bytes
        };
        if hdr.size > cap as u64 {
            return Err(self.entry_err(
                hdr.offset,
                super::pack_inflate::InflateError::LimitExceeded.into(),
            ));
        }
        let mut out = Vec::with_capacity(hdr.size as usize);
        inflate_exact(pack.slice_from(hdr.data_start), &mut out, hdr.size as usize)
            .map_err(|e| self.entry_err(hdr.offset, e.into()))?;
        Ok(out)
    }

    fn chain_error(&self, offset: u64, depth: usize) -> OdbError {
        tracing::debug!(pack = %self.pack_path.display(), offset, depth, "delta chain too deep");
        OdbError::CorruptDeltaChain {
            pack: self.pack_path.clone(),
            offset,
            depth,
        }
    }

    /// Decodes the entry at `offset`, resolving its delta chain.
    pub fn read_at(
        &self,
        offset: u64,
        bases: &dyn BaseResolver,
        depth_budget: u8,
    ) -> Result<Object, OdbError> {
        let pack = self.pack_file()?;
        let max_depth = self.limits.max_delta_depth.min(depth_budget) as usize;
        let mut deltas: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut cur = offset;

        let (kind, mut data) = loop {
            let hdr = self.header_at(&pack, cur)?;
            let base = match hdr.kind {
                EntryKind::Full { kind } => break (kind, self.inflate_entry(&pack, &hdr)?),
                EntryKind::OfsDelta { base_offset } => Ok(base_offset),
                EntryKind::RefDelta { base_oid } => self.find(&base_oid)?.ok_or(base_oid),
            };
            deltas.push((cur, self.inflate_entry(&pack, &hdr)?));
            if deltas.len() > max_depth {
                return Err(self.chain_error(offset, deltas.len()));
            }
            match base {
                Ok(base_offset) => cur = base_offset,
                Err(base_oid) => {
                    let remaining = (max_depth - deltas.len()) as u8;
                    let base = bases
                        .resolve_base(&base_oid, remaining)?
                        .ok_or_else(|| OdbError::not_found(base_oid))?;
                    break (base.kind, base.data);
                }
            }
        };

        let mut out = Vec::new();
        while let Some((delta_offset, delta)) = deltas.pop() {
            apply_delta(&data, &delta, &mut out, self.limits.decode.max_object_bytes)
                .map_err(|e| self.entry_err(delta_offset, e.into()))?;
            std::mem::swap(&mut data, &mut out);
        }
        Ok(Object { kind, data })
    }

    /// Reads kind and size of the entry at `offset` without applying deltas.
    ///
    /// The size comes from the first delta's result-size varint; the kind
    /// from the chain's terminal full entry.
    pub fn header_at_offset(
        &self,
        offset: u64,
        bases: &dyn BaseResolver,
        depth_budget: u8,
    ) -> Result<ObjectHeader, OdbError> {
        let pack = self.pack_file()?;
        let max_depth = self.limits.max_delta_depth.min(depth_budget) as usize;
        let mut size: Option<u64> = None;
        let mut depth = 0usize;
        let mut cur = offset;
        loop {
            let hdr = self.header_at(&pack, cur)?;
            let base = match hdr.kind {
                EntryKind::Full { kind } => {
                    return Ok(ObjectHeader {
                        kind,
                        size: size.unwrap_or(hdr.size),
                    });
                }
                EntryKind::OfsDelta { base_offset } => Ok(base_offset),
                EntryKind::RefDelta { base_oid } => self.find(&base_oid)?.ok_or(base_oid),
            };
            if size.is_none() {
                let mut prefix = Vec::with_capacity(DELTA_SIZES_PREFIX);
                inflate_prefix(pack.slice_from(hdr.data_start), &mut prefix, DELTA_SIZES_PREFIX)
                    .map_err(|e| self.entry_err(cur, e.into()))?;
                let (_, result) = delta_sizes(&prefix).map_err(|e| self.entry_err(cur, e.into()))?;
                size = Some(result as u64);
            }
            depth += 1;
            if depth > max_depth {
                return Err(self.chain_error(offset, depth));
            }
            match base {
                Ok(base_offset) => cur = base_offset,
                Err(base_oid) => {
                    let remaining = (max_depth - depth) as u8;
                    let header = bases
                        .resolve_header(&base_oid, remaining)?
                        .ok_or_else(|| OdbError::not_found(base_oid))?;
                    return Ok(ObjectHeader {
                        kind: header.kind,
                        size: size.unwrap_or(header.size),
                    });
                }
            }
        }
    }
}

impl ObjectProvider for PackProvider {
    fn describe(&self) -> &Path {
        &self.pack_path
    }

    fn contains(&self, oid: &ObjectId) -> Result<bool, OdbError> {
        Ok(self.find(oid)?.is_some())
    }

    fn read(
        &self,
        oid: &ObjectId,
        bases: &dyn BaseResolver,
        depth_budget: u8,
    ) -> Result<Option<Object>, OdbError> {
        match self.find(oid)? {
            Some(offset) => {
                tracing::trace!(%oid, offset, pack = %self.pack_path.display(), "pack lookup hit");
                let obj = self.read_at(offset, bases, depth_budget)?;
                let actual = compute_id(self.format, obj.kind, &obj.data);
                if actual != *oid {
                    return Err(OdbError::IntegrityMismatch {
                        expected: *oid,
                        actual,
                    });
                }
                Ok(Some(obj))
            }
            None => Ok(None),
        }
    }

    fn header(
        &self,
        oid: &ObjectId,
        bases: &dyn BaseResolver,
        depth_budget: u8,
    ) -> Result<Option<ObjectHeader>, OdbError> {
        match self.find(oid)? {
            Some(offset) => self.header_at_offset(offset, bases, depth_budget).map(Some),
            None => Ok(None),
        }
    }

    fn ids(&self) -> Result<Vec<ObjectId>, OdbError> {
        Ok(self.index.view().iter_oids().map(|(oid, _)| oid).collect())
    }
}
