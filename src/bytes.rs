//! Shared read-only byte container for pack, idx, and commit-graph data.
//!
//! Backed by either an mmap (files on disk) or reference-counted owned
//! bytes (freshly written packs, tests). Clones are cheap and the bytes are
//! immutable for the lifetime of every clone.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

/// Read-only byte view.
#[derive(Clone, Debug)]
pub struct BytesView {
    inner: BytesInner,
}

#[derive(Clone, Debug)]
enum BytesInner {
    Mmap(Arc<Mmap>),
    Owned(Arc<[u8]>),
}

impl BytesView {
    /// Maps `path` read-only.
    ///
    /// The file handle is closed before returning; the mapping keeps the
    /// contents alive. Empty files become an empty owned view since
    /// zero-length mappings are rejected on some platforms.
    pub fn map_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self::from_vec(Vec::new()));
        }
        // SAFETY: the mapping is read-only, and pack, idx and commit-graph
        // files are write-once; writers publish new files by rename
        // instead of rewriting existing ones.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::from_mmap(mmap))
    }

    #[must_use]
    pub fn from_mmap(mmap: Mmap) -> Self {
        Self {
            inner: BytesInner::Mmap(Arc::new(mmap)),
        }
    }

    #[must_use]
    pub fn from_arc(bytes: Arc<[u8]>) -> Self {
        Self {
            inner: BytesInner::Owned(bytes),
        }
    }

    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self::from_arc(Arc::from(bytes))
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        match &self.inner {
            BytesInner::Mmap(mmap) => mmap.as_ref(),
            BytesInner::Owned(bytes) => bytes.as_ref(),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// True when backed by a file mapping.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        matches!(self.inner, BytesInner::Mmap(_))
    }
}

impl AsRef<[u8]> for BytesView {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_bytes_round_trip() {
        let view = BytesView::from_vec(vec![1u8, 2, 3]);
        assert_eq!(view.len(), 3);
        assert_eq!(view.as_slice(), &[1, 2, 3]);
        assert!(!view.is_mapped());
    }

    #[test]
    fn maps_files_and_handles_empty() {
        let dir = tempfile::tempdir().unwrap();
        let full = dir.path().join("full");
        let empty = dir.path().join("empty");
        std::fs::write(&full, b"PACK").unwrap();
        std::fs::write(&empty, b"").unwrap();

        let view = BytesView::map_file(&full).unwrap();
        assert!(view.is_mapped());
        assert_eq!(view.as_slice(), b"PACK");

        let view = BytesView::map_file(&empty).unwrap();
        assert!(view.is_empty());
    }
}
