//! Content-addressed object store over prioritized providers.
//!
//! `Odb` composes one or more providers: packs (most recently added first)
//! and loose directories, including alternates. A lookup consults the
//! shared object cache, then asks each provider in priority order; the
//! first hit wins. Providers that need an external delta base ask the
//! store back through `BaseResolver`, passing down what remains of the
//! delta-depth budget so chains spanning packs stay bounded.
//!
//! # Concurrency
//! The provider list sits behind an `RwLock` and is snapshotted (a vector
//! of `Arc`s) per lookup, so no lock is held while decoding. The cache has
//! its own `Mutex`.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::AHashSet;

use super::errors::OdbError;
use super::limits::{PackWriteOptions, StoreLimits};
use super::loose::LooseProvider;
use super::object::{Object, ObjectKind};
use super::object_cache::{CacheStats, ObjectCache};
use super::object_id::{ObjectFormat, ObjectId};
use super::pack_idx::write_idx;
use super::pack_provider::PackProvider;
use super::pack_stream::{decode_pack, StreamOptions};
use super::pack_write::encode_pack;

/// Kind and payload size of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
    pub kind: ObjectKind,
    pub size: u64,
}

/// Supplies delta bases that live outside a provider.
pub trait BaseResolver {
    /// Returns the base object, or `None` if no provider has it.
    fn resolve_base(&self, oid: &ObjectId, depth_budget: u8) -> Result<Option<Object>, OdbError>;

    fn resolve_header(
        &self,
        oid: &ObjectId,
        depth_budget: u8,
    ) -> Result<Option<ObjectHeader>, OdbError>;
}

/// Resolver that knows no objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBases;

impl BaseResolver for NoBases {
    fn resolve_base(&self, _oid: &ObjectId, _depth_budget: u8) -> Result<Option<Object>, OdbError> {
        Ok(None)
    }

    fn resolve_header(
        &self,
        _oid: &ObjectId,
        _depth_budget: u8,
    ) -> Result<Option<ObjectHeader>, OdbError> {
        Ok(None)
    }
}

/// One source of objects inside a store.
///
/// `Ok(None)` means "not here"; errors mean the provider has the object but
/// could not produce it.
pub trait ObjectProvider: Send + Sync + fmt::Debug {
    /// Path of the backing file or directory, for logs and errors.
    fn describe(&self) -> &Path;

    fn contains(&self, oid: &ObjectId) -> Result<bool, OdbError>;

    fn read(
        &self,
        oid: &ObjectId,
        bases: &dyn BaseResolver,
        depth_budget: u8,
    ) -> Result<Option<Object>, OdbError>;

    fn header(
        &self,
        oid: &ObjectId,
        bases: &dyn BaseResolver,
        depth_budget: u8,
    ) -> Result<Option<ObjectHeader>, OdbError>;

    /// Every id this provider holds.
    fn ids(&self) -> Result<Vec<ObjectId>, OdbError>;
}

/// Lazy sequence of ids produced by `ObjectStore::iterate`.
pub type ObjectIds<'a> = Box<dyn Iterator<Item = Result<ObjectId, OdbError>> + 'a>;

/// The store contract used by the commit-node index and callers.
pub trait ObjectStore: Send + Sync {
    fn format(&self) -> ObjectFormat;

    /// Returns the object or `NotFound`.
    fn get(&self, oid: &ObjectId) -> Result<Object, OdbError>;

    /// Stores `object` and returns its canonical id. Idempotent.
    fn put(&self, object: &Object) -> Result<ObjectId, OdbError>;

    fn has(&self, oid: &ObjectId) -> Result<bool, OdbError>;

    /// Kind and size, reading as little as the provider allows.
    fn header(&self, oid: &ObjectId) -> Result<ObjectHeader, OdbError> {
        let obj = self.get(oid)?;
        Ok(ObjectHeader {
            kind: obj.kind,
            size: obj.size(),
        })
    }

    /// Ids of stored objects, optionally restricted to one kind. Each id is
    /// yielded once even when several providers hold it.
    fn iterate(&self, kind: Option<ObjectKind>) -> Result<ObjectIds<'_>, OdbError>;

    /// Returns the object, failing if it has a different kind.
    fn get_kind(&self, oid: &ObjectId, expected: ObjectKind) -> Result<Object, OdbError> {
        let obj = self.get(oid)?;
        if obj.kind != expected {
            return Err(OdbError::UnexpectedKind {
                oid: *oid,
                expected,
                actual: obj.kind,
            });
        }
        Ok(obj)
    }
}

#[derive(Debug, Default)]
struct Providers {
    /// Priority order: index 0 is consulted first.
    ordered: Vec<Arc<dyn ObjectProvider>>,
    pack_paths: AHashSet<PathBuf>,
}

/// Result of `Odb::import_pack`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedPack {
    pub pack_path: PathBuf,
    pub checksum: ObjectId,
    pub object_count: usize,
    /// True when the incoming pack was thin and had to be completed.
    pub rewritten: bool,
}

/// Composite object store rooted at an `objects` directory.
#[derive(Debug)]
pub struct Odb {
    format: ObjectFormat,
    objects_dir: PathBuf,
    limits: StoreLimits,
    loose: Arc<LooseProvider>,
    providers: RwLock<Providers>,
    cache: ObjectCache,
}

impl Odb {
    /// Opens the store at `objects_dir`, registering its packs and loose
    /// objects. The directory need not exist yet.
    pub fn open(objects_dir: &Path, format: ObjectFormat, limits: StoreLimits) -> Result<Self, OdbError> {
        Self::open_with_alternates(objects_dir, &[], format, limits)
    }

    /// Like `open`, with alternate object directories consulted after the
    /// primary one.
    pub fn open_with_alternates(
        objects_dir: &Path,
        alternates: &[PathBuf],
        format: ObjectFormat,
        limits: StoreLimits,
    ) -> Result<Self, OdbError> {
        limits
            .try_validate()
            .map_err(|detail| OdbError::InvalidLimits { detail })?;
        let loose = Arc::new(LooseProvider::new(objects_dir, format, limits));
        let odb = Self {
            format,
            objects_dir: objects_dir.to_path_buf(),
            limits,
            loose: Arc::clone(&loose),
            providers: RwLock::new(Providers::default()),
            cache: ObjectCache::new(limits.cache_bytes),
        };
        odb.write_providers().ordered.push(loose);
        odb.rescan_packs()?;

        for alt in alternates {
            let alt_packs = scan_pack_dir(&alt.join("pack"))?;
            for path in alt_packs {
                match PackProvider::open(&path, format, limits) {
                    Ok(pack) => odb.push_pack_back(path, pack),
                    Err(err) => {
                        tracing::warn!(pack = %path.display(), error = %err, "skipping unusable pack");
                    }
                }
            }
            let alt_loose = Arc::new(LooseProvider::new(alt, format, limits));
            tracing::debug!(alternate = %alt.display(), "registered alternate object directory");
            odb.write_providers().ordered.push(alt_loose);
        }
        Ok(odb)
    }

    #[inline]
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    #[inline]
    pub fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn provider_count(&self) -> usize {
        self.read_providers().ordered.len()
    }

    fn read_providers(&self) -> RwLockReadGuard<'_, Providers> {
        self.providers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_providers(&self) -> RwLockWriteGuard<'_, Providers> {
        self.providers.write().unwrap_or_else(|p| p.into_inner())
    }

    fn snapshot(&self) -> Vec<Arc<dyn ObjectProvider>> {
        self.read_providers().ordered.clone()
    }

    /// Registers `provider` ahead of every existing one.
    pub fn add_provider(&self, provider: Arc<dyn ObjectProvider>) {
        tracing::debug!(provider = %provider.describe().display(), "registered provider");
        self.write_providers().ordered.insert(0, provider);
    }

    fn push_pack_front(&self, path: PathBuf, pack: PackProvider) -> bool {
        let mut providers = self.write_providers();
        if !providers.pack_paths.insert(path.clone()) {
            return false;
        }
        tracing::debug!(pack = %path.display(), objects = pack.object_count(), "registered pack");
        providers.ordered.insert(0, Arc::new(pack));
        true
    }

    fn push_pack_back(&self, path: PathBuf, pack: PackProvider) {
        let mut providers = self.write_providers();
        if providers.pack_paths.insert(path) {
            providers.ordered.push(Arc::new(pack));
        }
    }

    /// Registers packs in `objects/pack` that are not yet known.
    ///
    /// Packs are added oldest first so the newest ends up with the highest
    /// priority. Unreadable packs are logged and skipped. Returns the number
    /// of packs added.
    pub fn rescan_packs(&self) -> Result<usize, OdbError> {
        let mut added = 0;
        for path in scan_pack_dir(&self.objects_dir.join("pack"))? {
            if self.read_providers().pack_paths.contains(&path) {
                continue;
            }
            match PackProvider::open(&path, self.format, self.limits) {
                Ok(pack) => {
                    if self.push_pack_front(path, pack) {
                        added += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(pack = %path.display(), error = %err, "skipping unusable pack");
                }
            }
        }
        Ok(added)
    }

    fn check_format(&self, oid: &ObjectId) -> Result<(), OdbError> {
        if oid.format() != self.format {
            return Err(OdbError::FormatMismatch {
                expected: self.format,
                actual: oid.format(),
            });
        }
        Ok(())
    }

    fn lookup(&self, oid: &ObjectId, depth_budget: u8) -> Result<Option<Object>, OdbError> {
        if let Some((kind, data)) = self.cache.get(oid) {
            tracing::trace!(%oid, "object cache hit");
            return Ok(Some(Object::new(kind, data.to_vec())));
        }
        for provider in self.snapshot() {
            if let Some(obj) = provider.read(oid, self, depth_budget)? {
                self.cache.insert(*oid, obj.kind, Arc::from(obj.data.as_slice()));
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    fn lookup_header(&self, oid: &ObjectId, depth_budget: u8) -> Result<Option<ObjectHeader>, OdbError> {
        if let Some((kind, data)) = self.cache.get(oid) {
            return Ok(Some(ObjectHeader {
                kind,
                size: data.len() as u64,
            }));
        }
        for provider in self.snapshot() {
            if let Some(header) = provider.header(oid, self, depth_budget)? {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    /// Object kind via a header-only read.
    pub fn kind(&self, oid: &ObjectId) -> Result<ObjectKind, OdbError> {
        self.header(oid).map(|h| h.kind)
    }

    /// Payload size via a header-only read.
    pub fn size(&self, oid: &ObjectId) -> Result<u64, OdbError> {
        self.header(oid).map(|h| h.size)
    }

    /// Decodes `bytes` as a pack stream and installs it in `objects/pack`.
    ///
    /// The trailer is verified before anything is written, and every entry
    /// is resolved and hashed. REF_DELTA bases absent from the pack are
    /// taken from this store; such thin packs are re-encoded so the stored
    /// pack is self-contained. The new pack gets the highest priority.
    pub fn import_pack(&self, bytes: &[u8]) -> Result<ImportedPack, OdbError> {
        let options = StreamOptions {
            limits: self.limits.decode,
            max_delta_depth: self.limits.max_delta_depth,
        };
        let contents = decode_pack(bytes, self.format, Path::new("<incoming>"), &options, |oid| {
            match self.get(oid) {
                Ok(obj) => Ok(Some(obj)),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(err),
            }
        })?;

        let (pack_bytes, checksum, mut entries, rewritten) = if contents.is_thin() {
            let objects: Vec<Object> = contents
                .objects
                .into_iter()
                .map(|o| Object::new(o.kind, o.data))
                .collect();
            let encoded = encode_pack(self.format, &objects, &PackWriteOptions::DEFAULT)?;
            (encoded.bytes, encoded.checksum, encoded.entries, true)
        } else {
            let entries = contents.idx_entries();
            (bytes.to_vec(), contents.checksum, entries, false)
        };
        let object_count = entries.len();
        let idx_bytes = write_idx(self.format, &mut entries, &checksum);

        let pack_dir = self.objects_dir.join("pack");
        fs::create_dir_all(&pack_dir)?;
        let stem = format!("pack-{}", checksum.to_hex());
        let pack_path = pack_dir.join(format!("{stem}.pack"));
        let idx_path = pack_dir.join(format!("{stem}.idx"));
        // The idx goes last: rescans only pick up packs whose idx exists.
        write_atomically(&pack_dir, &pack_path, &pack_bytes)?;
        write_atomically(&pack_dir, &idx_path, &idx_bytes)?;

        let pack = PackProvider::open(&pack_path, self.format, self.limits)?;
        self.push_pack_front(pack_path.clone(), pack);
        tracing::debug!(pack = %pack_path.display(), objects = object_count, rewritten, "imported pack");
        Ok(ImportedPack {
            pack_path,
            checksum,
            object_count,
            rewritten,
        })
    }

    /// Re-reads `oid` from its provider and checks the content hash.
    pub fn verify_object(&self, oid: &ObjectId) -> Result<(), OdbError> {
        self.check_format(oid)?;
        for provider in self.snapshot() {
            if let Some(obj) = provider.read(oid, self, self.limits.max_delta_depth)? {
                let actual = obj.id(self.format);
                if actual != *oid {
                    return Err(OdbError::IntegrityMismatch {
                        expected: *oid,
                        actual,
                    });
                }
                return Ok(());
            }
        }
        Err(OdbError::not_found(*oid))
    }
}

impl BaseResolver for Odb {
    fn resolve_base(&self, oid: &ObjectId, depth_budget: u8) -> Result<Option<Object>, OdbError> {
        self.lookup(oid, depth_budget)
    }

    fn resolve_header(
        &self,
        oid: &ObjectId,
        depth_budget: u8,
    ) -> Result<Option<ObjectHeader>, OdbError> {
        self.lookup_header(oid, depth_budget)
    }
}

impl ObjectStore for Odb {
    fn format(&self) -> ObjectFormat {
        self.format
    }

    fn get(&self, oid: &ObjectId) -> Result<Object, OdbError> {
        self.check_format(oid)?;
        self.lookup(oid, self.limits.max_delta_depth)?
            .ok_or_else(|| OdbError::not_found(*oid))
    }

    fn put(&self, object: &Object) -> Result<ObjectId, OdbError> {
        let oid = object.id(self.format);
        if self.has(&oid)? {
            return Ok(oid);
        }
        self.loose.write_object(object)
    }

    fn has(&self, oid: &ObjectId) -> Result<bool, OdbError> {
        if oid.format() != self.format {
            return Ok(false);
        }
        if self.cache.get(oid).is_some() {
            return Ok(true);
        }
        for provider in self.snapshot() {
            if provider.contains(oid)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn header(&self, oid: &ObjectId) -> Result<ObjectHeader, OdbError> {
        self.check_format(oid)?;
        self.lookup_header(oid, self.limits.max_delta_depth)?
            .ok_or_else(|| OdbError::not_found(*oid))
    }

    fn iterate(&self, kind: Option<ObjectKind>) -> Result<ObjectIds<'_>, OdbError> {
        Ok(Box::new(OdbIter {
            odb: self,
            providers: self.snapshot(),
            next_provider: 0,
            current: Vec::new().into_iter(),
            seen: AHashSet::new(),
            kind,
            failed: false,
        }))
    }
}

/// Walks providers one at a time, deduplicating ids.
struct OdbIter<'a> {
    odb: &'a Odb,
    providers: Vec<Arc<dyn ObjectProvider>>,
    next_provider: usize,
    current: std::vec::IntoIter<ObjectId>,
    seen: AHashSet<ObjectId>,
    kind: Option<ObjectKind>,
    failed: bool,
}

impl Iterator for OdbIter<'_> {
    type Item = Result<ObjectId, OdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(oid) = self.current.next() {
                if !self.seen.insert(oid) {
                    continue;
                }
                if let Some(want) = self.kind {
                    match self.odb.header(&oid) {
                        Ok(h) if h.kind == want => {}
                        Ok(_) => continue,
                        Err(err) => return Some(Err(err)),
                    }
                }
                return Some(Ok(oid));
            }
            let provider = self.providers.get(self.next_provider)?;
            self.next_provider += 1;
            match provider.ids() {
                Ok(ids) => self.current = ids.into_iter(),
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Lists `*.pack` files with a sibling `.idx`, oldest first.
fn scan_pack_dir(pack_dir: &Path) -> Result<Vec<PathBuf>, OdbError> {
    let entries = match fs::read_dir(pack_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut packs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pack") {
            continue;
        }
        if !path.with_extension("idx").is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified().ok();
        packs.push((modified, path));
    }
    packs.sort();
    Ok(packs.into_iter().map(|(_, p)| p).collect())
}

fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    if path.is_file() {
        return Ok(());
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("pack");
    let tmp_path = dir.join(format!("tmp_{name}.{}", std::process::id()));
    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack_delta::compute_delta;
    use crate::pack_write::PackEncoder;
    use tempfile::tempdir;

    fn blob(data: &[u8]) -> Object {
        Object::new(ObjectKind::Blob, data.to_vec())
    }

    fn open(dir: &Path) -> Odb {
        Odb::open(&dir.join("objects"), ObjectFormat::Sha1, StoreLimits::DEFAULT).unwrap()
    }

    #[test]
    fn put_get_has_round_trip() {
        let dir = tempdir().unwrap();
        let odb = open(dir.path());
        let obj = blob(b"content");
        let oid = odb.put(&obj).unwrap();
        assert_eq!(oid, obj.id(ObjectFormat::Sha1));
        assert!(odb.has(&oid).unwrap());
        assert_eq!(odb.get(&oid).unwrap(), obj);
        assert_eq!(odb.put(&obj).unwrap(), oid);
        assert_eq!(odb.size(&oid).unwrap(), 7);
        assert_eq!(odb.kind(&oid).unwrap(), ObjectKind::Blob);
    }

    #[test]
    fn missing_is_not_found() {
        let dir = tempdir().unwrap();
        let odb = open(dir.path());
        let oid = ObjectId::sha1([3; 20]);
        assert!(!odb.has(&oid).unwrap());
        assert!(odb.get(&oid).unwrap_err().is_not_found());
        assert!(matches!(
            odb.get(&ObjectId::sha256([3; 32])).unwrap_err(),
            OdbError::FormatMismatch { .. }
        ));
    }

    #[test]
    fn get_kind_checks_kind() {
        let dir = tempdir().unwrap();
        let odb = open(dir.path());
        let oid = odb.put(&blob(b"x")).unwrap();
        assert!(matches!(
            odb.get_kind(&oid, ObjectKind::Commit).unwrap_err(),
            OdbError::UnexpectedKind { .. }
        ));
    }

    #[test]
    fn import_pack_registers_with_priority() {
        let dir = tempdir().unwrap();
        let odb = open(dir.path());
        let objects = vec![blob(b"one"), blob(b"two"), Object::new(ObjectKind::Tree, Vec::new())];
        let encoded = encode_pack(ObjectFormat::Sha1, &objects, &PackWriteOptions::DEFAULT).unwrap();

        let imported = odb.import_pack(&encoded.bytes).unwrap();
        assert!(!imported.rewritten);
        assert_eq!(imported.checksum, encoded.checksum);
        assert!(imported.pack_path.is_file());
        assert!(imported.pack_path.with_extension("idx").is_file());
        assert_eq!(odb.provider_count(), 2);

        for obj in &objects {
            assert_eq!(&odb.get(&obj.id(ObjectFormat::Sha1)).unwrap(), obj);
        }

        let trees: Vec<ObjectId> = odb
            .iterate(Some(ObjectKind::Tree))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(trees, vec![objects[2].id(ObjectFormat::Sha1)]);
        assert_eq!(odb.iterate(None).unwrap().count(), 3);

        // A second store over the same directory finds the pack on open.
        let reopened = open(dir.path());
        assert_eq!(reopened.provider_count(), 2);
        assert_eq!(reopened.rescan_packs().unwrap(), 0);
    }

    #[test]
    fn thin_pack_is_completed_from_store() {
        let dir = tempdir().unwrap();
        let odb = open(dir.path());
        let base = blob(&[b'z'; 500]);
        let base_id = odb.put(&base).unwrap();
        let mut data = base.data.clone();
        data.extend_from_slice(b"more");
        let target = blob(&data);

        let mut enc = PackEncoder::new(Vec::new(), ObjectFormat::Sha1, 1, 6).unwrap();
        enc.write_ref_delta(target.id(ObjectFormat::Sha1), &base_id, &compute_delta(&base.data, &target.data))
            .unwrap();
        let (bytes, _, _) = enc.finish().unwrap();

        let imported = odb.import_pack(&bytes).unwrap();
        assert!(imported.rewritten);
        assert_eq!(imported.object_count, 1);
        assert_eq!(odb.get(&target.id(ObjectFormat::Sha1)).unwrap(), target);

        // The rewritten pack stands alone.
        let pack = PackProvider::open(&imported.pack_path, ObjectFormat::Sha1, StoreLimits::DEFAULT).unwrap();
        assert_eq!(
            pack.read(&target.id(ObjectFormat::Sha1), &NoBases, 64).unwrap().unwrap(),
            target
        );
    }

    #[test]
    fn corrupt_import_writes_nothing() {
        let dir = tempdir().unwrap();
        let odb = open(dir.path());
        let encoded = encode_pack(ObjectFormat::Sha1, &[blob(b"a")], &PackWriteOptions::DEFAULT).unwrap();
        let mut bytes = encoded.bytes;
        let n = bytes.len();
        bytes[n - 3] ^= 0xff;
        assert!(matches!(
            odb.import_pack(&bytes).unwrap_err(),
            OdbError::ChecksumMismatch { .. }
        ));
        assert!(!dir.path().join("objects/pack").exists());
    }

    #[test]
    fn alternates_are_consulted_after_primary() {
        let dir = tempdir().unwrap();
        let alt_dir = dir.path().join("alt/objects");
        let alt = Odb::open(&alt_dir, ObjectFormat::Sha1, StoreLimits::DEFAULT).unwrap();
        let oid = alt.put(&blob(b"shared")).unwrap();

        let odb = Odb::open_with_alternates(
            &dir.path().join("objects"),
            &[alt_dir],
            ObjectFormat::Sha1,
            StoreLimits::DEFAULT,
        )
        .unwrap();
        assert!(odb.has(&oid).unwrap());
        assert_eq!(odb.get(&oid).unwrap().data, b"shared");
        odb.verify_object(&oid).unwrap();
    }

    #[test]
    fn cache_serves_repeat_reads() {
        let dir = tempdir().unwrap();
        let odb = open(dir.path());
        let oid = odb.put(&blob(b"cached")).unwrap();
        odb.get(&oid).unwrap();
        assert_eq!(odb.cache_stats().entries, 1);
        odb.get(&oid).unwrap();
        assert_eq!(odb.cache_stats().entries, 1);
    }

    #[test]
    fn packed_object_with_wrong_content_is_rejected() {
        let dir = tempdir().unwrap();
        let a = blob(b"aaaa");
        let b = blob(b"bbbb");
        let encoded = encode_pack(ObjectFormat::Sha1, &[a.clone(), b.clone()], &PackWriteOptions::NO_DELTA).unwrap();
        let mut entries = encoded.entries.clone();
        let (first, second) = (entries[0].offset, entries[1].offset);
        entries[0].offset = second;
        entries[1].offset = first;

        let pack_dir = dir.path().join("objects/pack");
        fs::create_dir_all(&pack_dir).unwrap();
        let stem = pack_dir.join(format!("pack-{}", encoded.checksum.to_hex()));
        fs::write(stem.with_extension("pack"), &encoded.bytes).unwrap();
        fs::write(
            stem.with_extension("idx"),
            write_idx(ObjectFormat::Sha1, &mut entries, &encoded.checksum),
        )
        .unwrap();

        let odb = open(dir.path());
        let a_id = a.id(ObjectFormat::Sha1);
        for _ in 0..2 {
            match odb.get(&a_id).unwrap_err() {
                OdbError::IntegrityMismatch { expected, actual } => {
                    assert_eq!(expected, a_id);
                    assert_eq!(actual, b.id(ObjectFormat::Sha1));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(odb.cache_stats().entries, 0);
    }

    #[test]
    fn invalid_limits_are_an_error() {
        let dir = tempdir().unwrap();
        let limits = StoreLimits {
            max_delta_depth: 0,
            ..StoreLimits::DEFAULT
        };
        match Odb::open(&dir.path().join("objects"), ObjectFormat::Sha1, limits).unwrap_err() {
            OdbError::InvalidLimits { detail } => assert_eq!(detail, "delta depth must be > 0"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
