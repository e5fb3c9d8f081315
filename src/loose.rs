//! Loose object provider.
//!
//! Objects live at `objects/<first byte hex>/<remaining hex>`, each a zlib
//! stream of `<kind> <size>\0<content>`. Reads inflate under the configured
//! size cap, validate the header, and re-hash the content so a corrupted or
//! misplaced file is reported instead of returned. Header-only reads
//! inflate just enough bytes to see the terminator.
//!
//! Writes are atomic: the compressed object goes to a uniquely named temp
//! file in the objects directory and is renamed into place. An object that
//! already exists is not rewritten.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::errors::OdbError;
use super::limits::StoreLimits;
use super::object::{compute_id, write_header, Object, ObjectKind};
use super::object_id::{ObjectFormat, ObjectId};
use super::object_store::{BaseResolver, ObjectHeader, ObjectProvider};
use super::pack_inflate::{inflate_limited, inflate_prefix};

/// Longest header we accept: `"commit "` plus 20 digits plus NUL.
const LOOSE_HEADER_MAX_BYTES: usize = 32;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Reads and writes loose objects under one objects directory.
#[derive(Debug)]
pub struct LooseProvider {
    objects_dir: PathBuf,
    format: ObjectFormat,
    limits: StoreLimits,
}

impl LooseProvider {
    pub fn new(objects_dir: impl Into<PathBuf>, format: ObjectFormat, limits: StoreLimits) -> Self {
        Self {
            objects_dir: objects_dir.into(),
            format,
            limits,
        }
    }

    #[inline]
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Path the object with `oid` would occupy.
    pub fn object_path(&self, oid: &ObjectId) -> PathBuf {
        let hex = oid.to_hex();
        let (dir, file) = hex.split_at(2);
        self.objects_dir.join(dir).join(file)
    }

    fn read_raw(&self, oid: &ObjectId) -> Result<Option<Vec<u8>>, OdbError> {
        match fs::read(self.object_path(oid)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads and verifies the object; `Ok(None)` when absent.
    pub fn read_object(&self, oid: &ObjectId) -> Result<Option<Object>, OdbError> {
        self.check_format(oid)?;
        let Some(compressed) = self.read_raw(oid)? else {
            return Ok(None);
        };
        let max_payload = self.limits.decode.max_object_bytes;
        let max_out = max_payload.saturating_add(LOOSE_HEADER_MAX_BYTES);
        let mut out = Vec::new();
        inflate_limited(&compressed, &mut out, max_out).map_err(|_| OdbError::CorruptLooseObject {
            oid: *oid,
            detail: "inflate failed",
        })?;

        let (kind, size, header_len) = parse_header(&out).map_err(|detail| {
            OdbError::CorruptLooseObject { oid: *oid, detail }
        })?;
        if size > max_payload as u64 {
            return Err(OdbError::TooLarge {
                oid: *oid,
                size,
                max: max_payload,
            });
        }
        if (out.len() - header_len) as u64 != size {
            return Err(OdbError::CorruptLooseObject {
                oid: *oid,
                detail: "object size mismatch",
            });
        }
        out.drain(..header_len);

        let actual = compute_id(self.format, kind, &out);
        if actual != *oid {
            return Err(OdbError::IntegrityMismatch {
                expected: *oid,
                actual,
            });
        }
        tracing::trace!(%oid, %kind, size, "loose object read");
        Ok(Some(Object { kind, data: out }))
    }

    /// Reads kind and size without inflating the content.
    pub fn read_header(&self, oid: &ObjectId) -> Result<Option<ObjectHeader>, OdbError> {
        self.check_format(oid)?;
        let Some(compressed) = self.read_raw(oid)? else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(LOOSE_HEADER_MAX_BYTES);
        inflate_prefix(&compressed, &mut out, LOOSE_HEADER_MAX_BYTES).map_err(|_| {
            OdbError::CorruptLooseObject {
                oid: *oid,
                detail: "inflate failed",
            }
        })?;
        let (kind, size, _) =
            parse_header(&out).map_err(|detail| OdbError::CorruptLooseObject { oid: *oid, detail })?;
        Ok(Some(ObjectHeader { kind, size }))
    }

    /// Writes `object` if it is not already present; returns its id.
    pub fn write_object(&self, object: &Object) -> Result<ObjectId, OdbError> {
        let oid = compute_id(self.format, object.kind, &object.data);
        let path = self.object_path(&oid);
        if path.is_file() {
            return Ok(oid);
        }

        let mut framed = Vec::with_capacity(object.data.len() + LOOSE_HEADER_MAX_BYTES);
        write_header(object.kind, object.data.len() as u64, &mut framed);
        framed.extend_from_slice(&object.data);
        let mut enc = ZlibEncoder::new(Vec::with_capacity(framed.len() / 2 + 16), Compression::default());
        enc.write_all(&framed)?;
        let compressed = enc.finish()?;

        fs::create_dir_all(&self.objects_dir)?;
        let tmp_path = self.objects_dir.join(format!(
            "tmp_obj_{}_{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let result = write_then_rename(&tmp_path, &path, &compressed);
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result?;
        tracing::trace!(%oid, kind = %object.kind, "loose object written");
        Ok(oid)
    }

    /// Every loose object id, in directory order.
    pub fn list_ids(&self) -> Result<Vec<ObjectId>, OdbError> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.objects_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(err) => return Err(err.into()),
        };
        let rest_len = self.format.hex_len() as usize - 2;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(prefix) = name.to_str() else { continue };
            if prefix.len() != 2 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(entry.path())? {
                let file = file?;
                let file_name = file.file_name();
                let Some(rest) = file_name.to_str() else { continue };
                if rest.len() != rest_len {
                    continue;
                }
                let mut hex = String::with_capacity(rest_len + 2);
                hex.push_str(prefix);
                hex.push_str(rest);
                if let Ok(oid) = ObjectId::from_hex(hex.as_bytes()) {
                    ids.push(oid);
                }
            }
        }
        Ok(ids)
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
}

fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(tmp_path, path)
}

/// Parses `<kind> <size>\0`; returns kind, size, and header length.
fn parse_header(bytes: &[u8]) -> Result<(ObjectKind, u64, usize), &'static str> {
    let nul = memchr::memchr(0, bytes).ok_or("missing object header terminator")?;
    let header = &bytes[..nul];
    let space = memchr::memchr(b' ', header).ok_or("missing object size")?;
    let kind = ObjectKind::from_name(&header[..space]).ok_or("unknown loose object type")?;
    let size = parse_decimal(&header[space + 1..]).ok_or("invalid object size")?;
    Ok((kind, size, nul + 1))
}

fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    Some(value)
}

impl ObjectProvider for LooseProvider {
    fn describe(&self) -> &Path {
        &self.objects_dir
    }

    fn contains(&self, oid: &ObjectId) -> Result<bool, OdbError> {
        Ok(oid.format() == self.format && self.object_path(oid).is_file())
    }

    fn read(
        &self,
        oid: &ObjectId,
        _bases: &dyn BaseResolver,
        _depth_budget: u8,
    ) -> Result<Option<Object>, OdbError> {
        self.read_object(oid)
    }

    fn header(
        &self,
        oid: &ObjectId,
        _bases: &dyn BaseResolver,
        _depth_budget: u8,
    ) -> Result<Option<ObjectHeader>, OdbError> {
        self.read_header(oid)
    }

    fn ids(&self) -> Result<Vec<ObjectId>, OdbError> {
        self.list_ids()
    }
}
