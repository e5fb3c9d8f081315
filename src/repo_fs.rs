//! Repository filesystem with private/common routing.
//!
//! A linked worktree keeps per-worktree state (HEAD, its reflog, bisect and
//! rewrite refs) under its own git dir while objects, refs and config live
//! in the shared common dir. [`RepositoryFilesystem`] presents both as one
//! tree of logical paths and sends each operation to the right root.
//!
//! Logical paths are slash-separated and relative to the repository root.
//! They are cleaned (`.` dropped, `..` folded) and may not climb above the
//! root.

use std::fmt;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Paths under a common prefix that still belong to the worktree.
const PRIVATE_EXCEPTIONS: &[&str] = &["logs/HEAD", "refs/bisect", "refs/rewritten", "refs/worktree"];

/// Top-level entries shared by all worktrees.
const COMMON_ENTRIES: &[&str] = &[
    "objects",
    "refs",
    "packed-refs",
    "config",
    "branches",
    "hooks",
    "info",
    "remotes",
    "logs",
    "shallow",
    "worktrees",
];

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
#[non_exhaustive]
pub enum FsError {
    Io { path: PathBuf, source: io::Error },
    /// The logical path climbs above the root.
    EscapesRoot { path: String },
    /// Source and destination resolve to different roots.
    CrossRootRename { from: String, to: String },
}

impl FsError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::EscapesRoot { path } => write!(f, "path escapes root: {path}"),
            Self::CrossRootRename { from, to } => {
                write!(f, "cannot rename {from} to {to}: paths live in different roots")
            }
        }
    }
}

impl std::error::Error for FsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Cleans a logical path. The empty string names the root.
pub fn clean_path(path: &str) -> Result<String, FsError> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(FsError::EscapesRoot {
                        path: path.to_string(),
                    });
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Joins logical path elements with `/`, skipping empty ones.
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn under(path: &str, prefix: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// Whether a cleaned logical path belongs to the common root.
pub fn is_common_path(clean: &str) -> bool {
    if PRIVATE_EXCEPTIONS.iter().any(|p| under(clean, p)) {
        return false;
    }
    COMMON_ENTRIES.iter().any(|p| under(clean, p))
}

/// A file created by [`Filesystem::temp_file`].
#[derive(Debug)]
pub struct TempFile {
    /// Logical path of the file.
    pub path: String,
    pub file: File,
}

/// Operations over a tree of logical paths.
pub trait Filesystem: fmt::Debug + Send + Sync {
    /// Physical root directory.
    fn root(&self) -> &Path;

    fn join(&self, parts: &[&str]) -> String {
        join_path(parts)
    }

    /// A handle of the same kind whose logical root is `path`.
    fn chroot(&self, path: &str) -> Result<Self, FsError>
    where
        Self: Sized;

    /// Creates or truncates a file, creating parent directories.
    fn create(&self, path: &str) -> Result<File, FsError>;

    fn open(&self, path: &str) -> Result<File, FsError>;

    /// Opens with caller-supplied options, creating parent directories
    /// first when `create_dirs` is set.
    fn open_file(&self, path: &str, options: &OpenOptions, create_dirs: bool) -> Result<File, FsError>;

    fn stat(&self, path: &str) -> Result<Metadata, FsError>;

    /// Like `stat` but does not follow a final symlink.
    fn lstat(&self, path: &str) -> Result<Metadata, FsError>;

    /// Entry names of a directory, sorted.
    fn read_dir(&self, path: &str) -> Result<Vec<String>, FsError>;

    /// Removes a file, symlink or empty directory.
    fn remove(&self, path: &str) -> Result<(), FsError>;

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;

    /// Creates `path` and missing parents; existing directories are fine.
    fn mkdir_all(&self, path: &str) -> Result<(), FsError>;

    /// Creates a new uniquely named file in `dir`.
    fn temp_file(&self, dir: &str, prefix: &str) -> Result<TempFile, FsError>;

    /// Creates `link` pointing at `target`, stored verbatim.
    fn symlink(&self, target: &str, link: &str) -> Result<(), FsError>;

    fn readlink(&self, link: &str) -> Result<String, FsError>;
}

/// Filesystem over one directory of the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OsFs {
    root: PathBuf,
}

impl OsFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Physical path of a logical one.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let clean = clean_path(path)?;
        if clean.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(clean))
    }

    fn create_parent(full: &Path) -> Result<(), FsError> {
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
        }
        Ok(())
    }
}

impl Filesystem for OsFs {
    fn root(&self) -> &Path {
        &self.root
    }

    fn chroot(&self, path: &str) -> Result<Self, FsError> {
        Ok(OsFs::new(self.resolve(path)?))
    }

    fn create(&self, path: &str) -> Result<File, FsError> {
        let full = self.resolve(path)?;
        Self::create_parent(&full)?;
        File::create(&full).map_err(|e| FsError::io(&full, e))
    }

    fn open(&self, path: &str) -> Result<File, FsError> {
        let full = self.resolve(path)?;
        File::open(&full).map_err(|e| FsError::io(&full, e))
    }

    fn open_file(&self, path: &str, options: &OpenOptions, create_dirs: bool) -> Result<File, FsError> {
        let full = self.resolve(path)?;
        if create_dirs {
            Self::create_parent(&full)?;
        }
        options.open(&full).map_err(|e| FsError::io(&full, e))
    }

    fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        let full = self.resolve(path)?;
        fs::metadata(&full).map_err(|e| FsError::io(&full, e))
    }

    fn lstat(&self, path: &str) -> Result<Metadata, FsError> {
        let full = self.resolve(path)?;
        fs::symlink_metadata(&full).map_err(|e| FsError::io(&full, e))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let full = self.resolve(path)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| FsError::io(&full, e))? {
            let entry = entry.map_err(|e| FsError::io(&full, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn remove(&self, path: &str) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full).map_err(|e| FsError::io(&full, e))?;
        let result = if meta.is_dir() {
            fs::remove_dir(&full)
        } else {
            fs::remove_file(&full)
        };
        result.map_err(|e| FsError::io(&full, e))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        Self::create_parent(&dst)?;
        fs::rename(&src, &dst).map_err(|e| FsError::io(&src, e))
    }

    fn mkdir_all(&self, path: &str) -> Result<(), FsError> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).map_err(|e| FsError::io(&full, e))
    }

    fn temp_file(&self, dir: &str, prefix: &str) -> Result<TempFile, FsError> {
        let dir = clean_path(dir)?;
        self.mkdir_all(&dir)?;
        loop {
            let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            let name = format!("{prefix}{}_{n}", std::process::id());
            let path = join_path(&[&dir, &name]);
            let full = self.resolve(&path)?;
            match OpenOptions::new().write(true).read(true).create_new(true).open(&full) {
                Ok(file) => return Ok(TempFile { path, file }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(FsError::io(&full, e)),
            }
        }
    }

    fn symlink(&self, target: &str, link: &str) -> Result<(), FsError> {
        let full = self.resolve(link)?;
        Self::create_parent(&full)?;
        symlink_impl(Path::new(target), &full).map_err(|e| FsError::io(&full, e))
    }

    fn readlink(&self, link: &str) -> Result<String, FsError> {
        let full = self.resolve(link)?;
        let target = fs::read_link(&full).map_err(|e| FsError::io(&full, e))?;
        Ok(target.to_string_lossy().into_owned())
    }
}

#[cfg(unix)]
fn symlink_impl(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink_impl(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

/// Two roots presented as one repository tree.
///
/// A handle from [`Filesystem::chroot`] keeps both roots and a logical
/// prefix, so paths below it are still routed by their full repository
/// path.
#[derive(Clone, Debug)]
pub struct RepositoryFilesystem {
    private: OsFs,
    common: OsFs,
    /// Cleaned logical path of this handle's root; empty at the top.
    prefix: String,
    /// Physical directory `prefix` routes to.
    root: PathBuf,
}

impl RepositoryFilesystem {
    pub fn new(private_root: impl Into<PathBuf>, common_root: impl Into<PathBuf>) -> Self {
        let private = OsFs::new(private_root);
        let root = private.root.clone();
        Self {
            private,
            common: OsFs::new(common_root),
            prefix: String::new(),
            root,
        }
    }

    pub fn private_fs(&self) -> &OsFs {
        &self.private
    }

    pub fn common_fs(&self) -> &OsFs {
        &self.common
    }

    /// Logical path of this handle's root within the repository.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether both roots are the same directory.
    pub fn is_single_root(&self) -> bool {
        self.private.root == self.common.root
    }

    /// Picks the root for `path`, returning it with the cleaned
    /// repository-relative path.
    pub fn route(&self, path: &str) -> Result<(&OsFs, String), FsError> {
        let clean = clean_path(path)?;
        let full = join_path(&[&self.prefix, &clean]);
        let fs = if !self.is_single_root() && is_common_path(&full) {
            &self.common
        } else {
            &self.private
        };
        Ok((fs, full))
    }

    /// Physical path of a logical one.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, FsError> {
        let (fs, full) = self.route(path)?;
        fs.resolve(&full)
    }

    /// Repository-relative path back to one relative to this handle.
    fn local<'p>(&self, full: &'p str) -> &'p str {
        if self.prefix.is_empty() {
            return full;
        }
        full.strip_prefix(self.prefix.as_str())
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(full)
    }
}

impl Filesystem for RepositoryFilesystem {
    fn root(&self) -> &Path {
        &self.root
    }

    fn chroot(&self, path: &str) -> Result<Self, FsError> {
        let clean = clean_path(path)?;
        let prefix = join_path(&[&self.prefix, &clean]);
        let base = if !self.is_single_root() && is_common_path(&prefix) {
            &self.common
        } else {
            &self.private
        };
        let root = base.resolve(&prefix)?;
        Ok(Self {
            private: self.private.clone(),
            common: self.common.clone(),
            prefix,
            root,
        })
    }

    fn create(&self, path: &str) -> Result<File, FsError> {
        let (fs, full) = self.route(path)?;
        fs.create(&full)
    }

    fn open(&self, path: &str) -> Result<File, FsError> {
        let (fs, full) = self.route(path)?;
        fs.open(&full)
    }

    fn open_file(&self, path: &str, options: &OpenOptions, create_dirs: bool) -> Result<File, FsError> {
        let (fs, full) = self.route(path)?;
        fs.open_file(&full, options, create_dirs)
    }

    fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        let (fs, full) = self.route(path)?;
        fs.stat(&full)
    }

    fn lstat(&self, path: &str) -> Result<Metadata, FsError> {
        let (fs, full) = self.route(path)?;
        fs.lstat(&full)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<String>, FsError> {
        let (fs, full) = self.route(path)?;
        fs.read_dir(&full)
    }

    fn remove(&self, path: &str) -> Result<(), FsError> {
        let (fs, full) = self.route(path)?;
        fs.remove(&full)
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let (src_fs, src) = self.route(from)?;
        let (dst_fs, dst) = self.route(to)?;
        if src_fs.root != dst_fs.root {
            return Err(FsError::CrossRootRename { from: src, to: dst });
        }
        src_fs.rename(&src, &dst)
    }

    fn mkdir_all(&self, path: &str) -> Result<(), FsError> {
        let (fs, full) = self.route(path)?;
        fs.mkdir_all(&full)
    }

    fn temp_file(&self, dir: &str, prefix: &str) -> Result<TempFile, FsError> {
        let (fs, full) = self.route(dir)?;
        let mut tmp = fs.temp_file(&full, prefix)?;
        tmp.path = self.local(&tmp.path).to_string();
        Ok(tmp)
    }

    fn symlink(&self, target: &str, link: &str) -> Result<(), FsError> {
        let (fs, full) = self.route(link)?;
        fs.symlink(target, &full)
    }

    fn readlink(&self, link: &str) -> Result<String, FsError> {
        let (fs, full) = self.route(link)?;
        fs.readlink(&full)
    }
}
