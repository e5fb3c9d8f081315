//! Repository discovery and wiring.
//!
//! Handles:
//! - Normal worktrees (`.git` directory)
//! - Linked worktrees (`.git` file pointing to `worktrees/<n>`, whose
//!   `commondir` names the shared directory)
//! - Bare repositories (`HEAD` + `objects` in the root)
//! - Alternates (`objects/info/alternates`)
//!
//! # Invariants
//! - Metadata reads are bounded by [`RepoLimits`].
//! - Returned paths are canonicalized and exist at resolution time,
//!   except `pack_dir`, which may be missing in an empty repository.
//!
//! # Trust Model
//! Repository contents (`.git` files, `commondir`, `alternates`) are
//! trusted and followed wherever they point, as Git does.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::commit_graph::CommitGraph;
use super::commit_graph_write::{
    collect_graph_inputs, install_graph_layer, install_single_graph, write_commit_graph,
};
use super::commit_node::{open_index, CommitNodeIndex};
use super::errors::{OdbError, RepoOpenError};
use super::limits::{CommitParseLimits, RepoLimits, StoreLimits};
use super::object_id::{ObjectFormat, ObjectId};
use super::object_store::{ObjectStore, Odb};
use super::repo_fs::RepositoryFilesystem;

/// Everything tunable when opening a repository.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RepositoryOptions {
    pub format: ObjectFormat,
    pub store: StoreLimits,
    pub repo: RepoLimits,
    pub commit: CommitParseLimits,
}

impl RepositoryOptions {
    pub const RESTRICTIVE: Self = Self {
        format: ObjectFormat::Sha1,
        store: StoreLimits::RESTRICTIVE,
        repo: RepoLimits::RESTRICTIVE,
        commit: CommitParseLimits::RESTRICTIVE,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepoKind {
    Worktree,
    Bare,
}

/// Resolved repository locations.
#[derive(Clone, Debug)]
pub struct RepoPaths {
    pub kind: RepoKind,
    /// `None` for bare repositories.
    pub worktree_root: Option<PathBuf>,
    /// Per-worktree git directory; the private root of the filesystem.
    pub git_dir: PathBuf,
    /// Shared directory; equals `git_dir` outside linked worktrees.
    pub common_dir: PathBuf,
    pub objects_dir: PathBuf,
    pub pack_dir: PathBuf,
    /// Immediate alternates only; not expanded recursively.
    pub alternate_object_dirs: Vec<PathBuf>,
}

impl RepoPaths {
    /// Resolves paths from a worktree root or bare repository root.
    ///
    /// A `.git` directory or file wins; otherwise the root is accepted as
    /// bare when `HEAD` and `objects` exist along with `refs` or `config`.
    pub fn resolve(repo_root: &Path, limits: &RepoLimits) -> Result<Self, RepoOpenError> {
        if repo_root.as_os_str().is_empty() {
            return Err(RepoOpenError::NotARepository);
        }
        let dot_git = repo_root.join(".git");

        match fs::symlink_metadata(&dot_git) {
            Ok(meta) if meta.is_dir() => {
                let git_dir = canonicalize_path(&dot_git)?;
                let worktree_root = Some(canonicalize_path(repo_root)?);
                return Self::from_git_dir(RepoKind::Worktree, worktree_root, git_dir, limits);
            }
            Ok(meta) if meta.is_file() => {
                let git_dir = parse_gitdir_file(&dot_git, repo_root, limits)?;
                let worktree_root = Some(canonicalize_path(repo_root)?);
                return Self::from_git_dir(RepoKind::Worktree, worktree_root, git_dir, limits);
            }
            _ => {}
        }

        let is_bare = is_file(&repo_root.join("HEAD"))
            && is_dir(&repo_root.join("objects"))
            && (is_dir(&repo_root.join("refs")) || is_file(&repo_root.join("config")));
        if is_bare {
            let git_dir = canonicalize_path(repo_root)?;
            return Self::from_git_dir(RepoKind::Bare, None, git_dir, limits);
        }

        Err(RepoOpenError::NotARepository)
    }

    #[inline]
    #[must_use]
    pub fn is_linked_worktree(&self) -> bool {
        self.git_dir != self.common_dir
    }

    fn from_git_dir(
        kind: RepoKind,
        worktree_root: Option<PathBuf>,
        git_dir: PathBuf,
        limits: &RepoLimits,
    ) -> Result<Self, RepoOpenError> {
        let common_dir = resolve_common_dir(&git_dir, limits)?;

        let objects_dir = common_dir.join("objects");
        if !is_dir(&objects_dir) {
            return Err(RepoOpenError::ObjectsDirNotDir);
        }
        let objects_dir = canonicalize_path(&objects_dir)?;
        let pack_dir = objects_dir.join("pack");
        let alternate_object_dirs = parse_alternates(&objects_dir, limits)?;

        Ok(Self {
            kind,
            worktree_root,
            git_dir,
            common_dir,
            objects_dir,
            pack_dir,
            alternate_object_dirs,
        })
    }
}

/// An opened repository: routed filesystem, object store and commit-graph
/// access.
pub struct Repository {
    paths: RepoPaths,
    fs: RepositoryFilesystem,
    odb: Arc<Odb>,
    options: RepositoryOptions,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("git_dir", &self.paths.git_dir)
            .field("common_dir", &self.paths.common_dir)
            .field("format", &self.options.format)
            .finish()
    }
}

impl Repository {
    pub fn open(repo_root: &Path, options: RepositoryOptions) -> Result<Self, RepoOpenError> {
        let checks = [
            options.store.try_validate(),
            options.repo.try_validate(),
            options.commit.try_validate(),
        ];
        if let Some(Err(detail)) = checks.into_iter().find(Result::is_err) {
            return Err(RepoOpenError::InvalidLimits { detail });
        }
        let paths = RepoPaths::resolve(repo_root, &options.repo)?;
        let odb = Odb::open_with_alternates(
            &paths.objects_dir,
            &paths.alternate_object_dirs,
            options.format,
            options.store,
        )?;
        let fs = RepositoryFilesystem::new(&paths.git_dir, &paths.common_dir);
        tracing::debug!(
            git_dir = %paths.git_dir.display(),
            linked = paths.is_linked_worktree(),
            alternates = paths.alternate_object_dirs.len(),
            "opened repository"
        );
        Ok(Self {
            paths,
            fs,
            odb: Arc::new(odb),
            options,
        })
    }

    /// Creates the skeleton of a bare repository at `root` and opens it.
    pub fn init_bare(root: &Path, options: RepositoryOptions) -> Result<Self, RepoOpenError> {
        for dir in ["objects/pack", "objects/info", "refs/heads", "refs/tags"] {
            fs::create_dir_all(root.join(dir)).map_err(RepoOpenError::Io)?;
        }
        let head = root.join("HEAD");
        if !head.exists() {
            fs::write(&head, b"ref: refs/heads/main\n").map_err(RepoOpenError::Io)?;
        }
        Self::open(root, options)
    }

    pub fn paths(&self) -> &RepoPaths {
        &self.paths
    }

    pub fn fs(&self) -> &RepositoryFilesystem {
        &self.fs
    }

    pub fn odb(&self) -> &Arc<Odb> {
        &self.odb
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.odb) as Arc<dyn ObjectStore>
    }

    /// The commit-graph chain or file, if any.
    pub fn commit_graph(&self) -> Result<Option<CommitGraph>, OdbError> {
        CommitGraph::open(&self.paths.objects_dir, self.options.format, &self.options.repo)
    }

    /// Commit node index over the graph when usable, else the store.
    pub fn commit_index(&self) -> Box<dyn CommitNodeIndex + Send + Sync> {
        open_index(
            self.store(),
            &self.paths.objects_dir,
            &self.options.repo,
            self.options.commit,
        )
    }

    /// Rewrites `objects/info/commit-graph` to cover history reachable
    /// from `tips`.
    pub fn write_commit_graph(&self, tips: &[ObjectId]) -> Result<PathBuf, OdbError> {
        let inputs = collect_graph_inputs(self.odb.as_ref(), tips, None, &self.options.commit)?;
        let bytes = write_commit_graph(self.options.format, &inputs, None).map_err(|source| {
            OdbError::MalformedCommitGraph {
                path: self.paths.objects_dir.join("info").join("commit-graph"),
                source,
            }
        })?;
        Ok(install_single_graph(&self.paths.objects_dir, &bytes)?)
    }

    /// Appends a chain layer covering commits reachable from `tips` that
    /// the current graph lacks. Returns `None` when nothing is new.
    pub fn append_commit_graph_layer(&self, tips: &[ObjectId]) -> Result<Option<PathBuf>, OdbError> {
        let base = match self.commit_graph()? {
            // A lone file cannot be a chain base; restart the chain.
            Some(g) if g.layers().iter().all(|l| l.path().ends_with("commit-graph")) => None,
            other => other,
        };
        let inputs = collect_graph_inputs(self.odb.as_ref(), tips, base.as_ref(), &self.options.commit)?;
        if inputs.is_empty() {
            return Ok(None);
        }
        let chain_dir = self.paths.objects_dir.join("info").join("commit-graphs");
        let bytes = write_commit_graph(self.options.format, &inputs, base.as_ref())
            .map_err(|source| OdbError::MalformedCommitGraph {
                path: chain_dir.join("commit-graph-chain"),
                source,
            })?;
        Ok(Some(install_graph_layer(&self.paths.objects_dir, self.options.format, &bytes)?))
    }
}

/// Parses a `.git` file (`gitdir: <path>`); relative paths resolve against
/// the worktree root.
fn parse_gitdir_file(dot_git_file: &Path, base_dir: &Path, limits: &RepoLimits) -> Result<PathBuf, RepoOpenError> {
    let bytes = read_bounded_file(dot_git_file, limits.max_dot_git_file_bytes)?;
    let path = parse_gitdir_bytes(&bytes).ok_or(RepoOpenError::MalformedGitdirFile)?;
    let canonical = canonicalize_path(&resolve_path(base_dir, &path))?;
    if !is_dir(&canonical) {
        return Err(RepoOpenError::GitdirTargetNotDir);
    }
    Ok(canonical)
}

fn parse_gitdir_bytes(bytes: &[u8]) -> Option<PathBuf> {
    let rest = bytes.strip_prefix(b"gitdir:")?;
    let path = trim_line_end(rest.trim_ascii_start());
    if path.is_empty() {
        return None;
    }
    Some(bytes_to_path(path))
}

/// The `commondir` file, when present, is relative to `git_dir`.
fn resolve_common_dir(git_dir: &Path, limits: &RepoLimits) -> Result<PathBuf, RepoOpenError> {
    let commondir_file = git_dir.join("commondir");
    if !is_file(&commondir_file) {
        return Ok(git_dir.to_path_buf());
    }
    let bytes = read_bounded_file(&commondir_file, limits.max_commondir_file_bytes)?;
    let path = trim_line_end(&bytes);
    if path.is_empty() {
        return Err(RepoOpenError::MalformedCommondirFile);
    }
    let canonical = canonicalize_path(&resolve_path(git_dir, &bytes_to_path(path)))?;
    if !is_dir(&canonical) {
        return Err(RepoOpenError::CommonDirNotDir);
    }
    Ok(canonical)
}

/// One path per line; blank lines and `#` comments are skipped. Relative
/// paths resolve against the `objects` directory.
fn parse_alternates(objects_dir: &Path, limits: &RepoLimits) -> Result<Vec<PathBuf>, RepoOpenError> {
    let alternates_file = objects_dir.join("info").join("alternates");
    if !is_file(&alternates_file) {
        return Ok(Vec::new());
    }
    let bytes = read_bounded_file(&alternates_file, limits.max_alternates_file_bytes)?;

    let max_count = limits.max_alternates_count as usize;
    let mut alternates = Vec::with_capacity(max_count.min(8));
    for line in bytes.split(|&b| b == b'\n') {
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() || trimmed.starts_with(b"#") {
            continue;
        }
        if alternates.len() >= max_count {
            tracing::warn!(
                file = %alternates_file.display(),
                max_count,
                "ignoring alternates past the limit"
            );
            break;
        }
        let resolved = resolve_path(objects_dir, &bytes_to_path(trimmed));
        let canonical = fs::canonicalize(&resolved).map_err(|_| RepoOpenError::AlternateNotDir)?;
        if !is_dir(&canonical) {
            return Err(RepoOpenError::AlternateNotDir);
        }
        alternates.push(canonical);
    }
    Ok(alternates)
}

fn trim_line_end(mut bytes: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = bytes.split_last() {
        if last != b'\n' && last != b'\r' {
            break;
        }
        bytes = rest;
    }
    bytes
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn canonicalize_path(path: &Path) -> Result<PathBuf, RepoOpenError> {
    fs::canonicalize(path).map_err(RepoOpenError::Canonicalization)
}

/// Size is checked via metadata; the read is also capped in case the file
/// grows concurrently.
fn read_bounded_file(path: &Path, max_bytes: u32) -> Result<Vec<u8>, RepoOpenError> {
    let file = File::open(path).map_err(RepoOpenError::Io)?;
    let metadata = file.metadata().map_err(RepoOpenError::Io)?;
    if metadata.len() > max_bytes as u64 {
        return Err(RepoOpenError::FileTooLarge {
            size: metadata.len(),
            limit: max_bytes,
        });
    }
    let mut buffer = Vec::with_capacity(metadata.len() as usize);
    file.take(max_bytes as u64)
        .read_to_end(&mut buffer)
        .map_err(RepoOpenError::Io)?;
    Ok(buffer)
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).as_ref())
}

#[inline]
fn is_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

#[inline]
fn is_dir(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}
