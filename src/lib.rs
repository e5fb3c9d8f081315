//! Content-addressed object database and commit-history engine.
//!
//! ## Scope
//! This crate stores and retrieves hash-addressed objects (commits, trees,
//! blobs, tags) from loose files and packfiles, reads and writes commit-graph
//! files to accelerate ancestry queries, and walks history in topological,
//! committer-date or author-date order.
//!
//! ## Key invariants
//! - `id = hash("<kind> <size>\0" ++ content)`; equal content has one id.
//! - Delta resolution is iterative and bounded by `StoreLimits::max_delta_depth`.
//! - Every decode is bounded by explicit limits; exceeding one is an error,
//!   never a truncation.
//! - Checksums are verified on open for pack indexes and commit-graphs, and
//!   on import for packs.
//! - Traversals emit each commit once, children before parents.
//!
//! ## Data flow
//! `RepositoryFilesystem -> pack / commit-graph codecs -> Odb / CommitNodeIndex
//! -> CommitWalk -> caller`
//!
//! ## Notable entry points
//! - [`Repository`]: discovery plus wiring of the pieces below.
//! - [`Odb`] / [`ObjectStore`]: get/put/has/iterate, pack import.
//! - [`CommitGraph`] and [`write_commit_graph`]: graph files and chains.
//! - [`CommitNodeIndex`] and [`CommitWalk`]: ordered history walks.
//! - [`RepositoryFilesystem`]: private/common path routing.

pub mod bytes;
pub mod commit_graph;
pub mod commit_graph_write;
pub mod commit_node;
pub mod commit_parse;
pub mod commit_walk;
pub mod errors;
pub mod limits;
pub mod loose;
pub mod object;
pub mod object_cache;
pub mod object_id;
pub mod object_store;
pub mod pack_delta;
pub mod pack_idx;
pub mod pack_inflate;
pub mod pack_provider;
pub mod pack_stream;
pub mod pack_write;
pub mod repo;
pub mod repo_fs;

pub use commit_graph::{ChunkId, CommitGraph, CommitGraphError, CommitGraphFile, GraphCommit};
pub use commit_graph_write::{collect_graph_inputs, write_commit_graph, GraphInput};
pub use commit_node::{
    open_index, ChainedCommitNodeIndex, CommitNode, CommitNodeIndex, GraphCommitNodeIndex,
    ObjectCommitNodeIndex,
};
pub use commit_walk::{
    author_date_order, commit_date_order, topo_order, CommitWalk, Visit, WalkOrder,
};
pub use errors::{ChecksumTarget, OdbError, RepoOpenError};
pub use limits::{CommitParseLimits, PackDecodeLimits, PackWriteOptions, RepoLimits, StoreLimits};
pub use object::{compute_id, Object, ObjectKind};
pub use object_id::{ObjectFormat, ObjectId};
pub use object_store::{ImportedPack, ObjectHeader, ObjectProvider, ObjectStore, Odb};
pub use pack_delta::{apply_delta, compute_delta};
pub use pack_stream::{decode_pack, PackContents, StreamOptions};
pub use pack_write::{encode_pack, EncodedPack, PackEncoder};
pub use repo::{RepoKind, RepoPaths, Repository, RepositoryOptions};
pub use repo_fs::{Filesystem, FsError, OsFs, RepositoryFilesystem};
