//! Commit-graph files and chains.
//!
//! A commit-graph file caches, per commit, the root tree, parent positions,
//! generation number and committer time, so history walks avoid inflating
//! commit objects. Files are either a single `objects/info/commit-graph`
//! or a chain of layers listed (oldest first) in
//! `objects/info/commit-graphs/commit-graph-chain`.
//!
//! # Layout
//! ```text
//! +--------------------+
//! | "CGPH" (4B)        |
//! | version (1B) = 1   |
//! | hash version (1B)  |  1 = SHA-1, 2 = SHA-256
//! | chunk count (1B)   |
//! | base count (1B)    |  layers below this one in a chain
//! +--------------------+
//! | chunk table        |  (id 4B, offset 8B) * (count + 1), zero id last
//! +--------------------+
//! | OIDF  256 * u32    |  cumulative fanout
//! | OIDL  N * oid      |  strictly sorted ids
//! | CDAT  N * record   |  tree, p1, p2, gen/time
//! | EDGE  (optional)   |  extra parents of octopus merges
//! | BIDX/BDAT (opt.)   |  changed-path bloom filters
//! | BASE  (optional)   |  checksums of base layers
//! +--------------------+
//! | checksum           |
//! +--------------------+
//! ```
//!
//! # Positions
//! A position is global across a chain: layer `k` numbers its commits
//! after all commits of layers `0..k`, and parent references inside any
//! layer use these global positions.

use std::fmt;
use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::bytes::BytesView;
use super::errors::{ChecksumTarget, OdbError};
use super::limits::RepoLimits;
use super::object::checksum;
use super::object_id::{ObjectFormat, ObjectId};
use super::pack_inflate::be_u32;

pub(crate) const GRAPH_MAGIC: [u8; 4] = *b"CGPH";
pub(crate) const GRAPH_VERSION: u8 = 1;
pub(crate) const GRAPH_HEADER_SIZE: usize = 8;
pub(crate) const CHUNK_ENTRY_SIZE: usize = 12;
pub(crate) const FANOUT_ENTRIES: usize = 256;
const FANOUT_SIZE: usize = FANOUT_ENTRIES * 4;

pub(crate) const CHUNK_OIDF: [u8; 4] = *b"OIDF";
pub(crate) const CHUNK_OIDL: [u8; 4] = *b"OIDL";
pub(crate) const CHUNK_CDAT: [u8; 4] = *b"CDAT";
pub(crate) const CHUNK_EDGE: [u8; 4] = *b"EDGE";
pub(crate) const CHUNK_BIDX: [u8; 4] = *b"BIDX";
pub(crate) const CHUNK_BDAT: [u8; 4] = *b"BDAT";
pub(crate) const CHUNK_BASE: [u8; 4] = *b"BASE";

/// Parent slot value meaning "no parent".
pub(crate) const PARENT_NONE: u32 = 0x7000_0000;
/// Set on parent2 when it indexes the EDGE list; set on the last EDGE entry.
pub(crate) const EDGE_FLAG: u32 = 0x8000_0000;
/// Bytes of the BDAT header (version, hash count, bits per entry).
pub(crate) const BDAT_HEADER_SIZE: usize = 12;

/// Highest generation number the 30-bit field holds.
pub const GENERATION_MAX: u32 = (1 << 30) - 1;

/// Chain files longer than this are rejected.
const MAX_CHAIN_LAYERS: usize = 512;

/// A 4-byte chunk identifier, printed as ASCII when possible.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ChunkId(pub [u8; 4]);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|&b| b.is_ascii_graphic()) {
            for &b in &self.0 {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(
                f,
                "[{:02x}, {:02x}, {:02x}, {:02x}]",
                self.0[0], self.0[1], self.0[2], self.0[3]
            )
        }
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({self})")
    }
}

/// Structural problems in a commit-graph file or chain.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommitGraphError {
    Corrupt { detail: &'static str },
    UnsupportedVersion { version: u8 },
    HashVersionMismatch { found: u8, expected: ObjectFormat },
    MissingChunk { chunk: ChunkId },
    DuplicateChunk { chunk: ChunkId },
    InvalidChunkSize {
        chunk: ChunkId,
        actual: u64,
        expected: u64,
    },
    /// A parent reference points past the commits known to the chain.
    ParentOutOfRange { position: u32, count: u32 },
    EdgeOutOfRange { index: u32 },
    /// A commit handed to the writer names a parent absent from the graph.
    UnknownParent { parent: ObjectId },
    /// The writer found a commit that is its own ancestor.
    Cycle { id: ObjectId },
    /// A layer's BASE chunk disagrees with the layers below it.
    BaseMismatch { layer: usize },
    ChecksumMismatch { expected: ObjectId, actual: ObjectId },
    /// The chain file is malformed or names a missing layer.
    BadChain { detail: &'static str },
}

impl CommitGraphError {
    #[inline]
    pub const fn corrupt(detail: &'static str) -> Self {
        Self::Corrupt { detail }
    }
}

impl fmt::Display for CommitGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt { detail } => write!(f, "corrupt commit-graph: {detail}"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported commit-graph version {version}")
            }
            Self::HashVersionMismatch { found, expected } => {
                write!(f, "hash version {found} does not match {expected:?}")
            }
            Self::MissingChunk { chunk } => write!(f, "missing required chunk {chunk}"),
            Self::DuplicateChunk { chunk } => write!(f, "duplicate chunk {chunk}"),
            Self::InvalidChunkSize {
                chunk,
                actual,
                expected,
            } => write!(f, "chunk {chunk} has size {actual}, expected {expected}"),
            Self::ParentOutOfRange { position, count } => {
                write!(f, "parent position {position} out of range (commits: {count})")
            }
            Self::EdgeOutOfRange { index } => write!(f, "EDGE index {index} out of range"),
            Self::UnknownParent { parent } => write!(f, "parent {parent} is not in the graph"),
            Self::Cycle { id } => write!(f, "commit {id} is its own ancestor"),
            Self::BaseMismatch { layer } => write!(f, "layer {layer} BASE does not match chain"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: stored {expected}, computed {actual}")
            }
            Self::BadChain { detail } => write!(f, "bad commit-graph chain: {detail}"),
        }
    }
}

impl std::error::Error for CommitGraphError {}

#[derive(Clone, Copy, Debug)]
struct ChunkLoc {
    id: [u8; 4],
    offset: u64,
    len: u64,
}

#[derive(Clone, Debug)]
struct Layout {
    format: ObjectFormat,
    commit_count: u32,
    base_count: u8,
    oidf: Range<usize>,
    oidl: Range<usize>,
    cdat: Range<usize>,
    edge: Option<Range<usize>>,
    bidx: Option<Range<usize>>,
    bdat: Option<Range<usize>>,
    base: Option<Range<usize>>,
}

impl Layout {
    fn parse(data: &[u8], expected: ObjectFormat) -> Result<Self, CommitGraphError> {
        let hash_len = expected.oid_len() as usize;
        if data.len() < GRAPH_HEADER_SIZE + CHUNK_ENTRY_SIZE + hash_len {
            return Err(CommitGraphError::corrupt("file too small"));
        }
        if data[0..4] != GRAPH_MAGIC {
            return Err(CommitGraphError::corrupt("invalid signature"));
        }
        if data[4] != GRAPH_VERSION {
            return Err(CommitGraphError::UnsupportedVersion { version: data[4] });
        }
        let format = ObjectFormat::from_hash_version(data[5]).ok_or(
            CommitGraphError::HashVersionMismatch {
                found: data[5],
                expected,
            },
        )?;
        if format != expected {
            return Err(CommitGraphError::HashVersionMismatch {
                found: data[5],
                expected,
            });
        }
        let chunk_count = data[6];
        let base_count = data[7];

        let chunks = parse_chunk_table(data, chunk_count, data.len() - hash_len)?;
        let range = |loc: ChunkLoc| loc.offset as usize..(loc.offset + loc.len) as usize;

        let oidf = range(require_chunk(&chunks, CHUNK_OIDF)?);
        let oidl = range(require_chunk(&chunks, CHUNK_OIDL)?);
        let cdat = range(require_chunk(&chunks, CHUNK_CDAT)?);
        let edge = find_chunk(&chunks, CHUNK_EDGE).map(range);
        let bidx = find_chunk(&chunks, CHUNK_BIDX).map(range);
        let bdat = find_chunk(&chunks, CHUNK_BDAT).map(range);
        let base = find_chunk(&chunks, CHUNK_BASE).map(range);

        if oidf.len() != FANOUT_SIZE {
            return Err(CommitGraphError::InvalidChunkSize {
                chunk: ChunkId(CHUNK_OIDF),
                actual: oidf.len() as u64,
                expected: FANOUT_SIZE as u64,
            });
        }
        let commit_count = validate_fanout(&data[oidf.clone()])?;
        let n = commit_count as usize;
        check_size(CHUNK_OIDL, oidl.len(), n * hash_len)?;
        check_size(CHUNK_CDAT, cdat.len(), n * (hash_len + 16))?;
        if let Some(edge) = &edge {
            if edge.len() % 4 != 0 {
                return Err(CommitGraphError::corrupt("EDGE size not a multiple of 4"));
            }
        }
        match (&bidx, &bdat) {
            (Some(bidx), Some(bdat)) => {
                check_size(CHUNK_BIDX, bidx.len(), n * 4)?;
                if bdat.len() < BDAT_HEADER_SIZE {
                    return Err(CommitGraphError::corrupt("BDAT shorter than its header"));
                }
            }
            (None, None) => {}
            _ => return Err(CommitGraphError::corrupt("BIDX and BDAT must appear together")),
        }
        match &base {
            Some(base) => check_size(CHUNK_BASE, base.len(), base_count as usize * hash_len)?,
            None if base_count != 0 => {
                return Err(CommitGraphError::MissingChunk {
                    chunk: ChunkId(CHUNK_BASE),
                })
            }
            None => {}
        }

        let oidl_bytes = &data[oidl.clone()];
        for i in 1..n {
            let prev = &oidl_bytes[(i - 1) * hash_len..i * hash_len];
            let cur = &oidl_bytes[i * hash_len..(i + 1) * hash_len];
            if prev >= cur {
                return Err(CommitGraphError::corrupt("OIDL not strictly sorted"));
            }
        }

        Ok(Self {
            format,
            commit_count,
            base_count,
            oidf,
            oidl,
            cdat,
            edge,
            bidx,
            bdat,
            base,
        })
    }
}

fn check_size(id: [u8; 4], actual: usize, expected: usize) -> Result<(), CommitGraphError> {
    if actual != expected {
        return Err(CommitGraphError::InvalidChunkSize {
            chunk: ChunkId(id),
            actual: actual as u64,
            expected: expected as u64,
        });
    }
    Ok(())
}

fn parse_chunk_table(
    data: &[u8],
    chunk_count: u8,
    data_end: usize,
) -> Result<Vec<ChunkLoc>, CommitGraphError> {
    let table_entries = chunk_count as usize + 1;
    let table_end = GRAPH_HEADER_SIZE + table_entries * CHUNK_ENTRY_SIZE;
    if table_end > data_end {
        return Err(CommitGraphError::corrupt("chunk table extends past file"));
    }

    let mut chunks: Vec<ChunkLoc> = Vec::with_capacity(chunk_count as usize);
    let mut prev_offset = table_end as u64;
    for i in 0..table_entries {
        let start = GRAPH_HEADER_SIZE + i * CHUNK_ENTRY_SIZE;
        let entry = &data[start..start + CHUNK_ENTRY_SIZE];
        let id = [entry[0], entry[1], entry[2], entry[3]];
        let mut off = [0u8; 8];
        off.copy_from_slice(&entry[4..12]);
        let offset = u64::from_be_bytes(off);

        if offset > data_end as u64 {
            return Err(CommitGraphError::corrupt("chunk offset extends past file"));
        }
        if offset < prev_offset {
            return Err(CommitGraphError::corrupt("chunk offsets not monotonic"));
        }
        if i < chunk_count as usize {
            if id == [0; 4] {
                return Err(CommitGraphError::corrupt("zero chunk id before terminator"));
            }
            if chunks.iter().any(|c| c.id == id) {
                return Err(CommitGraphError::DuplicateChunk { chunk: ChunkId(id) });
            }
            chunks.push(ChunkLoc { id, offset, len: 0 });
        } else if id != [0; 4] {
            return Err(CommitGraphError::corrupt("missing chunk table terminator"));
        }
        if i > 0 {
            let prev = &mut chunks[i - 1];
            prev.len = offset - prev.offset;
        }
        prev_offset = offset;
    }
    Ok(chunks)
}

fn require_chunk(chunks: &[ChunkLoc], id: [u8; 4]) -> Result<ChunkLoc, CommitGraphError> {
    find_chunk(chunks, id).ok_or(CommitGraphError::MissingChunk { chunk: ChunkId(id) })
}

fn find_chunk(chunks: &[ChunkLoc], id: [u8; 4]) -> Option<ChunkLoc> {
    chunks.iter().find(|c| c.id == id).copied()
}

fn validate_fanout(oidf: &[u8]) -> Result<u32, CommitGraphError> {
    let mut prev = 0u32;
    for chunk in oidf.chunks_exact(4) {
        let val = be_u32(chunk);
        if val < prev {
            return Err(CommitGraphError::corrupt("fanout not monotonic"));
        }
        prev = val;
    }
    Ok(prev)
}

/// CDAT record of one commit, with parents still encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    pub tree: ObjectId,
    pub parent1: u32,
    pub parent2: u32,
    /// Topological level; zero when the writer did not compute one.
    pub generation: u32,
    /// Committer time, seconds since the epoch (34 bits).
    pub commit_time: u64,
}

/// One commit-graph file.
#[derive(Debug)]
pub struct CommitGraphFile {
    path: PathBuf,
    bytes: BytesView,
    layout: Layout,
}

impl CommitGraphFile {
    /// Validates structure and trailing checksum of `bytes`.
    pub fn from_bytes(
        path: PathBuf,
        bytes: BytesView,
        format: ObjectFormat,
    ) -> Result<Self, CommitGraphError> {
        let layout = Layout::parse(bytes.as_slice(), format)?;
        let data = bytes.as_slice();
        let split = data.len() - format.oid_len() as usize;
        let expected = ObjectId::try_from_slice(&data[split..])
            .ok_or(CommitGraphError::corrupt("bad trailer"))?;
        let actual = checksum(format, &data[..split]);
        if expected != actual {
            return Err(CommitGraphError::ChecksumMismatch { expected, actual });
        }
        Ok(Self {
            path,
            bytes,
            layout,
        })
    }

    /// Maps and validates the file at `path`.
    pub fn open(path: &Path, format: ObjectFormat) -> Result<Self, OdbError> {
        let bytes = BytesView::map_file(path)?;
        Self::from_bytes(path.to_path_buf(), bytes, format).map_err(|err| graph_error(path, err))
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn format(&self) -> ObjectFormat {
        self.layout.format
    }

    #[inline]
    pub fn commit_count(&self) -> u32 {
        self.layout.commit_count
    }

    #[inline]
    pub fn base_count(&self) -> u8 {
        self.layout.base_count
    }

    fn data(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    fn hash_len(&self) -> usize {
        self.layout.format.oid_len() as usize
    }

    /// The trailing checksum, which also names the file inside a chain.
    pub fn checksum(&self) -> ObjectId {
        let data = self.data();
        ObjectId::try_from_slice(&data[data.len() - self.hash_len()..]).unwrap_or_default()
    }

    /// Checksums of the layers this one builds on, oldest first.
    pub fn base_hashes(&self) -> Vec<ObjectId> {
        let Some(base) = &self.layout.base else {
            return Vec::new();
        };
        self.data()[base.clone()]
            .chunks_exact(self.hash_len())
            .filter_map(ObjectId::try_from_slice)
            .collect()
    }

    fn fanout(&self, first_byte: u8) -> u32 {
        let off = self.layout.oidf.start + first_byte as usize * 4;
        be_u32(&self.data()[off..off + 4])
    }

    fn oid_bytes_at(&self, local: u32) -> &[u8] {
        let len = self.hash_len();
        let start = self.layout.oidl.start + local as usize * len;
        &self.data()[start..start + len]
    }

    /// Id at file-local index `local`.
    pub fn oid_at(&self, local: u32) -> ObjectId {
        ObjectId::try_from_slice(self.oid_bytes_at(local)).unwrap_or_default()
    }

    /// File-local index of `oid`.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        let needle = oid.as_slice();
        if needle.len() != self.hash_len() {
            return None;
        }
        let first = oid.first_byte();
        let mut lo = if first == 0 { 0 } else { self.fanout(first - 1) };
        let mut hi = self.fanout(first);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.oid_bytes_at(mid).cmp(needle) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Raw CDAT record at file-local index `local`.
    pub fn record(&self, local: u32) -> CommitRecord {
        let len = self.hash_len();
        let start = self.layout.cdat.start + local as usize * (len + 16);
        let rec = &self.data()[start..start + len + 16];
        let tree = ObjectId::try_from_slice(&rec[..len]).unwrap_or_default();
        let parent1 = be_u32(&rec[len..]);
        let parent2 = be_u32(&rec[len + 4..]);
        let word1 = be_u32(&rec[len + 8..]);
        let word2 = be_u32(&rec[len + 12..]);
        CommitRecord {
            tree,
            parent1,
            parent2,
            generation: word1 >> 2,
            commit_time: (((word1 & 0x3) as u64) << 32) | word2 as u64,
        }
    }

    /// Decodes parent positions of the record, following EDGE for merges
    /// with more than two parents.
    pub fn parents_of(&self, record: &CommitRecord, out: &mut Vec<u32>) -> Result<(), CommitGraphError> {
        out.clear();
        if record.parent1 == PARENT_NONE {
            return Ok(());
        }
        out.push(record.parent1);
        if record.parent2 == PARENT_NONE {
            return Ok(());
        }
        if record.parent2 & EDGE_FLAG == 0 {
            out.push(record.parent2);
            return Ok(());
        }

        let edge = self
            .layout
            .edge
            .as_ref()
            .ok_or(CommitGraphError::MissingChunk {
                chunk: ChunkId(CHUNK_EDGE),
            })?;
        let entries = (edge.len() / 4) as u32;
        let mut index = record.parent2 & !EDGE_FLAG;
        loop {
            if index >= entries {
                return Err(CommitGraphError::EdgeOutOfRange { index });
            }
            let off = edge.start + index as usize * 4;
            let raw = be_u32(&self.data()[off..off + 4]);
            out.push(raw & !EDGE_FLAG);
            if raw & EDGE_FLAG != 0 {
                return Ok(());
            }
            index += 1;
        }
    }

    /// Raw changed-path bloom filter of the commit at `local`, if present.
    pub fn bloom_filter(&self, local: u32) -> Option<&[u8]> {
        let bidx = self.layout.bidx.as_ref()?;
        let bdat = self.layout.bdat.as_ref()?;
        let read = |i: u32| be_u32(&self.data()[bidx.start + i as usize * 4..]) as usize;
        let end = read(local);
        let start = if local == 0 { 0 } else { read(local - 1) };
        let data_len = bdat.len() - BDAT_HEADER_SIZE;
        if start > end || end > data_len {
            return None;
        }
        let base = bdat.start + BDAT_HEADER_SIZE;
        Some(&self.data()[base + start..base + end])
    }

    /// `(hash_version, num_hashes, bits_per_entry)` from the BDAT header.
    pub fn bloom_settings(&self) -> Option<(u32, u32, u32)> {
        let bdat = self.layout.bdat.as_ref()?;
        let h = &self.data()[bdat.start..bdat.start + BDAT_HEADER_SIZE];
        Some((be_u32(h), be_u32(&h[4..]), be_u32(&h[8..])))
    }
}

fn graph_error(path: &Path, err: CommitGraphError) -> OdbError {
    match err {
        CommitGraphError::ChecksumMismatch { expected, actual } => OdbError::ChecksumMismatch {
            target: ChecksumTarget::CommitGraph,
            path: path.to_path_buf(),
            expected,
            actual,
        },
        source => OdbError::MalformedCommitGraph {
            path: path.to_path_buf(),
            source,
        },
    }
}

/// Decoded commit at a global position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphCommit {
    pub id: ObjectId,
    pub tree: ObjectId,
    /// Global positions of the parents, in order.
    pub parents: Vec<u32>,
    pub generation: u32,
    pub commit_time: u64,
}

/// A single graph file or a chain of layers, addressed by global position.
#[derive(Debug)]
pub struct CommitGraph {
    layers: Vec<CommitGraphFile>,
    /// Global position of each layer's first commit.
    starts: Vec<u32>,
    total: u32,
}

impl CommitGraph {
    /// Assembles layers (oldest first), checking each BASE chunk against
    /// the layers beneath it.
    pub fn from_layers(layers: Vec<CommitGraphFile>) -> Result<Self, CommitGraphError> {
        if layers.is_empty() {
            return Err(CommitGraphError::BadChain {
                detail: "no layers",
            });
        }
        let mut starts = Vec::with_capacity(layers.len());
        let mut total: u32 = 0;
        for (k, layer) in layers.iter().enumerate() {
            if layer.base_count() as usize != k {
                return Err(CommitGraphError::BaseMismatch { layer: k });
            }
            let expected: Vec<ObjectId> = layers[..k].iter().map(CommitGraphFile::checksum).collect();
            if layer.base_hashes() != expected {
                return Err(CommitGraphError::BaseMismatch { layer: k });
            }
            starts.push(total);
            total = total
                .checked_add(layer.commit_count())
                .filter(|&t| t < PARENT_NONE)
                .ok_or(CommitGraphError::corrupt("too many commits"))?;
        }
        Ok(Self {
            layers,
            starts,
            total,
        })
    }

    /// Opens the graph for `objects_dir`: the chain when one exists, else
    /// the single file. `Ok(None)` when neither exists.
    pub fn open(
        objects_dir: &Path,
        format: ObjectFormat,
        limits: &RepoLimits,
    ) -> Result<Option<Self>, OdbError> {
        let info = objects_dir.join("info");
        let chain_dir = info.join("commit-graphs");
        let chain_path = chain_dir.join("commit-graph-chain");

        if chain_path.is_file() {
            let hashes = read_chain_file(&chain_path, format, limits)?;
            let mut layers = Vec::with_capacity(hashes.len());
            for hash in &hashes {
                let path = chain_dir.join(format!("graph-{}.graph", hash.to_hex()));
                let layer = CommitGraphFile::open(&path, format)?;
                if layer.checksum() != *hash {
                    return Err(graph_error(
                        &path,
                        CommitGraphError::BadChain {
                            detail: "layer checksum does not match its name",
                        },
                    ));
                }
                layers.push(layer);
            }
            let graph = Self::from_layers(layers).map_err(|e| graph_error(&chain_path, e))?;
            tracing::debug!(
                chain = %chain_path.display(),
                layers = graph.layer_count(),
                commits = graph.commit_count(),
                "opened commit-graph chain"
            );
            return Ok(Some(graph));
        }

        let single = info.join("commit-graph");
        if single.is_file() {
            let file = CommitGraphFile::open(&single, format)?;
            let graph = Self::from_layers(vec![file]).map_err(|e| graph_error(&single, e))?;
            tracing::debug!(
                path = %single.display(),
                commits = graph.commit_count(),
                "opened commit-graph"
            );
            return Ok(Some(graph));
        }
        Ok(None)
    }

    #[inline]
    pub fn commit_count(&self) -> u32 {
        self.total
    }

    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[CommitGraphFile] {
        &self.layers
    }

    #[inline]
    pub fn format(&self) -> ObjectFormat {
        self.layers[0].format()
    }

    fn locate(&self, pos: u32) -> Option<(usize, u32)> {
        if pos >= self.total {
            return None;
        }
        let k = self.starts.partition_point(|&s| s <= pos) - 1;
        Some((k, pos - self.starts[k]))
    }

    /// Global position of `oid`.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        self.layers
            .iter()
            .zip(&self.starts)
            .rev()
            .find_map(|(layer, &start)| layer.lookup(oid).map(|local| start + local))
    }

    pub fn id_at(&self, pos: u32) -> Option<ObjectId> {
        self.locate(pos).map(|(k, local)| self.layers[k].oid_at(local))
    }

    /// Decodes the commit at global position `pos`.
    pub fn commit_at(&self, pos: u32) -> Result<GraphCommit, CommitGraphError> {
        let (k, local) = self.locate(pos).ok_or(CommitGraphError::ParentOutOfRange {
            position: pos,
            count: self.total,
        })?;
        let layer = &self.layers[k];
        let record = layer.record(local);
        let mut parents = Vec::with_capacity(2);
        layer.parents_of(&record, &mut parents)?;
        // A layer can only reference itself and the layers below it.
        let limit = self.starts[k] + layer.commit_count();
        if let Some(&bad) = parents.iter().find(|&&p| p >= limit) {
            return Err(CommitGraphError::ParentOutOfRange {
                position: bad,
                count: limit,
            });
        }
        Ok(GraphCommit {
            id: layer.oid_at(local),
            tree: record.tree,
            parents,
            generation: record.generation,
            commit_time: record.commit_time,
        })
    }

    pub fn bloom_filter(&self, pos: u32) -> Option<&[u8]> {
        let (k, local) = self.locate(pos)?;
        self.layers[k].bloom_filter(local)
    }
}

/// Reads the chain file: one layer checksum per line, oldest first.
fn read_chain_file(
    path: &Path,
    format: ObjectFormat,
    limits: &RepoLimits,
) -> Result<Vec<ObjectId>, OdbError> {
    let meta = fs::metadata(path)?;
    if meta.len() > limits.max_graph_chain_file_bytes as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "commit-graph chain file too large: {} bytes (limit: {})",
                meta.len(),
                limits.max_graph_chain_file_bytes
            ),
        )
        .into());
    }
    let text = fs::read(path)?;
    let mut hashes = Vec::new();
    for line in text.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let oid = ObjectId::from_hex(line).map_err(|_| {
            graph_error(path, CommitGraphError::BadChain { detail: "invalid layer hash" })
        })?;
        if oid.format() != format {
            return Err(graph_error(
                path,
                CommitGraphError::BadChain {
                    detail: "layer hash has the wrong width",
                },
            ));
        }
        hashes.push(oid);
        if hashes.len() > MAX_CHAIN_LAYERS {
            return Err(graph_error(path, CommitGraphError::BadChain { detail: "too many layers" }));
        }
    }
    if hashes.is_empty() {
        return Err(graph_error(path, CommitGraphError::BadChain { detail: "empty chain" }));
    }
    Ok(hashes)
}
