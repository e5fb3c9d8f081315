//! Commit-graph encoder.
//!
//! Builds a single graph file, or a new chain layer on top of an existing
//! graph, from commit metadata. Generation numbers are topological levels:
//! one more than the highest parent, with root commits at 1.
//!
//! The installers write files atomically (temp file plus rename) into the
//! locations [`CommitGraph::open`] reads from.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};

use super::commit_graph::{
    CommitGraph, CommitGraphError, BDAT_HEADER_SIZE, CHUNK_BASE, CHUNK_BDAT, CHUNK_BIDX,
    CHUNK_CDAT, CHUNK_EDGE, CHUNK_ENTRY_SIZE, CHUNK_OIDF, CHUNK_OIDL, EDGE_FLAG, FANOUT_ENTRIES,
    GENERATION_MAX, GRAPH_HEADER_SIZE, GRAPH_MAGIC, GRAPH_VERSION, PARENT_NONE,
};
use super::commit_parse::parse_commit;
use super::errors::OdbError;
use super::limits::CommitParseLimits;
use super::object::{checksum, ObjectKind};
use super::object_id::{ObjectFormat, ObjectId};
use super::object_store::ObjectStore;

/// Committer times are stored in 34 bits.
const COMMIT_TIME_MAX: u64 = (1 << 34) - 1;

const BLOOM_VERSION: u32 = 1;
const BLOOM_NUM_HASHES: u32 = 7;
const BLOOM_BITS_PER_ENTRY: u32 = 10;

/// Metadata of one commit to record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphInput {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub commit_time: i64,
    /// Pre-computed changed-path filter; when any input carries one, the
    /// BIDX/BDAT chunks are written and missing filters are empty.
    pub bloom: Option<Vec<u8>>,
}

#[derive(Clone, Copy)]
enum ParentRef {
    Local(u32),
    Base { pos: u32, generation: u32 },
}

/// Encodes `commits` as a graph file. With `base`, the file is a new layer
/// whose parents may also resolve into `base`; commits already present in
/// `base` are skipped.
pub fn write_commit_graph(
    format: ObjectFormat,
    commits: &[GraphInput],
    base: Option<&CommitGraph>,
) -> Result<Vec<u8>, CommitGraphError> {
    if let Some(base) = base {
        if base.format() != format {
            return Err(CommitGraphError::HashVersionMismatch {
                found: base.format().hash_version(),
                expected: format,
            });
        }
    }

    let mut seen = AHashSet::with_capacity(commits.len());
    let mut sorted: Vec<&GraphInput> = commits
        .iter()
        .filter(|c| base.map_or(true, |b| b.lookup(&c.id).is_none()))
        .filter(|c| seen.insert(c.id))
        .collect();
    sorted.sort_unstable_by(|a, b| a.id.cmp(&b.id));
    let n = sorted.len();

    let local: AHashMap<ObjectId, u32> = sorted
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id, i as u32))
        .collect();
    let base_total = base.map_or(0, CommitGraph::commit_count);
    if base_total as u64 + n as u64 >= PARENT_NONE as u64 {
        return Err(CommitGraphError::corrupt("too many commits"));
    }

    let mut parent_refs: Vec<Vec<ParentRef>> = Vec::with_capacity(n);
    for commit in &sorted {
        let mut refs = Vec::with_capacity(commit.parents.len());
        for parent in &commit.parents {
            if let Some(&idx) = local.get(parent) {
                refs.push(ParentRef::Local(idx));
                continue;
            }
            let pos = base
                .and_then(|b| b.lookup(parent))
                .ok_or(CommitGraphError::UnknownParent { parent: *parent })?;
            let generation = base
                .map(|b| b.commit_at(pos).map(|c| c.generation))
                .transpose()?
                .unwrap_or(0);
            refs.push(ParentRef::Base { pos, generation });
        }
        parent_refs.push(refs);
    }

    let generations = compute_generations(&sorted, &parent_refs)?;
    let hash_len = format.oid_len() as usize;
    let position = |r: ParentRef| match r {
        ParentRef::Local(i) => base_total + i,
        ParentRef::Base { pos, .. } => pos,
    };

    // Fanout.
    let mut oidf = Vec::with_capacity(FANOUT_ENTRIES * 4);
    let mut counts = [0u32; FANOUT_ENTRIES];
    for c in &sorted {
        counts[c.id.first_byte() as usize] += 1;
    }
    let mut running = 0u32;
    for count in counts {
        running += count;
        oidf.extend_from_slice(&running.to_be_bytes());
    }

    let mut oidl = Vec::with_capacity(n * hash_len);
    let mut cdat = Vec::with_capacity(n * (hash_len + 16));
    let mut edge: Vec<u8> = Vec::new();
    for (i, commit) in sorted.iter().enumerate() {
        oidl.extend_from_slice(commit.id.as_slice());
        cdat.extend_from_slice(commit.tree.as_slice());

        let refs = &parent_refs[i];
        let p1 = refs.first().map_or(PARENT_NONE, |&r| position(r));
        let p2 = match refs.len() {
            0 | 1 => PARENT_NONE,
            2 => position(refs[1]),
            _ => {
                let start = (edge.len() / 4) as u32;
                for (k, &r) in refs[1..].iter().enumerate() {
                    let mut raw = position(r);
                    if k == refs.len() - 2 {
                        raw |= EDGE_FLAG;
                    }
                    edge.extend_from_slice(&raw.to_be_bytes());
                }
                EDGE_FLAG | start
            }
        };
        cdat.extend_from_slice(&p1.to_be_bytes());
        cdat.extend_from_slice(&p2.to_be_bytes());

        let time = commit.commit_time.clamp(0, COMMIT_TIME_MAX as i64) as u64;
        let word1 = (generations[i] << 2) | ((time >> 32) as u32 & 0x3);
        cdat.extend_from_slice(&word1.to_be_bytes());
        cdat.extend_from_slice(&(time as u32).to_be_bytes());
    }

    let mut chunks: Vec<([u8; 4], Vec<u8>)> = vec![(CHUNK_OIDF, oidf), (CHUNK_OIDL, oidl), (CHUNK_CDAT, cdat)];
    if !edge.is_empty() {
        chunks.push((CHUNK_EDGE, edge));
    }
    if sorted.iter().any(|c| c.bloom.is_some()) {
        let mut bidx = Vec::with_capacity(n * 4);
        let mut bdat = Vec::with_capacity(BDAT_HEADER_SIZE);
        bdat.extend_from_slice(&BLOOM_VERSION.to_be_bytes());
        bdat.extend_from_slice(&BLOOM_NUM_HASHES.to_be_bytes());
        bdat.extend_from_slice(&BLOOM_BITS_PER_ENTRY.to_be_bytes());
        for c in &sorted {
            if let Some(filter) = &c.bloom {
                bdat.extend_from_slice(filter);
            }
            let end = u32::try_from(bdat.len() - BDAT_HEADER_SIZE)
                .map_err(|_| CommitGraphError::corrupt("bloom data too large"))?;
            bidx.extend_from_slice(&end.to_be_bytes());
        }
        chunks.push((CHUNK_BIDX, bidx));
        chunks.push((CHUNK_BDAT, bdat));
    }
    let base_count = match base {
        Some(base) => {
            let mut data = Vec::with_capacity(base.layer_count() * hash_len);
            for layer in base.layers() {
                data.extend_from_slice(layer.checksum().as_slice());
            }
            chunks.push((CHUNK_BASE, data));
            u8::try_from(base.layer_count())
                .map_err(|_| CommitGraphError::BadChain { detail: "too many layers" })?
        }
        None => 0,
    };

    let table_size = (chunks.len() + 1) * CHUNK_ENTRY_SIZE;
    let body: usize = chunks.iter().map(|(_, d)| d.len()).sum();
    let mut out = Vec::with_capacity(GRAPH_HEADER_SIZE + table_size + body + hash_len);
    out.extend_from_slice(&GRAPH_MAGIC);
    out.push(GRAPH_VERSION);
    out.push(format.hash_version());
    out.push(chunks.len() as u8);
    out.push(base_count);

    let mut offset = (GRAPH_HEADER_SIZE + table_size) as u64;
    for (id, data) in &chunks {
        out.extend_from_slice(id);
        out.extend_from_slice(&offset.to_be_bytes());
        offset += data.len() as u64;
    }
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&offset.to_be_bytes());
    for (_, data) in &chunks {
        out.extend_from_slice(data);
    }
    let trailer = checksum(format, &out);
    out.extend_from_slice(trailer.as_slice());
    Ok(out)
}

/// Topological levels, computed with an explicit stack so deep histories
/// cannot overflow the call stack.
fn compute_generations(
    commits: &[&GraphInput],
    parents: &[Vec<ParentRef>],
) -> Result<Vec<u32>, CommitGraphError> {
    const UNSET: u32 = 0;
    const IN_PROGRESS: u32 = u32::MAX;

    let mut gens = vec![UNSET; commits.len()];
    let mut stack: Vec<u32> = Vec::new();
    for root in 0..commits.len() as u32 {
        if gens[root as usize] != UNSET {
            continue;
        }
        stack.push(root);
        gens[root as usize] = IN_PROGRESS;
        while let Some(&top) = stack.last() {
            let mut pending = None;
            let mut max_parent = 0u32;
            for &p in &parents[top as usize] {
                match p {
                    ParentRef::Base { generation, .. } => max_parent = max_parent.max(generation),
                    ParentRef::Local(idx) => match gens[idx as usize] {
                        UNSET => {
                            pending = Some(idx);
                            break;
                        }
                        IN_PROGRESS => {
                            return Err(CommitGraphError::Cycle {
                                id: commits[idx as usize].id,
                            })
                        }
                        g => max_parent = max_parent.max(g),
                    },
                }
            }
            match pending {
                Some(idx) => {
                    gens[idx as usize] = IN_PROGRESS;
                    stack.push(idx);
                }
                None => {
                    gens[top as usize] = max_parent.saturating_add(1).min(GENERATION_MAX);
                    stack.pop();
                }
            }
        }
    }
    Ok(gens)
}

/// Collects graph inputs for every commit reachable from `tips`, reading
/// commit objects from `store`. Walking stops at commits present in
/// `known`, so the result suits a new layer on top of it.
pub fn collect_graph_inputs(
    store: &dyn ObjectStore,
    tips: &[ObjectId],
    known: Option<&CommitGraph>,
    limits: &CommitParseLimits,
) -> Result<Vec<GraphInput>, OdbError> {
    let mut out = Vec::new();
    let mut seen: AHashSet<ObjectId> = AHashSet::new();
    let mut stack: Vec<ObjectId> = tips.to_vec();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) || known.is_some_and(|g| g.lookup(&id).is_some()) {
            continue;
        }
        let object = store.get_kind(&id, ObjectKind::Commit)?;
        let parsed = parse_commit(&object.data, store.format(), limits)
            .map_err(|source| OdbError::Commit { oid: id, source })?;
        stack.extend(parsed.parents.iter().copied());
        out.push(GraphInput {
            id,
            tree: parsed.tree,
            parents: parsed.parents,
            commit_time: parsed.committer_time,
            bloom: None,
        });
    }
    Ok(out)
}

fn replace_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("graph");
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

/// Writes `bytes` as `objects/info/commit-graph`.
pub fn install_single_graph(objects_dir: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let info = objects_dir.join("info");
    let path = info.join("commit-graph");
    replace_atomically(&info, &path, bytes)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "installed commit-graph");
    Ok(path)
}

/// Writes `bytes` as a new chain layer and appends it to the chain file.
///
/// The chain file is rewritten after the layer is in place, so readers
/// never see a chain naming a missing layer.
pub fn install_graph_layer(
    objects_dir: &Path,
    format: ObjectFormat,
    bytes: &[u8],
) -> io::Result<PathBuf> {
    let hash_len = format.oid_len() as usize;
    let Some(trailer) = bytes
        .len()
        .checked_sub(hash_len)
        .and_then(|split| ObjectId::try_from_slice(&bytes[split..]))
    else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "graph layer shorter than its checksum",
        ));
    };
    let dir = objects_dir.join("info").join("commit-graphs");
    let hex = trailer.to_hex();
    let path = dir.join(format!("graph-{hex}.graph"));
    replace_atomically(&dir, &path, bytes)?;

    let chain_path = dir.join("commit-graph-chain");
    let mut chain = match fs::read(&chain_path) {
        Ok(existing) => existing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err),
    };
    if !chain.is_empty() && !chain.ends_with(b"\n") {
        chain.push(b'\n');
    }
    chain.extend_from_slice(hex.as_bytes());
    chain.push(b'\n');
    replace_atomically(&dir, &chain_path, &chain)?;
    tracing::debug!(layer = %path.display(), "appended commit-graph layer");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::BytesView;
    use crate::commit_graph::CommitGraphFile;
    use crate::limits::RepoLimits;
    use tempfile::tempdir;

    fn oid(n: u8) -> ObjectId {
        ObjectId::sha1([n; 20])
    }

    fn input(id: u8, parents: &[u8], time: i64) -> GraphInput {
        GraphInput {
            id: oid(id),
            tree: oid(0xee),
            parents: parents.iter().map(|&p| oid(p)).collect(),
            commit_time: time,
            bloom: None,
        }
    }

    fn parse(bytes: Vec<u8>) -> CommitGraphFile {
        CommitGraphFile::from_bytes(PathBuf::from("mem"), BytesView::from_vec(bytes), ObjectFormat::Sha1).unwrap()
    }

    #[test]
    fn generations_follow_longest_path() {
        // 1 <- 2 <- 3, and 1 <- 4; 5 merges 3 and 4.
        let inputs = [
            input(5, &[3, 4], 50),
            input(3, &[2], 30),
            input(4, &[1], 40),
            input(2, &[1], 20),
            input(1, &[], 10),
        ];
        let file = parse(write_commit_graph(ObjectFormat::Sha1, &inputs, None).unwrap());
        let gen_of = |n: u8| file.record(file.lookup(&oid(n)).unwrap()).generation;
        assert_eq!(gen_of(1), 1);
        assert_eq!(gen_of(2), 2);
        assert_eq!(gen_of(4), 2);
        assert_eq!(gen_of(3), 3);
        assert_eq!(gen_of(5), 4);
    }

    #[test]
    fn large_and_negative_times_are_clamped() {
        let inputs = [input(1, &[], -5), input(2, &[1], 1 << 40)];
        let file = parse(write_commit_graph(ObjectFormat::Sha1, &inputs, None).unwrap());
        assert_eq!(file.record(0).commit_time, 0);
        assert_eq!(file.record(1).commit_time, COMMIT_TIME_MAX);
    }

    #[test]
    fn unknown_parent_and_cycle_are_rejected() {
        let err = write_commit_graph(ObjectFormat::Sha1, &[input(1, &[9], 1)], None).unwrap_err();
        assert_eq!(err, CommitGraphError::UnknownParent { parent: oid(9) });

        let err = write_commit_graph(ObjectFormat::Sha1, &[input(1, &[2], 1), input(2, &[1], 2)], None)
            .unwrap_err();
        assert!(matches!(err, CommitGraphError::Cycle { .. }));
    }

    #[test]
    fn chain_layers_resolve_global_positions() {
        let dir = tempdir().unwrap();
        let objects = dir.path().join("objects");

        let lower = write_commit_graph(ObjectFormat::Sha1, &[input(1, &[], 1), input(2, &[1], 2)], None).unwrap();
        install_graph_layer(&objects, ObjectFormat::Sha1, &lower).unwrap();
        let base = CommitGraph::open(&objects, ObjectFormat::Sha1, &RepoLimits::DEFAULT)
            .unwrap()
            .unwrap();

        let upper = write_commit_graph(
            ObjectFormat::Sha1,
            &[input(2, &[1], 2), input(3, &[2], 3), input(4, &[3, 1], 4)],
            Some(&base),
        )
        .unwrap();
        install_graph_layer(&objects, ObjectFormat::Sha1, &upper).unwrap();

        let graph = CommitGraph::open(&objects, ObjectFormat::Sha1, &RepoLimits::DEFAULT)
            .unwrap()
            .unwrap();
        assert_eq!(graph.layer_count(), 2);
        assert_eq!(graph.commit_count(), 4);
        let c4 = graph.commit_at(graph.lookup(&oid(4)).unwrap()).unwrap();
        let ids: Vec<ObjectId> = c4.parents.iter().map(|&p| graph.id_at(p).unwrap()).collect();
        assert_eq!(ids, vec![oid(3), oid(1)]);
        assert_eq!(c4.generation, 4);
    }

    #[test]
    fn chain_is_preferred_over_single_file() {
        let dir = tempdir().unwrap();
        let objects = dir.path().join("objects");
        let single = write_commit_graph(ObjectFormat::Sha1, &[input(1, &[], 1)], None).unwrap();
        install_single_graph(&objects, &single).unwrap();
        let two = write_commit_graph(ObjectFormat::Sha1, &[input(1, &[], 1), input(2, &[1], 2)], None).unwrap();
        install_graph_layer(&objects, ObjectFormat::Sha1, &two).unwrap();

        let graph = CommitGraph::open(&objects, ObjectFormat::Sha1, &RepoLimits::DEFAULT)
            .unwrap()
            .unwrap();
        assert_eq!(graph.commit_count(), 2);
    }

    #[test]
    fn chain_naming_missing_layer_fails() {
        let dir = tempdir().unwrap();
        let chain_dir = dir.path().join("info").join("commit-graphs");
        fs::create_dir_all(&chain_dir).unwrap();
        fs::write(chain_dir.join("commit-graph-chain"), format!("{}\n", oid(7).to_hex())).unwrap();
        assert!(CommitGraph::open(dir.path(), ObjectFormat::Sha1, &RepoLimits::DEFAULT).is_err());
    }

    #[test]
    fn no_graph_files_is_none() {
        let dir = tempdir().unwrap();
        assert!(CommitGraph::open(dir.path(), ObjectFormat::Sha1, &RepoLimits::DEFAULT)
            .unwrap()
            .is_none());
    }
}
