//! Commit nodes and the indexes that produce them.
//!
//! Three [`CommitNodeIndex`] implementations exist:
//! - [`GraphCommitNodeIndex`] reads nodes straight from a commit-graph.
//! - [`ObjectCommitNodeIndex`] parses commit objects from the store and
//!   computes generation numbers lazily.
//! - [`ChainedCommitNodeIndex`] tries the graph first and falls back to the
//!   store, for graphs that cover only part of history.
//!
//! Generation numbers follow the commit-graph definition: roots have
//! generation 1 and every commit sits one above its highest parent. Zero
//! means "unknown" and is contagious: a commit with an unknown parent
//! generation is itself unknown.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::{AHashMap, AHashSet};

use super::commit_graph::{CommitGraph, CommitGraphError, GraphCommit, GENERATION_MAX};
use super::commit_parse::{parse_commit, ParsedCommit};
use super::errors::OdbError;
use super::limits::{CommitParseLimits, RepoLimits};
use super::object::ObjectKind;
use super::object_id::ObjectId;
use super::object_store::ObjectStore;

/// Generation value meaning "not computed".
pub const GENERATION_UNKNOWN: u32 = 0;

/// A commit as seen by history traversals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitNode {
    pub id: ObjectId,
    pub tree_id: ObjectId,
    /// Parents in header order; the first parent is the mainline.
    pub parent_ids: Vec<ObjectId>,
    /// Author time when the source records it. Graph-backed nodes leave
    /// this empty; [`CommitNodeIndex::author_time`] fills the gap.
    pub author_time: Option<i64>,
    pub committer_time: i64,
    pub generation: u32,
}

impl CommitNode {
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_ids.is_empty()
    }

    #[inline]
    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }
}

/// Source of [`CommitNode`]s.
pub trait CommitNodeIndex {
    /// Returns the node for `id`, or `NotFound`.
    fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError>;

    /// Returns the parents of `node` in parent order, from this index.
    fn parents(&self, node: &CommitNode) -> Result<Vec<CommitNode>, OdbError> {
        node.parent_ids.iter().map(|p| self.get(p)).collect()
    }

    /// Author time of `node`, loading the commit object if the node does
    /// not carry it.
    fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError>;
}

impl<T: CommitNodeIndex + ?Sized> CommitNodeIndex for &T {
    fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError> {
        (**self).get(id)
    }

    fn parents(&self, node: &CommitNode) -> Result<Vec<CommitNode>, OdbError> {
        (**self).parents(node)
    }

    fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError> {
        (**self).author_time(node)
    }
}

impl<T: CommitNodeIndex + ?Sized> CommitNodeIndex for Box<T> {
    fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError> {
        (**self).get(id)
    }

    fn parents(&self, node: &CommitNode) -> Result<Vec<CommitNode>, OdbError> {
        (**self).parents(node)
    }

    fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError> {
        (**self).author_time(node)
    }
}

fn read_commit(
    store: &dyn ObjectStore,
    id: &ObjectId,
    limits: &CommitParseLimits,
) -> Result<ParsedCommit, OdbError> {
    let object = store.get_kind(id, ObjectKind::Commit)?;
    parse_commit(&object.data, store.format(), limits)
        .map_err(|source| OdbError::Commit { oid: *id, source })
}

// ---------------------------------------------------------------------------
// Graph-backed
// ---------------------------------------------------------------------------

/// Nodes decoded from commit-graph data only.
pub struct GraphCommitNodeIndex {
    graph: Arc<CommitGraph>,
    store: Arc<dyn ObjectStore>,
    limits: CommitParseLimits,
}

impl fmt::Debug for GraphCommitNodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCommitNodeIndex")
            .field("commits", &self.graph.commit_count())
            .field("layers", &self.graph.layer_count())
            .finish()
    }
}

impl GraphCommitNodeIndex {
    /// `store` is only consulted for author times.
    pub fn new(graph: Arc<CommitGraph>, store: Arc<dyn ObjectStore>, limits: CommitParseLimits) -> Self {
        Self {
            graph,
            store,
            limits,
        }
    }

    pub fn graph(&self) -> &CommitGraph {
        &self.graph
    }

    fn malformed(&self, source: CommitGraphError) -> OdbError {
        let path = self
            .graph
            .layers()
            .last()
            .map(|l| l.path().to_path_buf())
            .unwrap_or_default();
        OdbError::MalformedCommitGraph { path, source }
    }

    /// Generation recorded for `id`, if the graph covers it.
    pub fn generation_of(&self, id: &ObjectId) -> Result<Option<u32>, OdbError> {
        match self.graph.lookup(id) {
            Some(pos) => Ok(Some(self.graph.commit_at(pos).map_err(|e| self.malformed(e))?.generation)),
            None => Ok(None),
        }
    }

    /// Returns the node if the graph covers `id`.
    pub fn try_get(&self, id: &ObjectId) -> Result<Option<CommitNode>, OdbError> {
        let Some(pos) = self.graph.lookup(id) else {
            return Ok(None);
        };
        let GraphCommit {
            id,
            tree,
            parents,
            generation,
            commit_time,
        } = self.graph.commit_at(pos).map_err(|e| self.malformed(e))?;
        let parent_ids = parents
            .iter()
            .map(|&p| {
                self.graph.id_at(p).ok_or_else(|| {
                    self.malformed(CommitGraphError::ParentOutOfRange {
                        position: p,
                        count: self.graph.commit_count(),
                    })
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(CommitNode {
            id,
            tree_id: tree,
            parent_ids,
            author_time: None,
            committer_time: commit_time as i64,
            generation,
        }))
    }
}

impl CommitNodeIndex for GraphCommitNodeIndex {
    fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError> {
        tracing::trace!(%id, "graph node lookup");
        self.try_get(id)?.ok_or(OdbError::NotFound { oid: *id })
    }

    fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError> {
        match node.author_time {
            Some(t) => Ok(t),
            None => Ok(read_commit(self.store.as_ref(), &node.id, &self.limits)?.author_time),
        }
    }
}

// ---------------------------------------------------------------------------
// Store-backed
// ---------------------------------------------------------------------------

/// Nodes decoded from commit objects, with memoized generations.
pub struct ObjectCommitNodeIndex {
    store: Arc<dyn ObjectStore>,
    limits: CommitParseLimits,
    generations: Mutex<AHashMap<ObjectId, u32>>,
}

impl fmt::Debug for ObjectCommitNodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCommitNodeIndex")
            .field("memoized", &self.memo().len())
            .finish()
    }
}

impl ObjectCommitNodeIndex {
    pub fn new(store: Arc<dyn ObjectStore>, limits: CommitParseLimits) -> Self {
        Self {
            store,
            limits,
            generations: Mutex::new(AHashMap::new()),
        }
    }

    fn memo(&self) -> MutexGuard<'_, AHashMap<ObjectId, u32>> {
        self.generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Builds a node, taking parent generations from `known` before
    /// falling back to parsing parents from the store.
    fn get_with(
        &self,
        id: &ObjectId,
        known: &dyn Fn(&ObjectId) -> Result<Option<u32>, OdbError>,
    ) -> Result<CommitNode, OdbError> {
        tracing::trace!(%id, "store node lookup");
        let parsed = read_commit(self.store.as_ref(), id, &self.limits)?;
        let generation = self.generation(id, &parsed.parents, known)?;
        Ok(CommitNode {
            id: *id,
            tree_id: parsed.tree,
            parent_ids: parsed.parents,
            author_time: Some(parsed.author_time),
            committer_time: parsed.committer_time,
            generation,
        })
    }

    fn lookup_generation(
        &self,
        id: &ObjectId,
        known: &dyn Fn(&ObjectId) -> Result<Option<u32>, OdbError>,
    ) -> Result<Option<u32>, OdbError> {
        if let Some(&g) = self.memo().get(id) {
            return Ok(Some(g));
        }
        known(id)
    }

    /// Computes the generation of `id` with an explicit stack; parents
    /// of every commit on the stack are parsed at most once.
    fn generation(
        &self,
        id: &ObjectId,
        parents: &[ObjectId],
        known: &dyn Fn(&ObjectId) -> Result<Option<u32>, OdbError>,
    ) -> Result<u32, OdbError> {
        if let Some(g) = self.lookup_generation(id, known)? {
            return Ok(g);
        }
        let mut stack: Vec<(ObjectId, Vec<ObjectId>)> = vec![(*id, parents.to_vec())];
        let mut on_stack: AHashSet<ObjectId> = AHashSet::from_iter([*id]);
        let mut result = GENERATION_UNKNOWN;

        while let Some((top, top_parents)) = stack.last() {
            let mut pending = None;
            let mut max_parent = 0u32;
            let mut unknown = false;
            for parent in top_parents {
                match self.lookup_generation(parent, known)? {
                    Some(GENERATION_UNKNOWN) => unknown = true,
                    Some(g) => max_parent = max_parent.max(g),
                    None if on_stack.contains(parent) => unknown = true,
                    None => {
                        pending = Some(*parent);
                        break;
                    }
                }
            }
            if let Some(parent) = pending {
                let parsed = read_commit(self.store.as_ref(), &parent, &self.limits)?;
                on_stack.insert(parent);
                stack.push((parent, parsed.parents));
                continue;
            }
            let generation = if unknown {
                GENERATION_UNKNOWN
            } else {
                max_parent.saturating_add(1).min(GENERATION_MAX)
            };
            let top = *top;
            self.memo().insert(top, generation);
            on_stack.remove(&top);
            stack.pop();
            result = generation;
        }
        Ok(result)
    }
}

fn no_known(_: &ObjectId) -> Result<Option<u32>, OdbError> {
    Ok(None)
}

impl CommitNodeIndex for ObjectCommitNodeIndex {
    fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError> {
        self.get_with(id, &no_known)
    }

    fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError> {
        match node.author_time {
            Some(t) => Ok(t),
            None => Ok(read_commit(self.store.as_ref(), &node.id, &self.limits)?.author_time),
        }
    }
}

// ---------------------------------------------------------------------------
// Chained
// ---------------------------------------------------------------------------

/// Graph first, store on miss.
///
/// Store-backed nodes whose ancestry reaches the graph take their parents'
/// generations from the graph, so both sources agree within one walk.
#[derive(Debug)]
pub struct ChainedCommitNodeIndex {
    graph: GraphCommitNodeIndex,
    objects: ObjectCommitNodeIndex,
}

impl ChainedCommitNodeIndex {
    pub fn new(graph: GraphCommitNodeIndex, objects: ObjectCommitNodeIndex) -> Self {
        Self { graph, objects }
    }

    pub fn graph_index(&self) -> &GraphCommitNodeIndex {
        &self.graph
    }
}

impl CommitNodeIndex for ChainedCommitNodeIndex {
    fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError> {
        if let Some(node) = self.graph.try_get(id)? {
            return Ok(node);
        }
        self.objects.get_with(id, &|p: &ObjectId| self.graph.generation_of(p))
    }

    fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError> {
        self.graph.author_time(node)
    }
}

/// Picks the index for a repository: chained over the commit-graph when
/// one opens cleanly, else store-backed. An unusable graph is logged and
/// skipped.
pub fn open_index(
    store: Arc<dyn ObjectStore>,
    objects_dir: &Path,
    repo_limits: &RepoLimits,
    parse_limits: CommitParseLimits,
) -> Box<dyn CommitNodeIndex + Send + Sync> {
    match CommitGraph::open(objects_dir, store.format(), repo_limits) {
        Ok(Some(graph)) => index_for_graph(store, Some(Arc::new(graph)), parse_limits),
        Ok(None) => index_for_graph(store, None, parse_limits),
        Err(err) => {
            tracing::warn!(
                objects = %objects_dir.display(),
                error = %err,
                "commit-graph unusable; falling back to object store"
            );
            index_for_graph(store, None, parse_limits)
        }
    }
}

/// Builds the index over an already-opened graph.
pub fn index_for_graph(
    store: Arc<dyn ObjectStore>,
    graph: Option<Arc<CommitGraph>>,
    parse_limits: CommitParseLimits,
) -> Box<dyn CommitNodeIndex + Send + Sync> {
    let objects = ObjectCommitNodeIndex::new(Arc::clone(&store), parse_limits);
    match graph {
        Some(graph) => Box::new(ChainedCommitNodeIndex::new(
            GraphCommitNodeIndex::new(graph, store, parse_limits),
            objects,
        )),
        None => Box::new(objects),
    }
}
