//! Ordered history traversal.
//!
//! One engine serves three orders; they differ only in the structure that
//! holds commits ready for emission:
//! - [`WalkOrder::Topological`]: a LIFO stack.
//! - [`WalkOrder::CommitDate`]: a max-heap on committer time.
//! - [`WalkOrder::AuthorDate`]: a max-heap on author time.
//!
//! Heap ties go to the lexicographically smaller id.
//!
//! # Algorithm
//! A commit becomes ready only once every child reachable in the walk has
//! been emitted, so children always precede parents. In-degrees are counted
//! lazily: an *explore* heap ordered by generation (then committer time)
//! is drained only down to the lowest generation among the commit about to
//! be emitted and its parents. Any child of a commit has a strictly higher
//! generation, so all children are counted before the parent's count can
//! reach zero.
//!
//! A generation of zero is "unknown". Seeing one switches the walk to full
//! exploration, after which ordering no longer depends on generations.
//!
//! # Exclusions
//! Ignored commits are never emitted and their parents are not followed
//! through them. Entries of the seen-external map set to `true` behave the
//! same way.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use ahash::{AHashMap, AHashSet};

use super::commit_node::{CommitNode, CommitNodeIndex, GENERATION_UNKNOWN};
use super::errors::OdbError;
use super::object_id::ObjectId;

/// Result of a visitor callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WalkOrder {
    Topological,
    CommitDate,
    AuthorDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ExploreKey {
    generation: u32,
    committer_time: i64,
    id: ObjectId,
}

impl Ord for ExploreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then(self.committer_time.cmp(&other.committer_time))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ExploreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap key: later time first, then smaller id.
type DateKey = (i64, Reverse<ObjectId>);

#[derive(Debug)]
enum Ready {
    Stack(Vec<ObjectId>),
    Heap(BinaryHeap<DateKey>),
}

impl Ready {
    fn pop(&mut self) -> Option<ObjectId> {
        match self {
            Self::Stack(stack) => stack.pop(),
            Self::Heap(heap) => heap.pop().map(|(_, Reverse(id))| id),
        }
    }
}

#[derive(Debug)]
struct Pending {
    node: CommitNode,
    in_degree: u32,
    explored: bool,
}

/// Iterator over commits reachable from a set of starts.
///
/// Yields `Err` at most once, after which it is exhausted.
pub struct CommitWalk<'a, I: CommitNodeIndex + ?Sized> {
    index: &'a I,
    order: WalkOrder,
    excluded: AHashSet<ObjectId>,
    pending: AHashMap<ObjectId, Pending>,
    emitted: AHashSet<ObjectId>,
    explore: BinaryHeap<ExploreKey>,
    ready: Ready,
    full_explore: bool,
    done: bool,
}

impl<'a, I: CommitNodeIndex + ?Sized> CommitWalk<'a, I> {
    /// Starts a walk without exclusions.
    pub fn new(index: &'a I, order: WalkOrder, starts: Vec<CommitNode>) -> Result<Self, OdbError> {
        Self::with_exclusions(index, order, starts, &[], &HashMap::new())
    }

    /// Starts a walk that skips `ignore` and every `seen_external` entry
    /// marked `true`.
    pub fn with_exclusions(
        index: &'a I,
        order: WalkOrder,
        starts: Vec<CommitNode>,
        ignore: &[ObjectId],
        seen_external: &HashMap<ObjectId, bool>,
    ) -> Result<Self, OdbError> {
        let mut excluded: AHashSet<ObjectId> = ignore.iter().copied().collect();
        excluded.extend(seen_external.iter().filter(|&(_, &seen)| seen).map(|(id, _)| *id));

        let ready = match order {
            WalkOrder::Topological => Ready::Stack(Vec::new()),
            WalkOrder::CommitDate | WalkOrder::AuthorDate => Ready::Heap(BinaryHeap::new()),
        };
        let mut walk = Self {
            index,
            order,
            excluded,
            pending: AHashMap::new(),
            emitted: AHashSet::new(),
            explore: BinaryHeap::new(),
            ready,
            full_explore: false,
            done: false,
        };

        let mut seeds = Vec::with_capacity(starts.len());
        let mut min_generation = u32::MAX;
        for node in starts {
            if walk.excluded.contains(&node.id) || walk.pending.contains_key(&node.id) {
                continue;
            }
            min_generation = min_generation.min(node.generation);
            seeds.push(node.id);
            walk.discover(node, 0);
        }
        tracing::debug!(?order, starts = seeds.len(), "commit walk started");

        walk.explore_to(min_generation)?;
        for id in seeds {
            if walk.pending.get(&id).is_some_and(|p| p.in_degree == 0) {
                walk.push_ready(&id)?;
            }
        }
        Ok(walk)
    }

    #[inline]
    pub fn order(&self) -> WalkOrder {
        self.order
    }

    fn discover(&mut self, node: CommitNode, in_degree: u32) {
        if node.generation == GENERATION_UNKNOWN {
            self.full_explore = true;
        }
        self.explore.push(ExploreKey {
            generation: node.generation,
            committer_time: node.committer_time,
            id: node.id,
        });
        self.pending.insert(
            node.id,
            Pending {
                node,
                in_degree,
                explored: false,
            },
        );
    }

    /// Counts in-degrees of everything at or above `generation`.
    fn explore_to(&mut self, generation: u32) -> Result<(), OdbError> {
        while let Some(top) = self.explore.peek() {
            if !self.full_explore && generation != GENERATION_UNKNOWN && top.generation < generation {
                break;
            }
            let Some(key) = self.explore.pop() else { break };
            let parent_ids = match self.pending.get_mut(&key.id) {
                Some(p) if !p.explored => {
                    p.explored = true;
                    unique(&p.node.parent_ids)
                }
                _ => continue,
            };
            for parent in parent_ids {
                if self.excluded.contains(&parent) || self.emitted.contains(&parent) {
                    continue;
                }
                match self.pending.get_mut(&parent) {
                    Some(p) => p.in_degree += 1,
                    None => {
                        let node = self.index.get(&parent)?;
                        self.discover(node, 1);
                    }
                }
            }
        }
        Ok(())
    }

    fn push_ready(&mut self, id: &ObjectId) -> Result<(), OdbError> {
        match &mut self.ready {
            Ready::Stack(stack) => stack.push(*id),
            Ready::Heap(heap) => {
                let Some(p) = self.pending.get(id) else {
                    return Ok(());
                };
                let time = match self.order {
                    WalkOrder::AuthorDate => self.index.author_time(&p.node)?,
                    _ => p.node.committer_time,
                };
                heap.push((time, Reverse(*id)));
            }
        }
        Ok(())
    }

    fn next_node(&mut self) -> Result<Option<CommitNode>, OdbError> {
        loop {
            let Some(id) = self.ready.pop() else {
                return Ok(None);
            };
            let Some(generation) = self
                .pending
                .get(&id)
                .filter(|p| p.in_degree == 0)
                .map(|p| p.node.generation)
            else {
                continue;
            };

            // Make sure this commit itself has been counted, then go as
            // deep as its lowest parent.
            self.explore_to(generation)?;
            let mut parents = unique(&self.pending[&id].node.parent_ids);
            parents.retain(|p| !self.excluded.contains(p));
            let min_generation = parents
                .iter()
                .filter_map(|p| self.pending.get(p))
                .map(|p| p.node.generation)
                .fold(generation, u32::min);
            self.explore_to(min_generation)?;

            for parent in parents {
                let Some(p) = self.pending.get_mut(&parent) else {
                    continue;
                };
                p.in_degree = p.in_degree.saturating_sub(1);
                if p.in_degree == 0 {
                    self.push_ready(&parent)?;
                }
            }
            self.emitted.insert(id);
            return Ok(self.pending.remove(&id).map(|p| p.node));
        }
    }

    /// Calls `visit` for each commit in order. `Visit::Stop` ends the walk
    /// with `Ok(())`; an error from `visit` is returned unchanged.
    pub fn for_each<E, F>(mut self, mut visit: F) -> Result<(), E>
    where
        E: From<OdbError>,
        F: FnMut(&CommitNode) -> Result<Visit, E>,
    {
        while let Some(node) = self.next_node()? {
            if visit(&node)? == Visit::Stop {
                break;
            }
        }
        Ok(())
    }
}

/// Parent ids with repeats dropped, first occurrence kept.
fn unique(ids: &[ObjectId]) -> Vec<ObjectId> {
    let mut out: Vec<ObjectId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

impl<I: CommitNodeIndex + ?Sized> Iterator for CommitWalk<'_, I> {
    type Item = Result<CommitNode, OdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_node() {
            Ok(Some(node)) => Some(Ok(node)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Topological walk from `starts`.
pub fn topo_order<I: CommitNodeIndex + ?Sized>(
    index: &I,
    starts: Vec<CommitNode>,
) -> Result<CommitWalk<'_, I>, OdbError> {
    CommitWalk::new(index, WalkOrder::Topological, starts)
}

/// Committer-date walk from `starts`.
pub fn commit_date_order<I: CommitNodeIndex + ?Sized>(
    index: &I,
    starts: Vec<CommitNode>,
) -> Result<CommitWalk<'_, I>, OdbError> {
    CommitWalk::new(index, WalkOrder::CommitDate, starts)
}

/// Author-date walk from `starts`.
pub fn author_date_order<I: CommitNodeIndex + ?Sized>(
    index: &I,
    starts: Vec<CommitNode>,
) -> Result<CommitWalk<'_, I>, OdbError> {
    CommitWalk::new(index, WalkOrder::AuthorDate, starts)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory index; generations computed the same way as the stores.
    #[derive(Default)]
    struct MemIndex {
        nodes: AHashMap<ObjectId, CommitNode>,
        author: AHashMap<ObjectId, i64>,
    }

    impl MemIndex {
        fn add(&mut self, n: u8, parents: &[u8], committer: i64, author: i64) -> ObjectId {
            let id = oid(n);
            let parent_ids: Vec<ObjectId> = parents.iter().map(|&p| oid(p)).collect();
            let generation = parent_ids
                .iter()
                .map(|p| self.nodes[p].generation)
                .max()
                .unwrap_or(0)
                + 1;
            self.nodes.insert(
                id,
                CommitNode {
                    id,
                    tree_id: oid(0),
                    parent_ids,
                    author_time: None,
                    committer_time: committer,
                    generation,
                },
            );
            self.author.insert(id, author);
            id
        }

        fn node(&self, n: u8) -> CommitNode {
            self.nodes[&oid(n)].clone()
        }
    }

    impl CommitNodeIndex for MemIndex {
        fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError> {
            self.nodes.get(id).cloned().ok_or(OdbError::NotFound { oid: *id })
        }

        fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError> {
            Ok(self.author[&node.id])
        }
    }

    fn oid(n: u8) -> ObjectId {
        ObjectId::sha1([n; 20])
    }

    fn names(index: &MemIndex, order: WalkOrder, starts: &[u8]) -> Vec<u8> {
        let starts = starts.iter().map(|&n| index.node(n)).collect();
        CommitWalk::new(index, order, starts)
            .unwrap()
            .map(|r| r.unwrap().id.as_slice()[0])
            .collect()
    }

    /// ```text
    /// 1 - 2 - 3 ----- 6 - 7
    ///      \         /
    ///       4 ---- 5
    /// ```
    fn diamond() -> MemIndex {
        let mut idx = MemIndex::default();
        idx.add(1, &[], 100, 100);
        idx.add(2, &[1], 200, 200);
        idx.add(3, &[2], 300, 500);
        idx.add(4, &[2], 400, 400);
        idx.add(5, &[4], 500, 300);
        idx.add(6, &[3, 5], 600, 600);
        idx.add(7, &[6], 700, 700);
        idx
    }

    fn assert_children_first(index: &MemIndex, out: &[u8]) {
        let pos = |n: u8| out.iter().position(|&x| x == n).unwrap();
        for &n in out {
            for p in &index.node(n).parent_ids {
                let p = p.as_slice()[0];
                if out.contains(&p) {
                    assert!(pos(n) < pos(p), "{n} must precede parent {p} in {out:?}");
                }
            }
        }
    }

    #[test]
    fn topological_order_follows_lifo_discipline() {
        let idx = diamond();
        let out = names(&idx, WalkOrder::Topological, &[7]);
        assert_eq!(out, vec![7, 6, 5, 4, 3, 2, 1]);
        assert_children_first(&idx, &out);
    }

    #[test]
    fn commit_date_order_uses_committer_time() {
        let idx = diamond();
        let out = names(&idx, WalkOrder::CommitDate, &[7]);
        assert_eq!(out, vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn author_date_order_uses_author_time() {
        let idx = diamond();
        let out = names(&idx, WalkOrder::AuthorDate, &[7]);
        assert_eq!(out, vec![7, 6, 3, 5, 4, 2, 1]);
        assert_children_first(&idx, &out);
    }

    #[test]
    fn equal_times_break_ties_by_smaller_id() {
        let mut idx = MemIndex::default();
        idx.add(1, &[], 10, 10);
        idx.add(3, &[1], 50, 50);
        idx.add(2, &[1], 50, 50);
        idx.add(4, &[3, 2], 60, 60);
        assert_eq!(names(&idx, WalkOrder::CommitDate, &[4]), vec![4, 2, 3, 1]);
    }

    #[test]
    fn skewed_clock_still_emits_children_first() {
        let mut idx = MemIndex::default();
        idx.add(1, &[], 500, 500);
        idx.add(2, &[1], 100, 100);
        idx.add(3, &[2], 200, 200);
        let out = names(&idx, WalkOrder::CommitDate, &[3]);
        assert_eq!(out, vec![3, 2, 1]);
    }

    #[test]
    fn multiple_starts_and_shared_history() {
        let idx = diamond();
        let out = names(&idx, WalkOrder::Topological, &[3, 5]);
        assert_eq!(out.len(), 5);
        assert_children_first(&idx, &out);
        // A start that is an ancestor of another start waits for it.
        let out = names(&idx, WalkOrder::Topological, &[2, 7]);
        assert_eq!(out[0], 7);
        assert_eq!(out.len(), 7);
        assert_children_first(&idx, &out);
    }

    #[test]
    fn ignore_set_prunes_and_hides() {
        let idx = diamond();
        let ignore = [oid(2)];
        let walk = CommitWalk::with_exclusions(&idx, WalkOrder::Topological, vec![idx.node(7)], &ignore, &HashMap::new())
            .unwrap();
        let out: Vec<u8> = walk.map(|r| r.unwrap().id.as_slice()[0]).collect();
        assert_eq!(out, vec![7, 6, 5, 4, 3]);

        let walk = CommitWalk::with_exclusions(&idx, WalkOrder::CommitDate, vec![idx.node(2)], &ignore, &HashMap::new())
            .unwrap();
        assert_eq!(walk.count(), 0);
    }

    #[test]
    fn seen_external_true_entries_are_excluded() {
        let idx = diamond();
        let seen = HashMap::from([(oid(6), false), (oid(4), true)]);
        let walk = CommitWalk::with_exclusions(&idx, WalkOrder::Topological, vec![idx.node(7)], &[], &seen).unwrap();
        let out: Vec<u8> = walk.map(|r| r.unwrap().id.as_slice()[0]).collect();
        assert_eq!(out, vec![7, 6, 5, 3, 2, 1]);
    }

    #[test]
    fn unknown_generations_explore_fully() {
        let mut idx = diamond();
        for node in idx.nodes.values_mut() {
            node.generation = GENERATION_UNKNOWN;
        }
        let out = names(&idx, WalkOrder::Topological, &[7]);
        assert_eq!(out.len(), 7);
        assert_children_first(&idx, &out);
    }

    #[derive(Debug, PartialEq)]
    enum VisitError {
        Odb,
        Boom(u8),
    }

    impl From<OdbError> for VisitError {
        fn from(_: OdbError) -> Self {
            VisitError::Odb
        }
    }

    #[test]
    fn for_each_stops_and_propagates_errors() {
        let idx = diamond();
        let mut seen = Vec::new();
        CommitWalk::new(&idx, WalkOrder::Topological, vec![idx.node(7)])
            .unwrap()
            .for_each(|node| {
                seen.push(node.id.as_slice()[0]);
                Ok::<_, VisitError>(if seen.len() == 3 { Visit::Stop } else { Visit::Continue })
            })
            .unwrap();
        assert_eq!(seen, vec![7, 6, 5]);

        let err = CommitWalk::new(&idx, WalkOrder::CommitDate, vec![idx.node(7)])
            .unwrap()
            .for_each(|node| {
                let n = node.id.as_slice()[0];
                if n == 6 {
                    Err(VisitError::Boom(n))
                } else {
                    Ok(Visit::Continue)
                }
            })
            .unwrap_err();
        assert_eq!(err, VisitError::Boom(6));
    }

    #[test]
    fn missing_parent_surfaces_not_found() {
        let mut idx = MemIndex::default();
        idx.add(1, &[], 1, 1);
        idx.add(2, &[1], 2, 2);
        idx.nodes.remove(&oid(1));
        // Exploring the start already reaches the missing parent.
        let err = CommitWalk::new(&idx, WalkOrder::Topological, vec![idx.node(2)]).err().unwrap();
        assert!(err.is_not_found());
    }
}
