//! Walk orders on random DAGs and commit-graph generations.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use proptest::prelude::*;

use gitodb_rs::bytes::BytesView;
use gitodb_rs::{
    write_commit_graph, CommitGraph, CommitGraphFile, CommitNode, CommitNodeIndex, CommitWalk,
    GraphInput, ObjectFormat, ObjectId, OdbError, WalkOrder,
};

#[derive(Clone, Debug)]
struct Dag {
    /// Parents of commit `i`, all smaller than `i`.
    parents: Vec<Vec<u16>>,
    committer: Vec<i64>,
    author: Vec<i64>,
}

fn dag() -> impl Strategy<Value = Dag> {
    (1usize..40)
        .prop_flat_map(|n| {
            (
                prop::collection::vec(prop::collection::vec(any::<u16>(), 0..4), n),
                prop::collection::vec(0i64..1_000, n),
                prop::collection::vec(0i64..1_000, n),
            )
        })
        .prop_map(|(raw, committer, author)| {
            let parents = raw
                .into_iter()
                .enumerate()
                .map(|(i, picks)| {
                    if i == 0 {
                        return Vec::new();
                    }
                    let mut seen = HashSet::new();
                    picks
                        .into_iter()
                        .map(|p| p % i as u16)
                        .filter(|p| seen.insert(*p))
                        .collect()
                })
                .collect();
            Dag {
                parents,
                committer,
                author,
            }
        })
}

fn oid(i: usize) -> ObjectId {
    let mut bytes = [0u8; 20];
    bytes[..8].copy_from_slice(&(i as u64 + 1).to_be_bytes());
    ObjectId::sha1(bytes)
}

struct DagIndex {
    nodes: HashMap<ObjectId, CommitNode>,
    author: HashMap<ObjectId, i64>,
}

impl DagIndex {
    fn new(dag: &Dag, known_generations: bool) -> Self {
        let mut generations = vec![0u32; dag.parents.len()];
        let mut nodes = HashMap::new();
        let mut author = HashMap::new();
        for (i, parents) in dag.parents.iter().enumerate() {
            let generation = parents.iter().map(|&p| generations[usize::from(p)]).max().unwrap_or(0) + 1;
            generations[i] = generation;
            let id = oid(i);
            nodes.insert(
                id,
                CommitNode {
                    id,
                    tree_id: oid(usize::MAX >> 1),
                    parent_ids: parents.iter().map(|&p| oid(usize::from(p))).collect(),
                    author_time: Some(dag.author[i]),
                    committer_time: dag.committer[i],
                    generation: if known_generations { generation } else { 0 },
                },
            );
            author.insert(id, dag.author[i]);
        }
        Self { nodes, author }
    }
}

impl CommitNodeIndex for DagIndex {
    fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError> {
        self.nodes.get(id).cloned().ok_or(OdbError::NotFound { oid: *id })
    }

    fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError> {
        Ok(self.author[&node.id])
    }
}

fn reachable(dag: &Dag, tip: usize) -> HashSet<ObjectId> {
    let mut out = HashSet::new();
    let mut stack = vec![tip];
    while let Some(i) = stack.pop() {
        if out.insert(oid(i)) {
            stack.extend(dag.parents[i].iter().map(|&p| usize::from(p)));
        }
    }
    out
}

fn check_order(dag: &Dag, index: &DagIndex, order: WalkOrder) -> Result<(), TestCaseError> {
    let tip = dag.parents.len() - 1;
    let start = index.get(&oid(tip)).unwrap();
    let sequence: Vec<ObjectId> = CommitWalk::new(index, order, vec![start])
        .unwrap()
        .map(|n| n.unwrap().id)
        .collect();

    let position: HashMap<ObjectId, usize> = sequence.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    prop_assert_eq!(position.len(), sequence.len());
    prop_assert_eq!(position.keys().copied().collect::<HashSet<_>>(), reachable(dag, tip));
    for id in &sequence {
        for parent in &index.nodes[id].parent_ids {
            prop_assert!(position[id] < position[parent]);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn walks_emit_reachable_set_children_first(dag in dag()) {
        let index = DagIndex::new(&dag, true);
        for order in [WalkOrder::Topological, WalkOrder::CommitDate, WalkOrder::AuthorDate] {
            check_order(&dag, &index, order)?;
        }
    }

    #[test]
    fn unknown_generations_still_order_children_first(dag in dag()) {
        let index = DagIndex::new(&dag, false);
        for order in [WalkOrder::Topological, WalkOrder::CommitDate, WalkOrder::AuthorDate] {
            check_order(&dag, &index, order)?;
        }
    }

    #[test]
    fn graph_generations_match_longest_root_path(dag in dag()) {
        let index = DagIndex::new(&dag, true);
        let inputs: Vec<GraphInput> = index
            .nodes
            .values()
            .map(|node| GraphInput {
                id: node.id,
                tree: node.tree_id,
                parents: node.parent_ids.clone(),
                commit_time: node.committer_time,
                bloom: None,
            })
            .collect();
        let bytes = write_commit_graph(ObjectFormat::Sha1, &inputs, None).unwrap();
        let file = CommitGraphFile::from_bytes(PathBuf::from("commit-graph"), BytesView::from_vec(bytes), ObjectFormat::Sha1)
            .unwrap();
        let graph = CommitGraph::from_layers(vec![file]).unwrap();
        prop_assert_eq!(graph.commit_count() as usize, dag.parents.len());

        for node in index.nodes.values() {
            let pos = graph.lookup(&node.id).unwrap();
            let commit = graph.commit_at(pos).unwrap();
            prop_assert_eq!(commit.generation, node.generation);
            prop_assert_eq!(commit.commit_time, node.committer_time as u64);
            let parents: Vec<ObjectId> = commit.parents.iter().map(|&p| graph.id_at(p).unwrap()).collect();
            prop_assert_eq!(&parents, &node.parent_ids);
        }
    }
}
