//! Walk order agreement between graph-backed and store-backed indexes.

use std::collections::{HashMap, HashSet};

use gitodb_rs::commit_parse::{encode_commit, Signature};
use gitodb_rs::{
    CommitNode, CommitNodeIndex, CommitParseLimits, CommitWalk, Object, ObjectCommitNodeIndex,
    ObjectId, ObjectKind, ObjectStore, Repository, RepositoryOptions, WalkOrder,
};
use tempfile::TempDir;

const ORDERS: [WalkOrder; 3] = [
    WalkOrder::Topological,
    WalkOrder::CommitDate,
    WalkOrder::AuthorDate,
];

/// A bare repository holding a history with long-lived branches, a
/// two-parent merge and an octopus merge.
struct History {
    _dir: TempDir,
    repo: Repository,
    tree: ObjectId,
    made: u32,
    parents: HashMap<ObjectId, Vec<ObjectId>>,
    /// Tip of the history before the octopus merge.
    merge: ObjectId,
    tip: ObjectId,
}

impl History {
    fn build() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init_bare(&dir.path().join("repo.git"), RepositoryOptions::default()).unwrap();
        let tree = repo.odb().put(&Object::new(ObjectKind::Tree, Vec::new())).unwrap();
        let mut h = Self {
            _dir: dir,
            repo,
            tree,
            made: 0,
            parents: HashMap::new(),
            merge: ObjectId::null(gitodb_rs::ObjectFormat::Sha1),
            tip: ObjectId::null(gitodb_rs::ObjectFormat::Sha1),
        };

        let root = h.commit(&[]);
        let main = h.line(root, 10);
        let feature = h.line(main[2], 5);
        let merge = h.commit(&[main[9], feature[4]]);
        let side = h.line(main[4], 4);
        let fix = h.line(feature[1], 3);
        let octopus = h.commit(&[merge, side[3], fix[2]]);
        let tail = h.line(octopus, 5);

        h.merge = merge;
        h.tip = tail[4];
        h
    }

    /// Committer times rise with creation order; author times are
    /// scattered so author-date order differs from committer-date order.
    fn commit(&mut self, parents: &[ObjectId]) -> ObjectId {
        self.made += 1;
        let n = i64::from(self.made);
        let author = 1_000 + (n * 7_919) % 997;
        let committer = 2_000 + n * 10;
        let data = encode_commit(
            &self.tree,
            parents,
            &Signature::new("Author", "author@example.com", author),
            &Signature::new("Committer", "committer@example.com", committer),
            &format!("commit {n}\n"),
        );
        let id = self.repo.odb().put(&Object::new(ObjectKind::Commit, data)).unwrap();
        self.parents.insert(id, parents.to_vec());
        id
    }

    fn line(&mut self, from: ObjectId, len: usize) -> Vec<ObjectId> {
        let mut out = Vec::with_capacity(len);
        let mut prev = from;
        for _ in 0..len {
            prev = self.commit(&[prev]);
            out.push(prev);
        }
        out
    }

    fn store_index(&self) -> ObjectCommitNodeIndex {
        ObjectCommitNodeIndex::new(self.repo.store(), CommitParseLimits::DEFAULT)
    }
}

fn walk<I: CommitNodeIndex + ?Sized>(index: &I, order: WalkOrder, tips: &[ObjectId]) -> Vec<ObjectId> {
    let starts: Vec<CommitNode> = tips.iter().map(|t| index.get(t).unwrap()).collect();
    CommitWalk::new(index, order, starts)
        .unwrap()
        .map(|node| node.unwrap().id)
        .collect()
}

fn assert_children_first(history: &History, sequence: &[ObjectId]) {
    let position: HashMap<ObjectId, usize> = sequence.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    assert_eq!(position.len(), sequence.len(), "commit emitted twice");
    for (child, parents) in &history.parents {
        let Some(&c) = position.get(child) else { continue };
        for parent in parents {
            if let Some(&p) = position.get(parent) {
                assert!(c < p, "parent emitted before child");
            }
        }
    }
}

#[test]
fn every_order_covers_the_whole_history() {
    let history = History::build();
    let index = history.store_index();
    for order in ORDERS {
        let sequence = walk(&index, order, &[history.tip]);
        assert_eq!(sequence.len(), history.made as usize, "{order:?}");
        assert_eq!(sequence[0], history.tip);
        assert_children_first(&history, &sequence);
    }
}

#[test]
fn graph_and_store_indexes_agree() {
    let history = History::build();
    let store_index = history.store_index();
    history.repo.write_commit_graph(&[history.tip]).unwrap();
    let graph = history.repo.commit_graph().unwrap().unwrap();
    assert_eq!(graph.commit_count(), history.made);

    let graph_index = history.repo.commit_index();
    for order in ORDERS {
        assert_eq!(
            walk(&*graph_index, order, &[history.tip]),
            walk(&store_index, order, &[history.tip]),
            "{order:?}"
        );
    }
}

#[test]
fn partial_graph_agrees_with_store() {
    let history = History::build();
    let store_index = history.store_index();
    history.repo.write_commit_graph(&[history.merge]).unwrap();
    let graph = history.repo.commit_graph().unwrap().unwrap();
    assert!(graph.commit_count() < history.made);

    let chained = history.repo.commit_index();
    for order in ORDERS {
        assert_eq!(
            walk(&*chained, order, &[history.tip]),
            walk(&store_index, order, &[history.tip]),
            "{order:?}"
        );
    }
}

#[test]
fn chain_layers_agree_with_store() {
    let history = History::build();
    let store_index = history.store_index();
    history.repo.append_commit_graph_layer(&[history.merge]).unwrap().unwrap();
    history.repo.append_commit_graph_layer(&[history.tip]).unwrap().unwrap();
    let graph = history.repo.commit_graph().unwrap().unwrap();
    assert_eq!(graph.layer_count(), 2);
    assert_eq!(graph.commit_count(), history.made);

    let index = history.repo.commit_index();
    for order in ORDERS {
        assert_eq!(
            walk(&*index, order, &[history.tip]),
            walk(&store_index, order, &[history.tip]),
            "{order:?}"
        );
    }
}

#[test]
fn multiple_starts_emit_each_commit_once() {
    let history = History::build();
    let index = history.store_index();
    let sequence = walk(&index, WalkOrder::CommitDate, &[history.merge, history.tip, history.merge]);
    assert_eq!(sequence.len(), history.made as usize);
    assert_eq!(sequence.iter().collect::<HashSet<_>>().len(), sequence.len());
}

#[test]
fn stopping_early_visits_a_prefix() {
    let history = History::build();
    let index = history.store_index();
    let full = walk(&index, WalkOrder::Topological, &[history.tip]);

    let mut seen = Vec::new();
    let start = index.get(&history.tip).unwrap();
    CommitWalk::new(&index, WalkOrder::Topological, vec![start])
        .unwrap()
        .for_each::<gitodb_rs::OdbError, _>(|node| {
            seen.push(node.id);
            Ok(if seen.len() == 7 {
                gitodb_rs::Visit::Stop
            } else {
                gitodb_rs::Visit::Continue
            })
        })
        .unwrap();
    assert_eq!(seen, full[..7]);
}

#[test]
fn ignored_merge_hides_only_its_exclusive_history() {
    let history = History::build();
    let index = history.store_index();
    let start = index.get(&history.tip).unwrap();
    let sequence: Vec<ObjectId> =
        CommitWalk::with_exclusions(&index, WalkOrder::Topological, vec![start], &[history.merge], &HashMap::new())
            .unwrap()
            .map(|node| node.unwrap().id)
            .collect();

    assert!(!sequence.contains(&history.merge));
    assert!(sequence.len() < history.made as usize - 1);
    assert_children_first(&history, &sequence);
}
