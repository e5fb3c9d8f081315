//! History traversal and commit-graph writing benchmarks.
//!
//! Synthetic shapes:
//! - long linear chains
//! - deep/wide layered DAGs where every commit merges two of the
//!   previous layer
//!
//! Usage:
//! `cargo bench --bench commit_walk`

use std::collections::HashMap;

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use gitodb_rs::{
    write_commit_graph, CommitNode, CommitNodeIndex, CommitWalk, GraphInput, ObjectFormat,
    ObjectId, OdbError, WalkOrder,
};

fn oid_from_u64(value: u64) -> ObjectId {
    let mut bytes = [0u8; 20];
    bytes[..8].copy_from_slice(&value.to_be_bytes());
    ObjectId::sha1(bytes)
}

fn make_input(id: u64, parents: &[u64]) -> GraphInput {
    GraphInput {
        id: oid_from_u64(id),
        tree: oid_from_u64(id ^ 0xAA55_AA55_AA55_AA55),
        parents: parents.iter().map(|p| oid_from_u64(*p)).collect(),
        commit_time: id as i64,
        bloom: None,
    }
}

fn linear_chain(count: usize) -> Vec<GraphInput> {
    let mut commits = Vec::with_capacity(count);
    for idx in 0..count as u64 {
        let parents = if idx == 0 { vec![] } else { vec![idx - 1] };
        commits.push(make_input(idx, &parents));
    }
    // Children first, so generation assignment cannot ride input order.
    commits.reverse();
    commits
}

fn layered_dag(depth: usize, width: usize) -> Vec<GraphInput> {
    let mut commits = Vec::with_capacity(depth * width);
    for layer in 0..depth as u64 {
        for col in 0..width as u64 {
            let id = layer * width as u64 + col;
            let parents = if layer == 0 {
                vec![]
            } else {
                let prev = (layer - 1) * width as u64;
                vec![prev + col, prev + ((col + 1) % width as u64)]
            };
            commits.push(make_input(id, &parents));
        }
    }
    commits.reverse();
    commits
}

/// In-memory index with precomputed generations.
struct BenchIndex {
    nodes: HashMap<ObjectId, CommitNode>,
}

impl BenchIndex {
    fn new(inputs: &[GraphInput]) -> Self {
        let mut nodes: HashMap<ObjectId, CommitNode> = HashMap::with_capacity(inputs.len());
        // Inputs are children first; walk them parents first.
        for input in inputs.iter().rev() {
            let generation = input
                .parents
                .iter()
                .map(|p| nodes[p].generation)
                .max()
                .unwrap_or(0)
                + 1;
            nodes.insert(
                input.id,
                CommitNode {
                    id: input.id,
                    tree_id: input.tree,
                    parent_ids: input.parents.clone(),
                    author_time: Some(input.commit_time ^ 0x55),
                    committer_time: input.commit_time,
                    generation,
                },
            );
        }
        Self { nodes }
    }
}

impl CommitNodeIndex for BenchIndex {
    fn get(&self, id: &ObjectId) -> Result<CommitNode, OdbError> {
        self.nodes.get(id).cloned().ok_or(OdbError::NotFound { oid: *id })
    }

    fn author_time(&self, node: &CommitNode) -> Result<i64, OdbError> {
        Ok(node.author_time.unwrap_or(node.committer_time))
    }
}

fn bench_graph_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_walk/graph_write");
    group.sample_size(20);

    for count in [1_024usize, 4_096, 16_384] {
        let commits = linear_chain(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("linear", count), &commits, |b, commits| {
            b.iter(|| {
                let bytes = write_commit_graph(ObjectFormat::Sha1, black_box(commits), None)
                    .expect("graph write should succeed");
                black_box(bytes);
            });
        });
    }

    for (depth, width) in [(256usize, 16usize), (1_024, 8)] {
        let commits = layered_dag(depth, width);
        group.throughput(Throughput::Elements(commits.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("layered", format!("{depth}x{width}")),
            &commits,
            |b, commits| {
                b.iter(|| {
                    let bytes = write_commit_graph(ObjectFormat::Sha1, black_box(commits), None)
                        .expect("graph write should succeed");
                    black_box(bytes);
                });
            },
        );
    }
    group.finish();
}

fn bench_walk_orders(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_walk/orders");
    group.sample_size(20);

    let commits = layered_dag(512, 8);
    let index = BenchIndex::new(&commits);
    let tips: Vec<ObjectId> = commits[..8].iter().map(|c| c.id).collect();
    group.throughput(Throughput::Elements(commits.len() as u64));

    for order in [WalkOrder::Topological, WalkOrder::CommitDate, WalkOrder::AuthorDate] {
        group.bench_function(BenchmarkId::from_parameter(format!("{order:?}")), |b| {
            b.iter_batched(
                || tips.iter().map(|t| index.nodes[t].clone()).collect::<Vec<_>>(),
                |starts| {
                    let walk = CommitWalk::new(&index, order, starts).expect("walk should start");
                    let mut count = 0usize;
                    for node in walk {
                        black_box(node.expect("walk should not fail"));
                        count += 1;
                    }
                    black_box(count);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_graph_write, bench_walk_orders);
criterion_main!(benches);
