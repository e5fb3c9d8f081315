#![no_main]

use std::path::PathBuf;

use libfuzzer_sys::fuzz_target;
use gitodb_rs::bytes::BytesView;
use gitodb_rs::{CommitGraph, CommitGraphFile, ObjectFormat};

const MAX_INPUT: usize = 256 * 1024;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT {
        return;
    }
    let view = BytesView::from_vec(data.to_vec());
    let Ok(file) = CommitGraphFile::from_bytes(PathBuf::from("fuzz"), view, ObjectFormat::Sha1) else {
        return;
    };
    let Ok(graph) = CommitGraph::from_layers(vec![file]) else {
        return;
    };
    for pos in 0..graph.commit_count().min(4096) {
        if let Ok(commit) = graph.commit_at(pos) {
            assert!(commit.parents.iter().all(|&p| p < graph.commit_count()));
            let _ = graph.lookup(&commit.id);
            let _ = graph.bloom_filter(pos);
        }
    }
});
