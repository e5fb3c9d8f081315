//! Pack import into a repository and reads back through a fresh store.

use std::fs;

use gitodb_rs::commit_parse::{encode_commit, Signature};
use gitodb_rs::{
    encode_pack, topo_order, ChecksumTarget, CommitNodeIndex, Object, ObjectFormat, ObjectId,
    ObjectKind, ObjectStore, OdbError, PackWriteOptions, Repository, RepositoryOptions,
};
use tempfile::TempDir;

fn bare_repo() -> (TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init_bare(&dir.path().join("repo.git"), RepositoryOptions::default()).unwrap();
    (dir, repo)
}

fn reopen(repo: &Repository) -> Repository {
    Repository::open(&repo.paths().git_dir, RepositoryOptions::default()).unwrap()
}

/// Successive revisions of one file; later ones deltify against earlier.
fn revisions(count: usize) -> Vec<Object> {
    let mut text = String::new();
    (0..count)
        .map(|i| {
            text.push_str(&format!("line {i}: the quick brown fox jumps over the lazy dog\n"));
            Object::new(ObjectKind::Blob, text.clone().into_bytes())
        })
        .collect()
}

fn pack_file_count(repo: &Repository) -> usize {
    fs::read_dir(&repo.paths().pack_dir)
        .map(|rd| rd.count())
        .unwrap_or(0)
}

#[test]
fn imported_objects_survive_reopen() {
    let (_dir, repo) = bare_repo();
    let mut objects = revisions(40);
    objects.push(Object::new(ObjectKind::Tree, Vec::new()));
    let encoded = encode_pack(ObjectFormat::Sha1, &objects, &PackWriteOptions::DEFAULT).unwrap();
    // Deltas make the pack much smaller than the sum of its objects.
    let raw: usize = objects.iter().map(|o| o.data.len()).sum();
    assert!(encoded.bytes.len() < raw / 2);

    let imported = repo.odb().import_pack(&encoded.bytes).unwrap();
    assert_eq!(imported.object_count, objects.len());
    assert_eq!(pack_file_count(&repo), 2);

    let fresh = reopen(&repo);
    for obj in &objects {
        let id = obj.id(ObjectFormat::Sha1);
        assert!(fresh.odb().has(&id).unwrap());
        assert_eq!(&fresh.odb().get(&id).unwrap(), obj);
        assert_eq!(fresh.odb().header(&id).unwrap().size, obj.size());
        fresh.odb().verify_object(&id).unwrap();
    }
    assert_eq!(fresh.odb().iterate(Some(ObjectKind::Blob)).unwrap().count(), 40);
}

#[test]
fn corrupt_trailer_leaves_store_untouched() {
    let (_dir, repo) = bare_repo();
    let encoded = encode_pack(ObjectFormat::Sha1, &revisions(5), &PackWriteOptions::DEFAULT).unwrap();
    let mut bytes = encoded.bytes;
    let last = bytes.len() - 1;
    bytes[last] ^= 0x55;

    let err = repo.odb().import_pack(&bytes).unwrap_err();
    assert!(matches!(
        err,
        OdbError::ChecksumMismatch {
            target: ChecksumTarget::Pack,
            ..
        }
    ));
    assert_eq!(pack_file_count(&repo), 0);
    assert_eq!(reopen(&repo).odb().iterate(None).unwrap().count(), 0);
}

#[test]
fn truncated_pack_is_rejected() {
    let (_dir, repo) = bare_repo();
    let encoded = encode_pack(ObjectFormat::Sha1, &revisions(5), &PackWriteOptions::NO_DELTA).unwrap();
    let cut = &encoded.bytes[..encoded.bytes.len() / 2];
    assert!(repo.odb().import_pack(cut).is_err());
    assert_eq!(pack_file_count(&repo), 0);
}

#[test]
fn loose_and_packed_objects_are_listed_together() {
    let (_dir, repo) = bare_repo();
    let loose = Object::new(ObjectKind::Blob, b"loose\n".to_vec());
    let loose_id = repo.odb().put(&loose).unwrap();
    let packed = Object::new(ObjectKind::Blob, b"packed\n".to_vec());
    let encoded = encode_pack(ObjectFormat::Sha1, &[packed.clone()], &PackWriteOptions::DEFAULT).unwrap();
    repo.odb().import_pack(&encoded.bytes).unwrap();

    let fresh = reopen(&repo);
    let mut ids: Vec<ObjectId> = fresh.odb().iterate(None).unwrap().collect::<Result<_, _>>().unwrap();
    ids.sort();
    let mut expected = vec![loose_id, packed.id(ObjectFormat::Sha1)];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn packed_history_can_be_walked() {
    let (_dir, repo) = bare_repo();
    let tree = Object::new(ObjectKind::Tree, Vec::new());
    let tree_id = tree.id(ObjectFormat::Sha1);
    let mut objects = vec![tree];
    let mut chain = Vec::new();
    let mut parent: Option<ObjectId> = None;
    for t in 0..12i64 {
        let parents: Vec<ObjectId> = parent.into_iter().collect();
        let sig = Signature::new("Dev", "dev@example.com", 1_700_000_000 + t);
        let commit = Object::new(ObjectKind::Commit, encode_commit(&tree_id, &parents, &sig, &sig, "step\n"));
        let id = commit.id(ObjectFormat::Sha1);
        objects.push(commit);
        chain.push(id);
        parent = Some(id);
    }
    let encoded = encode_pack(ObjectFormat::Sha1, &objects, &PackWriteOptions::DEFAULT).unwrap();
    repo.odb().import_pack(&encoded.bytes).unwrap();

    let tip = *chain.last().unwrap();
    repo.write_commit_graph(&[tip]).unwrap();
    let fresh = reopen(&repo);
    let index = fresh.commit_index();
    let start = index.get(&tip).unwrap();
    assert_eq!(start.generation, 12);

    let walked: Vec<ObjectId> = topo_order(&*index, vec![start])
        .unwrap()
        .map(|n| n.unwrap().id)
        .collect();
    chain.reverse();
    assert_eq!(walked, chain);
}
