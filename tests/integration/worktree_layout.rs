//! Linked worktrees: private and shared state land in the right git dir.

use std::fs;
use std::path::{Path, PathBuf};

use gitodb_rs::commit_parse::{encode_commit, Signature};
use gitodb_rs::{
    Filesystem, FsError, Object, ObjectKind, ObjectStore, Repository, RepositoryOptions,
};
use tempfile::TempDir;

struct Layout {
    _dir: TempDir,
    main_root: PathBuf,
    main_git: PathBuf,
    wt_root: PathBuf,
    wt_git: PathBuf,
}

/// A worktree repository plus one linked worktree named `wt`.
fn layout() -> Layout {
    let dir = tempfile::tempdir().unwrap();
    let main_root = dir.path().join("main");
    let main_git = main_root.join(".git");
    for sub in ["objects/pack", "objects/info", "refs/heads"] {
        fs::create_dir_all(main_git.join(sub)).unwrap();
    }
    fs::write(main_git.join("HEAD"), b"ref: refs/heads/main\n").unwrap();

    let wt_git = main_git.join("worktrees/wt");
    fs::create_dir_all(&wt_git).unwrap();
    fs::write(wt_git.join("commondir"), b"../..\n").unwrap();
    fs::write(wt_git.join("HEAD"), b"ref: refs/heads/topic\n").unwrap();

    let wt_root = dir.path().join("wt");
    fs::create_dir_all(&wt_root).unwrap();
    fs::write(wt_root.join(".git"), format!("gitdir: {}\n", wt_git.display())).unwrap();

    Layout {
        main_root,
        main_git: fs::canonicalize(&main_git).unwrap(),
        wt_root,
        wt_git: fs::canonicalize(&wt_git).unwrap(),
        _dir: dir,
    }
}

fn exists(root: &Path, rel: &str) -> bool {
    root.join(rel).exists()
}

#[test]
fn shared_entries_go_to_the_common_dir() {
    let l = layout();
    let repo = Repository::open(&l.wt_root, RepositoryOptions::default()).unwrap();
    assert!(repo.paths().is_linked_worktree());
    assert_eq!(repo.fs().root(), l.wt_git.as_path());

    for dir in [
        "objects", "refs", "packed-refs", "config", "branches", "hooks", "info", "remotes", "logs",
        "shallow", "worktrees",
    ] {
        let nested = format!("{dir}/nested");
        repo.fs().mkdir_all(&nested).unwrap();
        assert!(exists(&l.main_git, &nested), "{dir}");
        assert!(!exists(&l.wt_git, dir), "{dir}");
    }
}

#[test]
fn per_worktree_exceptions_stay_private() {
    let l = layout();
    let repo = Repository::open(&l.wt_root, RepositoryOptions::default()).unwrap();
    for path in ["logs/HEAD", "refs/bisect", "refs/rewritten", "refs/worktree"] {
        repo.fs().create(path).unwrap();
        assert!(exists(&l.wt_git, path), "{path}");
        assert!(!exists(&l.main_git, path), "{path}");
    }

    repo.fs().mkdir_all("a/b/c").unwrap();
    assert!(exists(&l.wt_git, "a/b/c"));
    assert!(!exists(&l.main_git, "a/b/c"));

    let mut head = String::new();
    std::io::Read::read_to_string(&mut repo.fs().open("HEAD").unwrap(), &mut head).unwrap();
    assert_eq!(head, "ref: refs/heads/topic\n");
}

#[test]
fn chrooted_refs_handle_keeps_worktree_exceptions() {
    let l = layout();
    let repo = Repository::open(&l.wt_root, RepositoryOptions::default()).unwrap();
    let refs = repo.fs().chroot("refs").unwrap();
    assert_eq!(refs.root(), l.main_git.join("refs").as_path());

    refs.create("bisect/bad").unwrap();
    refs.create("heads/topic").unwrap();
    assert!(exists(&l.wt_git, "refs/bisect/bad"));
    assert!(!exists(&l.main_git, "refs/bisect"));
    assert!(exists(&l.main_git, "refs/heads/topic"));
    assert!(!exists(&l.wt_git, "refs/heads"));
}

#[test]
fn renames_cannot_cross_roots() {
    let l = layout();
    let repo = Repository::open(&l.wt_root, RepositoryOptions::default()).unwrap();
    repo.fs().create("scratch").unwrap();
    let err = repo.fs().rename("scratch", "refs/heads/scratch").unwrap_err();
    assert!(matches!(err, FsError::CrossRootRename { .. }));
    assert!(exists(&l.wt_git, "scratch"));

    repo.fs().create("refs/heads/a").unwrap();
    repo.fs().rename("refs/heads/a", "refs/heads/b").unwrap();
    assert!(exists(&l.main_git, "refs/heads/b"));
}

#[test]
fn paths_outside_the_git_dir_are_refused() {
    let l = layout();
    let repo = Repository::open(&l.wt_root, RepositoryOptions::default()).unwrap();
    assert!(matches!(
        repo.fs().create("../../escape").unwrap_err(),
        FsError::EscapesRoot { .. }
    ));
}

#[test]
fn objects_and_graphs_are_shared_between_worktrees() {
    let l = layout();
    let wt = Repository::open(&l.wt_root, RepositoryOptions::default()).unwrap();
    let tree = wt.odb().put(&Object::new(ObjectKind::Tree, Vec::new())).unwrap();
    let sig = Signature::new("Dev", "dev@example.com", 1_600_000_000);
    let root = wt
        .odb()
        .put(&Object::new(ObjectKind::Commit, encode_commit(&tree, &[], &sig, &sig, "root\n")))
        .unwrap();
    let graph_path = wt.write_commit_graph(&[root]).unwrap();
    assert!(graph_path.starts_with(&l.main_git));

    let main = Repository::open(&l.main_root, RepositoryOptions::default()).unwrap();
    assert!(!main.paths().is_linked_worktree());
    assert!(main.odb().has(&root).unwrap());
    let graph = main.commit_graph().unwrap().unwrap();
    assert_eq!(graph.commit_count(), 1);
}
