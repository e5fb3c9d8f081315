//! End-to-end tests over on-disk repositories.
//!
//! Run with: `cargo test --test integration`

mod history_walks;
mod pack_import;
mod worktree_layout;
