//! Property-based tests.
//!
//! Run with: `cargo test --test property`

mod content_addressing;
mod delta_codec;
mod history_order;
