//! Shared test infrastructure.
//!
//! - `stubs`: a two-fighter game with a per-side step function
//! - `channel`: a scripted lossy link and a peer harness
//!
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::stubs::{peer, Side};
//! ```

pub mod channel;
pub mod stubs;

/// Routes `tracing` output through the test harness. Safe to call from every
/// test.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
