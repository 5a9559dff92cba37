//! Synchronizer integration tests.
//!
//! - `scenarios`: fixed sequences with known outcomes
//! - `convergence`: two peers talking through a faulty link
//! - `properties`: proptest laws over counters, sync point and replay

#[path = "common/mod.rs"]
mod common;

mod synchronizer {
    pub mod convergence;
    pub mod properties;
    pub mod scenarios;
}
