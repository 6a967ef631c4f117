// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the topology and failover managers.
//!
//! These tests run the exact production command sequencing against recording
//! fakes, WITHOUT requiring a live Kubernetes cluster or Redis pods.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_scale_down_full_sequence
//!
//! # Run with verbose output
//! cargo test --test functional -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **Topology tests**: bootstrap, grow, scale-down, repair and health
//!   sequencing for sharded clusters
//! - **Failover tests**: master election, replica promotion and re-pointing
//!   for replication groups

mod failover_tests;
mod mock_admin;
mod topology_tests;
