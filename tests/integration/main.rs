// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

//! Integration tests for the installation controller
//!
//! They run against the cluster in the current kubeconfig and are ignored by
//! default:
//!
//! ```bash
//! cargo test --test integration -- --ignored --test-threads=1
//! ```
//!
//! No product operators are installed, so the tests stop at what the
//! installation controller does on its own: startup setup, preflight and the
//! bootstrap stage.

#[path = "../common/mod.rs"]
mod common;

mod harness;
mod installation_tests;

pub use harness::*;
