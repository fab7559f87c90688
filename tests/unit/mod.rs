// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the integreatly operator
//!
//! This module contains unit tests for:
//! - Quota selection and workload sizing
//! - Stage graphs per installation type
//! - Environment configuration
//! - Informer registration
//! - Installation status helpers

#[path = "../common/mod.rs"]
mod common;

mod config;
mod informer;
mod quota;
