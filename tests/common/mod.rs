// Fixtures are shared by every test crate; each uses a different subset
#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! RHMI installation and quota config fixtures, pulled into each test crate
//! with `#[path = "../common/mod.rs"] mod common;`

mod fixtures;

pub use fixtures::*;
