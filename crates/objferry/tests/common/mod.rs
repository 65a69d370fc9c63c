//! Shared test utilities for objferry integration tests.
//!
//! - `TestHarness`: temp source/target trees plus a file-backed catalog
//! - builders for endpoint files and pre-populated in-memory buckets

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{test_options, TestHarness};
