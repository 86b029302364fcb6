//! Shared test utilities for pagemill integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated pipeline runs with temp directories
//! - Builders that synthesize archives, documents and images

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{FakeRasterizer, TestHarness};
