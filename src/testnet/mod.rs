//! Shared helpers for tests.

pub mod test_utils;

pub use test_utils::*;
