//! Test utilities for the notifier crate.
//!
//! This module provides shared helpers for both unit tests (in `src/`) and
//! integration tests (in `tests/`). It is only compiled when running tests or
//! with the `test-support` feature.

pub mod directory;
pub mod doubles;
pub mod events;
pub mod templates;
