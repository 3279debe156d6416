//! Shared helpers for flowstore integration tests.

pub mod dir;
