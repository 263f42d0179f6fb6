//! Deterministic, pure logic shared by the rollout core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod machine;
pub mod reduce;
pub mod types;
