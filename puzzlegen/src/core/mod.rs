//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on strings and
//! in-memory values and return deterministic outputs suitable for tests.

pub mod diagnostics;
pub mod extract;
pub mod goal;
pub mod safety;
pub mod sanitize;
pub mod types;
