//! I/O helpers for the generation pipeline.

pub mod artifact;
pub mod config;
pub mod interpreter;
pub mod process;
pub mod prompt;
