//! Logic-puzzle generator: prompt in, runnable Prolog program out.
//!
//! A request flows through a text-generation backend twice (idea, then
//! code), is screened for dangerous predicates, persisted, and optionally run
//! under SWI-Prolog with a bounded repair loop that feeds interpreter errors
//! back to the backend. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, safety screening,
//!   diagnostics, goal handling). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, subprocesses, templates,
//!   artifacts). Isolated behind traits where tests need doubles.
//! - **[`backends`]**: Text-generation servers behind [`backends::ChatBackend`].
//!
//! Orchestration modules ([`generate`], [`repair`]) coordinate core logic
//! with I/O to serve requests.

pub mod backends;
pub mod core;
pub mod exit_codes;
pub mod generate;
pub mod io;
pub mod logging;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
