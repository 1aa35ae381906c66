//! Stable exit codes for puzzlegen CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input or config, or any other error.
pub const INVALID: i32 = 1;
/// `puzzlegen generate` could not produce a program.
pub const GENERATION_FAILED: i32 = 2;
/// The program (or query) ran but failed, or the interpreter is unavailable.
pub const EXECUTION_FAILED: i32 = 3;
/// Interrupted with Ctrl-C.
pub const CANCELLED: i32 = 130;
