//! Stable exit codes for stepper CLI commands.

/// The run completed (a cancelled run counts as completed).
pub const OK: i32 = 0;
/// The run failed; the error was printed to stderr.
pub const FAILED: i32 = 1;
/// Invalid usage, configuration or unit file; nothing ran.
pub const INVALID: i32 = 2;
