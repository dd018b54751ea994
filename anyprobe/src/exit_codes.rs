//! Stable exit codes for anyprobe CLI commands.

/// A probe matched, or a non-evaluating command succeeded.
pub const MATCHED: i32 = 0;
/// Invalid arguments or probe file, or another setup error.
pub const INVALID: i32 = 1;
/// No probe matched (including a run that hit its deadline).
pub const NO_MATCH: i32 = 2;
