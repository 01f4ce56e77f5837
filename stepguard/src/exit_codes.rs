//! Stable exit codes for stepguard commands.

/// Command succeeded, or the PreToolUse gate allowed the call.
pub const OK: i32 = 0;
/// `stepguard validate` found problems, or the command line was unusable.
pub const INVALID: i32 = 1;
/// The PreToolUse gate blocked the call (host convention for "deny").
pub const BLOCK: i32 = 2;
