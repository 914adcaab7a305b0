//! Stable exit codes for copilot CLI commands.

/// Command succeeded; for `copilot run`, the goal was satisfied.
pub const OK: i32 = 0;
/// Invalid invocation, unknown session, bad config, or a store failure.
pub const INVALID: i32 = 1;
/// `copilot run` stopped in the ERROR state.
pub const ERROR: i32 = 2;
/// `copilot run` reached the iteration bound without DONE.
pub const EXHAUSTED: i32 = 3;
