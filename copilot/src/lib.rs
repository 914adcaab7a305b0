//! Data-analysis copilot built around the CoTAS loop (Think, Act, Search, Done).
//!
//! A run repeatedly asks an external oracle for the next step toward a user's
//! analytical goal, executes it, and durably records every transition in the
//! session's step log so the run can be inspected, resumed, or audited. The
//! crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (decision parsing, truncation,
//!   progress events). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (session stores, sandboxed
//!   execution, oracle and lookup backends). Behind traits so tests can
//!   script them.
//!
//! Orchestration modules ([`cotas`], [`stream`], [`chat`]) coordinate core
//! logic with I/O to implement the CLI commands.

pub mod chat;
pub mod core;
pub mod cotas;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod stream;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
