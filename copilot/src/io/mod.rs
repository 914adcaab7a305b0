//! I/O side of the copilot: session stores, process execution and external services.

pub mod artifacts;
pub mod clock;
pub mod config;
pub mod context;
pub mod json;
pub mod lookup;
pub mod metadata;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod session;
pub mod step_log;
