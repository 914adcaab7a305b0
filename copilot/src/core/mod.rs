//! Deterministic, pure logic shared by the copilot core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod decision;
pub mod events;
pub mod truncate;
pub mod types;
