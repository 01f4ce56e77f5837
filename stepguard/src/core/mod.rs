//! Deterministic, pure logic shared by the hooks.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod advance;
pub mod bookkeeping;
pub mod classifier;
pub mod compliance;
pub mod event;
pub mod invariants;
pub mod rules;
pub mod shell;
pub mod types;
