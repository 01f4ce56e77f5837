//! Workflow enforcement for agentic coding sessions.
//!
//! Stepguard sits between a coding agent and its tools. Every tool call is
//! checked against the policy of the current step in a fixed six-step cycle
//! (plan, implement, validate, review, refine, integrate); completed calls
//! update quality gates; session end tries to advance the workflow. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, policies, gate
//!   bookkeeping, advancement, compliance). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, locked state documents,
//!   decision log).
//!
//! Orchestration modules ([`pre_tool_use`], [`post_tool_use`], [`stop`],
//! [`validate`]) coordinate core logic with I/O; [`hook`] wires them to the CLI.

pub mod core;
pub mod exit_codes;
pub mod hook;
pub mod io;
pub mod logging;
pub mod post_tool_use;
pub mod pre_tool_use;
pub mod state;
pub mod stop;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
