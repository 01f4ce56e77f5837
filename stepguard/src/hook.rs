//! Entry point shared by the three hook subcommands.
//!
//! Reads the raw stdin payload, loads config, routes to the right handler and
//! turns its response into stdout JSON plus an exit code. Failures before a
//! handler runs follow the same policy as the handlers themselves: PreToolUse
//! blocks, PostToolUse and Stop do nothing.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::exit_codes;
use crate::io::config::load_config;
use crate::io::paths::StepguardPaths;
use crate::post_tool_use::{PostResponse, handle_post_tool_use};
use crate::pre_tool_use::{GateResponse, handle_pre_tool_use};
use crate::stop::{StopResponse, handle_stop};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HookKind {
    PreToolUse,
    PostToolUse,
    Stop,
}

/// What the binary should emit for one hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReply {
    /// Single-line JSON for stdout.
    pub body: String,
    pub exit_code: i32,
    /// Human-readable message for stderr, shown by the host on a block.
    pub stderr: Option<String>,
}

pub fn dispatch(kind: HookKind, paths: &StepguardPaths, input: &str, now: DateTime<Utc>) -> HookReply {
    let raw: Value = match serde_json::from_str(input) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(err = %err, "hook input is not JSON");
            return fallback(kind, format!("hook input is not valid JSON: {err}"));
        }
    };
    let config = match load_config(&paths.config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "config unusable");
            return fallback(kind, format!("config unusable: {err:#}"));
        }
    };

    match kind {
        HookKind::PreToolUse => pre_reply(handle_pre_tool_use(paths, &config, &raw, now)),
        HookKind::PostToolUse => reply(&handle_post_tool_use(paths, &config, &raw, now)),
        HookKind::Stop => reply(&handle_stop(paths, &config, &raw, now)),
    }
}

fn fallback(kind: HookKind, reason: String) -> HookReply {
    match kind {
        HookKind::PreToolUse => pre_reply(GateResponse::block(reason)),
        HookKind::PostToolUse => reply(&PostResponse {
            applied: false,
            reason,
            ready_to_advance: false,
        }),
        HookKind::Stop => reply(&StopResponse {
            advanced: false,
            new_step: None,
            new_phase: None,
            compliance_score: None,
            status: None,
            outstanding: Vec::new(),
            reason,
        }),
    }
}

fn pre_reply(response: GateResponse) -> HookReply {
    let mut out = reply(&response);
    if !response.is_allowed() {
        out.exit_code = exit_codes::BLOCK;
        out.stderr = Some(response.reason);
    }
    out
}

fn reply<T: Serialize>(response: &T) -> HookReply {
    let body = serde_json::to_string(response).unwrap_or_else(|err| {
        warn!(err = %err, "failed to serialize hook response");
        String::from("{}")
    });
    HookReply {
        body,
        exit_code: exit_codes::OK,
        stderr: None,
    }
}
