//! Orchestration for the PostToolUse hook: record what a tool call did.
//!
//! Fails open: problems are logged and the event is skipped, since the tool
//! has already run and blocking would achieve nothing.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::bookkeeping::{PostEffects, PostOutcome, apply_post_event};
use crate::core::event::validate_event;
use crate::core::types::EventType;
use crate::io::config::StepguardConfig;
use crate::io::paths::StepguardPaths;
use crate::io::state_store::with_state_exclusive;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostResponse {
    pub applied: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ready_to_advance: bool,
}

impl PostResponse {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            applied: false,
            reason: reason.into(),
            ready_to_advance: false,
        }
    }
}

#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn handle_post_tool_use(
    paths: &StepguardPaths,
    config: &StepguardConfig,
    raw: &Value,
    now: DateTime<Utc>,
) -> PostResponse {
    let catalog = config.catalog();
    let event = match validate_event(raw, &catalog) {
        Ok(event) if event.event_type == EventType::PostToolUse => event,
        Ok(event) => {
            warn!(event_type = event.event_type.label(), "unexpected event type");
            return PostResponse::skipped(format!(
                "expected a PostToolUse event but received {}",
                event.event_type.label()
            ));
        }
        Err(err) => {
            warn!(err = %err, "ignoring invalid event");
            return PostResponse::skipped(format!("invalid hook event: {err}"));
        }
    };

    let result: Result<PostResponse> =
        with_state_exclusive(paths, config.lock_timeout(), now, |states| {
            if !states.project.enforcement_active(config.automation_enabled) {
                return Ok(PostResponse::skipped("workflow automation is inactive"));
            }
            let outcome = apply_post_event(
                &mut states.workflow,
                &event,
                &catalog,
                &config.required_gates,
                config.max_processed_events,
                now,
            );
            Ok(match outcome {
                PostOutcome::Duplicate => {
                    debug!(fingerprint = %event.fingerprint, "duplicate event");
                    PostResponse::skipped("event already recorded")
                }
                PostOutcome::Applied(effects) => {
                    states.project.updated_at = now;
                    PostResponse {
                        applied: true,
                        reason: summarize(&effects),
                        ready_to_advance: effects.ready_to_advance,
                    }
                }
            })
        });

    result.unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "post-tool-use skipped");
        PostResponse::skipped(format!("state not updated: {err:#}"))
    })
}

fn summarize(effects: &PostEffects) -> String {
    let mut parts: Vec<String> = effects
        .updates
        .iter()
        .map(|update| format!("{} gate {}", update.gate, update.status.label()))
        .collect();
    if !effects.invalidated.is_empty() {
        let names: Vec<&str> = effects.invalidated.iter().map(|gate| gate.name()).collect();
        parts.push(format!("{} reset to pending after file changes", names.join(", ")));
    }
    if !effects.touched.is_empty() {
        parts.push(format!("{} file(s) touched", effects.touched.len()));
    }
    if parts.is_empty() {
        return "no workflow effects".to_string();
    }
    parts.join("; ")
}
