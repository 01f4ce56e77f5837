//! Orchestration for the PreToolUse hook: may this tool run now?
//!
//! Fails closed: an invalid event, a lock timeout or any I/O failure blocks
//! the call. The workflow position is never changed here; only audit
//! counters and the override log are.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::ToolCatalog;
use crate::core::compliance::compliance_score;
use crate::core::event::{ValidatedEvent, validate_event};
use crate::core::rules::evaluate;
use crate::core::types::{Action, Decision, EventType, Step};
use crate::io::config::StepguardConfig;
use crate::io::decision_log::{DecisionRecord, append_decision};
use crate::io::paths::StepguardPaths;
use crate::io::state_store::with_state_exclusive;
use crate::state::{OverrideKind, OverrideRecord, metrics};

/// Response printed to stdout for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateResponse {
    pub action: Action,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub override_used: bool,
}

impl GateResponse {
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Block,
            reason: reason.into(),
            matched_rule: None,
            override_used: false,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.action == Action::Allow
    }
}

impl From<Decision> for GateResponse {
    fn from(decision: Decision) -> Self {
        Self {
            action: decision.action,
            reason: decision.reason,
            matched_rule: Some(decision.matched_rule),
            override_used: decision.override_used,
        }
    }
}

/// Decide whether the tool call in `raw` may run.
#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn handle_pre_tool_use(
    paths: &StepguardPaths,
    config: &StepguardConfig,
    raw: &Value,
    now: DateTime<Utc>,
) -> GateResponse {
    let catalog = config.catalog();
    let event = match validate_event(raw, &catalog) {
        Ok(event) if event.event_type == EventType::PreToolUse => event,
        Ok(event) => {
            warn!(event_type = event.event_type.label(), "unexpected event type");
            return GateResponse::block(format!(
                "expected a PreToolUse event but received {}",
                event.event_type.label()
            ));
        }
        Err(err) => {
            warn!(err = %err, "rejected invalid event");
            return GateResponse::block(format!("invalid hook event: {err}"));
        }
    };

    match gate(paths, config, &catalog, &event, now) {
        Ok((decision, step, enforced)) => {
            if enforced {
                let record =
                    DecisionRecord::new(now, &event.session_id, event.tool_name(), step, &decision);
                if let Err(err) = append_decision(&paths.decision_log_path, &record) {
                    warn!(err = %format!("{err:#}"), "failed to append decision log");
                }
            }
            if decision.override_used {
                info!(tool = event.tool_name(), %step, "emergency override used");
            }
            debug!(
                tool = event.tool_name(),
                action = ?decision.action,
                rule = %decision.matched_rule,
                "decision"
            );
            decision.into()
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "pre-tool-use failed closed");
            GateResponse::block(format!(
                "stepguard could not check this tool call, so it was blocked: {err:#}"
            ))
        }
    }
}

fn gate(
    paths: &StepguardPaths,
    config: &StepguardConfig,
    catalog: &ToolCatalog,
    event: &ValidatedEvent,
    now: DateTime<Utc>,
) -> Result<(Decision, Step, bool)> {
    let rules = config.rule_set(catalog);
    with_state_exclusive(paths, config.lock_timeout(), now, |states| {
        let step = config
            .step_override
            .unwrap_or(states.workflow.current_step);
        if !states.project.enforcement_active(config.automation_enabled) {
            let decision = Decision::allow(
                "workflow automation is inactive; tool calls are not restricted",
                "automation-inactive",
            );
            return Ok((decision, step, false));
        }

        let decision = evaluate(step, event.tool_name(), &event.tool_input, &rules);
        let project = &mut states.project;
        project.increment_metric(metrics::TOOL_ATTEMPTS);
        if !decision.is_allowed() {
            project.increment_metric(metrics::TOOL_BLOCKS);
        }
        if decision.override_used {
            project.increment_metric(metrics::OVERRIDES_USED);
            states.workflow.overrides.push(OverrideRecord {
                at: now,
                step,
                kind: OverrideKind::ToolCall,
                tool_name: Some(event.tool_name().to_string()),
                gates: Vec::new(),
                session_id: event.session_id.clone(),
            });
            let report = compliance_score(&states.workflow, config.override_penalty);
            states
                .project
                .set_metric(metrics::COMPLIANCE_SCORE, report.score);
        }
        states.project.updated_at = now;
        Ok((decision, step, true))
    })
}
