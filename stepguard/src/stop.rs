//! Orchestration for the Stop hook: advance the workflow at session end.
//!
//! Fails open like PostToolUse: on any problem the state is left alone and
//! the response reports `advanced: false`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::advance::{AdvanceOutcome, AdvanceRequest, try_advance};
use crate::core::compliance::compliance_score;
use crate::core::event::validate_event;
use crate::core::rules::{OVERRIDE_FLAG_FIELD, override_requested};
use crate::core::types::EventType;
use crate::io::config::StepguardConfig;
use crate::io::paths::StepguardPaths;
use crate::io::state_store::with_state_exclusive;
use crate::state::metrics;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopResponse {
    pub advanced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_step: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outstanding: Vec<String>,
    pub reason: String,
}

impl StopResponse {
    fn unchanged(reason: impl Into<String>) -> Self {
        Self {
            advanced: false,
            new_step: None,
            new_phase: None,
            compliance_score: None,
            status: None,
            outstanding: Vec::new(),
            reason: reason.into(),
        }
    }
}

#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn handle_stop(
    paths: &StepguardPaths,
    config: &StepguardConfig,
    raw: &Value,
    now: DateTime<Utc>,
) -> StopResponse {
    let event = match validate_event(raw, &config.catalog()) {
        Ok(event) if event.event_type == EventType::Stop => event,
        Ok(event) => {
            warn!(event_type = event.event_type.label(), "unexpected event type");
            return StopResponse::unchanged(format!(
                "expected a Stop event but received {}",
                event.event_type.label()
            ));
        }
        Err(err) => {
            warn!(err = %err, "ignoring invalid event");
            return StopResponse::unchanged(format!("invalid hook event: {err}"));
        }
    };

    let marker = &config.emergency_override_marker;
    // Stop events may carry the override in tool_input or at the top level.
    let envelope_flags: Map<String, Value> = ["reason", OVERRIDE_FLAG_FIELD]
        .into_iter()
        .filter_map(|key| raw.get(key).map(|value| (key.to_string(), value.clone())))
        .collect();
    let wants_override = override_requested(&event.tool_input, marker)
        || override_requested(&Value::Object(envelope_flags), marker);

    let result: Result<StopResponse> =
        with_state_exclusive(paths, config.lock_timeout(), now, |states| {
            if !states.project.enforcement_active(config.automation_enabled) {
                return Ok(StopResponse::unchanged("workflow automation is inactive"));
            }
            let report = try_advance(
                &mut states.project,
                &mut states.workflow,
                &AdvanceRequest {
                    required: &config.required_gates,
                    override_requested: wants_override,
                    session_id: &event.session_id,
                    now,
                },
            )?;
            let score = compliance_score(&states.workflow, config.override_penalty).score;
            states.project.set_metric(metrics::COMPLIANCE_SCORE, score);

            if report.advanced() {
                info!(
                    step = states.workflow.current_step.ordinal(),
                    phase = %states.project.current_phase,
                    waived = report.waived.len(),
                    "workflow advanced"
                );
            }
            let new_phase = match &report.outcome {
                AdvanceOutcome::NextPhase { phase, .. } => Some(phase.clone()),
                _ => None,
            };
            Ok(StopResponse {
                advanced: report.advanced(),
                new_step: match report.outcome {
                    AdvanceOutcome::Held { .. } | AdvanceOutcome::ProjectComplete { .. } => None,
                    _ => Some(states.workflow.current_step.ordinal()),
                },
                new_phase,
                compliance_score: Some(score),
                status: Some(states.project.status.label().to_string()),
                outstanding: report.outstanding().to_vec(),
                reason: report.reason,
            })
        });

    result.unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "stop left state unchanged");
        StopResponse::unchanged(format!("state not updated: {err:#}"))
    })
}
