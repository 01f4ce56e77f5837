//! Pure PostToolUse effects on the workflow document.
//!
//! An already-executed tool call can:
//!
//! - add file targets to `touched_files`,
//! - make `compile`/`test` evidence stale (successful mutations),
//! - pass or fail gates it reports on,
//! - flip `ready_to_advance` / `objective_complete`.
//!
//! It never moves `current_step`; that is the Stop engine's job.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use crate::core::classifier::{ToolCatalog, classify_tool};
use crate::core::event::ValidatedEvent;
use crate::core::shell::gate_signals;
use crate::core::types::{GateName, GateStatus, RequiredGates, Step, ToolCategory};
use crate::state::WorkflowState;

static FAILURE_OUTPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?m)test result: FAILED|^FAILED\b|\b[1-9]\d* (failed|failing|errors?)\b",
        r"|^error(\[E\d+\])?:|BUILD FAILED|npm ERR!|Traceback \(most recent call last\)",
    ))
    .unwrap()
});

static COVERAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?im)(?:coverage|covered)[^0-9\n]{0,24}(\d{1,3}(?:\.\d+)?)\s*%",
        r"|^TOTAL\s.*?(\d{1,3}(?:\.\d+)?)%\s*$",
    ))
    .unwrap()
});

/// Keys hosts use for a numeric exit status.
const EXIT_CODE_KEYS: &[&str] = &["exit_code", "exitCode", "returncode"];
/// Keys that carry tool output text.
const OUTPUT_KEYS: &[&str] = &["stdout", "stderr", "output", "content"];

/// What the tool response says about how the call went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// `None` when the host sent no response.
    pub success: Option<bool>,
    pub output: String,
}

impl ToolOutcome {
    fn failed(&self) -> bool {
        self.success == Some(false)
    }
}

pub fn tool_outcome(response: Option<&Value>) -> ToolOutcome {
    let Some(response) = response else {
        return ToolOutcome {
            success: None,
            output: String::new(),
        };
    };
    let output = match response {
        Value::String(text) => text.clone(),
        _ => OUTPUT_KEYS
            .iter()
            .filter_map(|key| response.get(*key).and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
    };

    let explicit = response
        .get("success")
        .and_then(Value::as_bool)
        .or_else(|| {
            EXIT_CODE_KEYS
                .iter()
                .find_map(|key| response.get(*key).and_then(Value::as_i64))
                .map(|code| code == 0)
        });
    let flagged_failure = response.get("is_error").and_then(Value::as_bool) == Some(true)
        || response.get("interrupted").and_then(Value::as_bool) == Some(true)
        || response
            .get("error")
            .and_then(Value::as_str)
            .is_some_and(|error| !error.trim().is_empty());

    let success = if flagged_failure {
        false
    } else {
        explicit.unwrap_or_else(|| !FAILURE_OUTPUT_RE.is_match(&output))
    };
    ToolOutcome {
        success: Some(success),
        output,
    }
}

/// Highest coverage percentage mentioned in `output`.
pub fn coverage_percent(output: &str) -> Option<f64> {
    COVERAGE_RE
        .captures_iter(output)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .filter_map(|value| value.as_str().parse::<f64>().ok())
        .filter(|value| (0.0..=100.0).contains(value))
        .fold(None, |best: Option<f64>, value| {
            Some(best.map_or(value, |best| best.max(value)))
        })
}

/// One gate transition caused by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateUpdate {
    pub gate: GateName,
    pub status: GateStatus,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostEffects {
    pub touched: Vec<String>,
    /// Gates moved from passed back to pending.
    pub invalidated: Vec<GateName>,
    pub updates: Vec<GateUpdate>,
    pub ready_to_advance: bool,
    pub objective_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    /// Same call already applied; nothing changed.
    Duplicate,
    Applied(PostEffects),
}

/// Gates that must be stale after source files change.
const INVALIDATED_BY_MUTATION: [GateName; 2] = [GateName::Compile, GateName::Test];

/// Apply one PostToolUse event to `workflow`.
pub fn apply_post_event(
    workflow: &mut WorkflowState,
    event: &ValidatedEvent,
    catalog: &ToolCatalog,
    required: &RequiredGates,
    max_processed_events: usize,
    now: DateTime<Utc>,
) -> PostOutcome {
    if let Some(key) = event.replay_key() {
        if workflow.has_processed(key) {
            return PostOutcome::Duplicate;
        }
        workflow.remember_event(key, max_processed_events);
    }

    let tool_name = event.tool_name();
    let classification = classify_tool(catalog, tool_name, &event.tool_input);
    let outcome = tool_outcome(event.tool_response.as_ref());
    let mut effects = PostEffects::default();

    if !outcome.failed() {
        for path in &classification.paths {
            if workflow.touched_files.insert(path.clone()) {
                effects.touched.push(path.clone());
            }
        }
    }

    if classification.category == Some(ToolCategory::Mutating) && !outcome.failed() {
        for gate in INVALIDATED_BY_MUTATION {
            if workflow.gate(gate).status == GateStatus::Passed {
                workflow.set_gate(gate, GateStatus::Pending, None, now);
                workflow
                    .quality_gates
                    .entry(gate)
                    .and_modify(|entry| entry.evidence = None);
                effects.invalidated.push(gate);
            }
        }
    }

    if let Some(success) = outcome.success {
        let status = if success {
            GateStatus::Passed
        } else {
            GateStatus::Failed
        };
        let command = classification.command.as_deref();
        for gate in reported_gates(catalog, event, classification.category, command) {
            let evidence = evidence_for(gate, tool_name, command, &outcome);
            workflow.set_gate(gate, status, Some(evidence.clone()), now);
            effects.updates.push(GateUpdate {
                gate,
                status,
                evidence: Some(evidence),
            });
        }
    }

    refresh_readiness(workflow, required);
    effects.ready_to_advance = workflow.ready_to_advance;
    effects.objective_complete = workflow.objective_complete;
    PostOutcome::Applied(effects)
}

/// Recompute readiness flags from the current gates.
pub fn refresh_readiness(workflow: &mut WorkflowState, required: &RequiredGates) {
    let step = workflow.current_step;
    workflow.ready_to_advance = workflow.outstanding(required.to_leave(step)).is_empty();
    workflow.objective_complete = step == Step::Integrate && workflow.ready_to_advance;
}

fn reported_gates(
    catalog: &ToolCatalog,
    event: &ValidatedEvent,
    category: Option<ToolCategory>,
    command: Option<&str>,
) -> BTreeSet<GateName> {
    let mut gates = BTreeSet::new();
    if let Some(gate) = event
        .tool_input
        .get("gate")
        .cloned()
        .and_then(|value| serde_json::from_value::<GateName>(value).ok())
    {
        gates.insert(gate);
    }
    if let Some(gate) = catalog.get(event.tool_name()).and_then(|spec| spec.gate) {
        gates.insert(gate);
    }
    if let Some(command) = command {
        gates.extend(gate_signals(command));
    }
    if category == Some(ToolCategory::Delegate) && requests_review(&event.tool_input) {
        gates.insert(GateName::Review);
    }
    if category == Some(ToolCategory::Documentation) {
        gates.insert(GateName::Documentation);
    }
    gates
}

fn requests_review(tool_input: &Value) -> bool {
    tool_input
        .get("subagent_type")
        .and_then(Value::as_str)
        .is_some_and(|kind| kind.to_ascii_lowercase().contains("review"))
}

fn evidence_for(gate: GateName, tool_name: &str, command: Option<&str>, outcome: &ToolOutcome) -> String {
    let source = match command {
        Some(command) => command.to_string(),
        None => format!("tool:{tool_name}"),
    };
    match (gate, coverage_percent(&outcome.output)) {
        (GateName::Test, Some(percent)) => format!("{source} (coverage {percent:.1}%)"),
        _ => source,
    }
}
