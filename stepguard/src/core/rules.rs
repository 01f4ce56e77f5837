//! Step-aware tool policy.
//!
//! Evaluation order for a call at a given step:
//!
//! 1. Exact tool-name rules (config block, config allow, builtin).
//! 2. Category rules (step allow-list, then deny-list).
//! 3. The step's default action.
//!
//! A blocked call whose input carries the emergency-override marker is
//! allowed and flagged with `override_used`.

use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::core::classifier::{ToolCatalog, classify_tool};
use crate::core::types::{Action, Decision, Step, StepRules, ToolCategory};

/// Field that requests an override without embedding the marker string.
pub const OVERRIDE_FLAG_FIELD: &str = "emergency_override";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("no policy covers {tool} at {step}")]
    Ambiguous { step: Step, tool: String },
}

/// Static policy for one step.
#[derive(Debug)]
pub struct StepPolicy {
    pub step: Step,
    pub allow: &'static [ToolCategory],
    pub deny: &'static [ToolCategory],
    pub tool_rules: &'static [(&'static str, Action)],
    pub default_action: Action,
    /// Files must not change during this step.
    pub read_only: bool,
}

pub const STEP_POLICIES: &[StepPolicy] = &[
    StepPolicy {
        step: Step::Plan,
        allow: &[
            ToolCategory::ReadOnly,
            ToolCategory::Planning,
            ToolCategory::Network,
            ToolCategory::Delegate,
        ],
        deny: &[
            ToolCategory::Mutating,
            ToolCategory::Documentation,
            ToolCategory::Execute,
            ToolCategory::Build,
            ToolCategory::Test,
            ToolCategory::Vcs,
        ],
        tool_rules: &[("ExitPlanMode", Action::Allow)],
        default_action: Action::Block,
        read_only: true,
    },
    StepPolicy {
        step: Step::Implement,
        allow: &[
            ToolCategory::ReadOnly,
            ToolCategory::Planning,
            ToolCategory::Mutating,
            ToolCategory::Documentation,
            ToolCategory::Execute,
            ToolCategory::Build,
            ToolCategory::Test,
            ToolCategory::Delegate,
            ToolCategory::Network,
        ],
        deny: &[ToolCategory::Vcs],
        tool_rules: &[],
        default_action: Action::Allow,
        read_only: false,
    },
    StepPolicy {
        step: Step::Validate,
        allow: &[
            ToolCategory::ReadOnly,
            ToolCategory::Planning,
            ToolCategory::Build,
            ToolCategory::Test,
        ],
        deny: &[
            ToolCategory::Mutating,
            ToolCategory::Documentation,
            ToolCategory::Vcs,
        ],
        tool_rules: &[],
        default_action: Action::Block,
        read_only: true,
    },
    StepPolicy {
        step: Step::Review,
        allow: &[
            ToolCategory::ReadOnly,
            ToolCategory::Planning,
            ToolCategory::Test,
        ],
        deny: &[
            ToolCategory::Mutating,
            ToolCategory::Documentation,
            ToolCategory::Execute,
            ToolCategory::Vcs,
        ],
        tool_rules: &[("Task", Action::Allow)],
        default_action: Action::Block,
        read_only: true,
    },
    StepPolicy {
        step: Step::Refine,
        allow: &[
            ToolCategory::ReadOnly,
            ToolCategory::Planning,
            ToolCategory::Mutating,
            ToolCategory::Documentation,
            ToolCategory::Execute,
            ToolCategory::Build,
            ToolCategory::Test,
        ],
        deny: &[ToolCategory::Vcs],
        tool_rules: &[],
        default_action: Action::Block,
        read_only: false,
    },
    StepPolicy {
        step: Step::Integrate,
        allow: &[
            ToolCategory::ReadOnly,
            ToolCategory::Planning,
            ToolCategory::Documentation,
            ToolCategory::Build,
            ToolCategory::Test,
            ToolCategory::Vcs,
        ],
        deny: &[ToolCategory::Mutating],
        tool_rules: &[],
        default_action: Action::Block,
        read_only: false,
    },
];

pub fn policy_for(step: Step) -> Option<&'static StepPolicy> {
    STEP_POLICIES.iter().find(|policy| policy.step == step)
}

/// Everything evaluation needs besides the call itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleSet<'a> {
    pub catalog: &'a ToolCatalog,
    pub step_rules: &'a StepRules,
    pub override_marker: &'a str,
}

/// Decide whether `tool_name` may run at `step`. Pure and deterministic.
pub fn evaluate(step: Step, tool_name: &str, tool_input: &Value, rules: &RuleSet<'_>) -> Decision {
    let decision = match evaluate_without_override(step, tool_name, tool_input, rules) {
        Ok(decision) => decision,
        Err(err) => {
            error!(error = %err, "policy table incomplete");
            Decision::block(
                format!("{tool_name} cannot be evaluated at {step}; blocking to stay safe"),
                "policy-ambiguous",
            )
        }
    };

    if decision.is_allowed() || !override_requested(tool_input, rules.override_marker) {
        return decision;
    }

    Decision {
        action: Action::Allow,
        reason: format!(
            "emergency override: {tool_name} allowed at {step} despite: {}",
            decision.reason
        ),
        matched_rule: "emergency-override".to_string(),
        override_used: true,
    }
}

fn evaluate_without_override(
    step: Step,
    tool_name: &str,
    tool_input: &Value,
    rules: &RuleSet<'_>,
) -> Result<Decision, PolicyError> {
    let policy = policy_for(step).ok_or_else(|| PolicyError::Ambiguous {
        step,
        tool: tool_name.to_string(),
    })?;
    let exact = rules.step_rules.for_step(step);
    let tool_rule = format!("tool:{tool_name}");

    if exact.block.iter().any(|name| name == tool_name) {
        return Ok(Decision::block(
            format!("{tool_name} is explicitly blocked during {step}"),
            tool_rule,
        ));
    }
    if exact.allow.iter().any(|name| name == tool_name) {
        return Ok(Decision::allow(
            format!("{tool_name} is explicitly allowed during {step}"),
            tool_rule,
        ));
    }
    if let Some((_, action)) = policy.tool_rules.iter().find(|(name, _)| *name == tool_name) {
        let verb = match action {
            Action::Allow => "allowed",
            Action::Block => "blocked",
        };
        return Ok(Decision {
            action: *action,
            reason: format!("{tool_name} is explicitly {verb} during {step}"),
            matched_rule: tool_rule,
            override_used: false,
        });
    }

    let classification = classify_tool(rules.catalog, tool_name, tool_input);
    if let Some(category) = classification.category {
        let category_rule = format!("category:{}", category.label());
        let subject = match &classification.command {
            Some(command) => format!("{tool_name} command `{}`", abbreviate(command)),
            None => tool_name.to_string(),
        };
        if policy.allow.contains(&category) {
            return Ok(Decision::allow(
                format!("{} tools are allowed during {step}", category.label()),
                category_rule,
            ));
        }
        if policy.deny.contains(&category) {
            let reason = if policy.read_only {
                format!(
                    "step {} is read-only ({}): {subject} is a {} tool",
                    step.ordinal(),
                    step.name(),
                    category.label()
                )
            } else {
                format!(
                    "{step} does not permit {} tools: {subject}",
                    category.label()
                )
            };
            return Ok(Decision::block(reason, category_rule));
        }
    }

    let default_rule = format!("default:{}", step.name());
    let catalogued = if classification.category.is_some() {
        "is not covered by a rule"
    } else {
        "is not catalogued"
    };
    Ok(match policy.default_action {
        Action::Allow => Decision::allow(
            format!("{tool_name} {catalogued}; {step} allows it by default"),
            default_rule,
        ),
        Action::Block => Decision::block(
            format!("{tool_name} {catalogued}; {step} blocks it by default"),
            default_rule,
        ),
    })
}

/// True if the input carries the override marker in any string value, or
/// sets `emergency_override: true`.
pub fn override_requested(tool_input: &Value, marker: &str) -> bool {
    if tool_input.get(OVERRIDE_FLAG_FIELD).and_then(Value::as_bool) == Some(true) {
        return true;
    }
    !marker.is_empty() && contains_marker(tool_input, marker)
}

fn contains_marker(value: &Value, marker: &str) -> bool {
    match value {
        Value::String(text) => text.contains(marker),
        Value::Array(items) => items.iter().any(|item| contains_marker(item, marker)),
        Value::Object(map) => map.values().any(|item| contains_marker(item, marker)),
        _ => false,
    }
}

fn abbreviate(command: &str) -> String {
    const LIMIT: usize = 80;
    let single_line = command.lines().next().unwrap_or_default();
    if single_line.chars().count() <= LIMIT && single_line.len() == command.len() {
        return single_line.to_string();
    }
    let cut: String = single_line.chars().take(LIMIT).collect();
    format!("{cut}…")
}
