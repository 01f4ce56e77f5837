//! Shared deterministic types for the enforcement core.
//!
//! These types define stable contracts between core components and the
//! persisted documents. They must not depend on external state or I/O.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Position in the fixed development cycle, persisted as its ordinal (1–6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Step {
    Plan = 1,
    Implement = 2,
    Validate = 3,
    Review = 4,
    Refine = 5,
    Integrate = 6,
}

impl Step {
    pub const ALL: [Step; 6] = [
        Step::Plan,
        Step::Implement,
        Step::Validate,
        Step::Review,
        Step::Refine,
        Step::Integrate,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::Plan => "plan",
            Step::Implement => "implement",
            Step::Validate => "validate",
            Step::Review => "review",
            Step::Refine => "refine",
            Step::Integrate => "integrate",
        }
    }

    /// Next step within an objective; `None` after integrate.
    pub fn next(self) -> Option<Step> {
        Step::try_from(self.ordinal() + 1).ok()
    }
}

impl TryFrom<u8> for Step {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Step::Plan),
            2 => Ok(Step::Implement),
            3 => Ok(Step::Validate),
            4 => Ok(Step::Review),
            5 => Ok(Step::Refine),
            6 => Ok(Step::Integrate),
            other => Err(format!("step must be between 1 and 6 (got {other})")),
        }
    }
}

impl From<Step> for u8 {
    fn from(step: Step) -> Self {
        step.ordinal()
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.ordinal(), self.name())
    }
}

/// Named quality checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateName {
    Compile,
    Test,
    Review,
    Integration,
    Documentation,
    Performance,
}

impl GateName {
    pub const ALL: [GateName; 6] = [
        GateName::Compile,
        GateName::Test,
        GateName::Review,
        GateName::Integration,
        GateName::Documentation,
        GateName::Performance,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GateName::Compile => "compile",
            GateName::Test => "test",
            GateName::Review => "review",
            GateName::Integration => "integration",
            GateName::Documentation => "documentation",
            GateName::Performance => "performance",
        }
    }
}

impl fmt::Display for GateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

impl GateStatus {
    pub fn label(self) -> &'static str {
        match self {
            GateStatus::Pending => "pending",
            GateStatus::Passed => "passed",
            GateStatus::Failed => "failed",
        }
    }
}

/// Lifecycle of a project worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Setup,
    Active,
    Paused,
    Stopped,
}

impl ProjectStatus {
    /// Monotone lifecycle: setup → active → {paused ↔ active} → stopped.
    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        use ProjectStatus::{Active, Paused, Setup, Stopped};
        matches!(
            (self, next),
            (Setup, Active) | (Active, Paused) | (Paused, Active) | (Active, Stopped) | (Paused, Stopped)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ProjectStatus::Setup => "setup",
            ProjectStatus::Active => "active",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    PreToolUse,
    PostToolUse,
    Stop,
}

impl EventType {
    pub fn parse(value: &str) -> Option<EventType> {
        match value {
            "PreToolUse" => Some(EventType::PreToolUse),
            "PostToolUse" => Some(EventType::PostToolUse),
            "Stop" => Some(EventType::Stop),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EventType::PreToolUse => "PreToolUse",
            EventType::PostToolUse => "PostToolUse",
            EventType::Stop => "Stop",
        }
    }
}

/// Coarse intent of a tool call, used by step policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    ReadOnly,
    Planning,
    Mutating,
    Documentation,
    Execute,
    Build,
    Test,
    Vcs,
    Delegate,
    Network,
}

impl ToolCategory {
    pub fn label(self) -> &'static str {
        match self {
            ToolCategory::ReadOnly => "read-only",
            ToolCategory::Planning => "planning",
            ToolCategory::Mutating => "file-mutating",
            ToolCategory::Documentation => "documentation",
            ToolCategory::Execute => "command-execution",
            ToolCategory::Build => "build",
            ToolCategory::Test => "test",
            ToolCategory::Vcs => "version-control",
            ToolCategory::Delegate => "delegation",
            ToolCategory::Network => "network",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Allow,
    Block,
}

/// Result of policy evaluation for a single tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    /// Human-readable explanation surfaced to the host.
    pub reason: String,
    /// Identifier of the rule that produced the decision.
    pub matched_rule: String,
    pub override_used: bool,
}

impl Decision {
    pub fn allow(reason: impl Into<String>, matched_rule: impl Into<String>) -> Self {
        Self {
            action: Action::Allow,
            reason: reason.into(),
            matched_rule: matched_rule.into(),
            override_used: false,
        }
    }

    pub fn block(reason: impl Into<String>, matched_rule: impl Into<String>) -> Self {
        Self {
            action: Action::Block,
            reason: reason.into(),
            matched_rule: matched_rule.into(),
            override_used: false,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.action == Action::Allow
    }
}

/// Quality gates that must pass before leaving each step.
///
/// Missing keys in config fall back to these defaults field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequiredGates {
    pub plan: Vec<GateName>,
    pub implement: Vec<GateName>,
    pub validate: Vec<GateName>,
    pub review: Vec<GateName>,
    pub refine: Vec<GateName>,
    pub integrate: Vec<GateName>,
}

impl Default for RequiredGates {
    fn default() -> Self {
        Self {
            plan: Vec::new(),
            implement: vec![GateName::Compile],
            validate: vec![GateName::Compile, GateName::Test],
            review: vec![GateName::Review],
            refine: vec![GateName::Compile, GateName::Test],
            integrate: vec![GateName::Integration],
        }
    }
}

impl RequiredGates {
    pub fn for_step(&self, step: Step) -> &[GateName] {
        match step {
            Step::Plan => &self.plan,
            Step::Implement => &self.implement,
            Step::Validate => &self.validate,
            Step::Review => &self.review,
            Step::Refine => &self.refine,
            Step::Integrate => &self.integrate,
        }
    }

    /// Gates that must be satisfied to leave `step`.
    ///
    /// Leaving integrate completes the objective, so it needs every gate
    /// required anywhere in the cycle.
    pub fn to_leave(&self, step: Step) -> BTreeSet<GateName> {
        if step == Step::Integrate {
            Step::ALL
                .iter()
                .flat_map(|s| self.for_step(*s).iter().copied())
                .collect()
        } else {
            self.for_step(step).iter().copied().collect()
        }
    }
}

/// Exact tool-name rules for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExactRules {
    pub allow: Vec<String>,
    pub block: Vec<String>,
}

/// Per-step exact tool rules supplied by configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepRules {
    pub plan: ExactRules,
    pub implement: ExactRules,
    pub validate: ExactRules,
    pub review: ExactRules,
    pub refine: ExactRules,
    pub integrate: ExactRules,
}

impl StepRules {
    pub fn for_step(&self, step: Step) -> &ExactRules {
        match step {
            Step::Plan => &self.plan,
            Step::Implement => &self.implement,
            Step::Validate => &self.validate,
            Step::Review => &self.review,
            Step::Refine => &self.refine,
            Step::Integrate => &self.integrate,
        }
    }
}
