//! Persisted documents under `.stepguard/`.
//!
//! - `project.json` ([`ProjectState`]): lifecycle status, phases, metrics and
//!   the authoritative `automation_active` flag.
//! - `workflow.json` ([`WorkflowState`]): position in the six-step cycle,
//!   quality gates, step history and engine bookkeeping.
//!
//! Both are plain data with small, checked mutators; all disk access goes
//! through `io::state_store`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{GateName, GateStatus, ProjectStatus, Step};

pub const DEFAULT_PHASE: &str = "phase-1";
pub const DEFAULT_OBJECTIVE: &str = "objective-1";

/// Metric keys maintained by the hooks.
pub mod metrics {
    pub const TOOL_ATTEMPTS: &str = "tool_attempts";
    pub const TOOL_BLOCKS: &str = "tool_blocks";
    pub const OVERRIDES_USED: &str = "overrides_used";
    pub const COMPLIANCE_SCORE: &str = "compliance_score";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("project status cannot move from {} to {}", .from.label(), .to.label())]
    Status {
        from: ProjectStatus,
        to: ProjectStatus,
    },
    #[error("{open} is still open; exit it before entering {requested}")]
    StepAlreadyOpen { open: Step, requested: Step },
    #[error("no open step to exit")]
    NoOpenStep,
}

/// One phase of the plan written by the command layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePlan {
    pub id: String,
    #[serde(default)]
    pub objectives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub status: ProjectStatus,
    pub current_phase: String,
    /// Append-only, duplicate-free.
    #[serde(default)]
    pub completed_phases: Vec<String>,
    #[serde(default)]
    pub phase_plan: Vec<PhasePlan>,
    /// Authoritative copy; mirrored into the workflow document on save.
    #[serde(default)]
    pub automation_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl ProjectState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: ProjectStatus::Setup,
            current_phase: DEFAULT_PHASE.to_string(),
            completed_phases: Vec::new(),
            phase_plan: Vec::new(),
            automation_active: false,
            created_at: now,
            updated_at: now,
            metrics: BTreeMap::new(),
        }
    }

    pub fn transition(&mut self, next: ProjectStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Status {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Append `phase` to `completed_phases`; returns false if already present.
    pub fn complete_phase(&mut self, phase: &str) -> bool {
        if self.completed_phases.iter().any(|done| done == phase) {
            return false;
        }
        self.completed_phases.push(phase.to_string());
        true
    }

    pub fn phase(&self, id: &str) -> Option<&PhasePlan> {
        self.phase_plan.iter().find(|phase| phase.id == id)
    }

    /// Objective a fresh workflow should start on: the first planned
    /// objective of the current phase.
    pub fn opening_objective(&self) -> &str {
        self.phase(&self.current_phase)
            .and_then(|phase| phase.objectives.first())
            .map_or(DEFAULT_OBJECTIVE, String::as_str)
    }

    /// Phase following `current_phase` in the plan, if any.
    pub fn next_phase(&self) -> Option<&PhasePlan> {
        let index = self
            .phase_plan
            .iter()
            .position(|phase| phase.id == self.current_phase)?;
        self.phase_plan.get(index + 1)
    }

    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }

    pub fn increment_metric(&mut self, name: &str) {
        *self.metrics.entry(name.to_string()).or_insert(0.0) += 1.0;
    }

    pub fn set_metric(&mut self, name: &str, value: f64) {
        self.metrics.insert(name.to_string(), value);
    }

    /// Policies apply only while automation is on and the project is active.
    pub fn enforcement_active(&self, automation_enabled: bool) -> bool {
        automation_enabled && self.automation_active && self.status == ProjectStatus::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGate {
    #[serde(default)]
    pub status: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Waived by an emergency override; counts as satisfied, not as passed.
    #[serde(default)]
    pub waived: bool,
}

impl QualityGate {
    pub fn satisfied(&self) -> bool {
        self.status == GateStatus::Passed || self.waived
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub objective: String,
    pub entered_at: DateTime<Utc>,
    #[serde(default)]
    pub exited_at: Option<DateTime<Utc>>,
    /// Filled on exit.
    #[serde(default)]
    pub gates_required: Vec<GateName>,
    #[serde(default)]
    pub gates_passed: Vec<GateName>,
}

impl StepRecord {
    pub fn is_open(&self) -> bool {
        self.exited_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    /// A blocked tool call was allowed.
    ToolCall,
    /// Outstanding gates were waived at Stop.
    GateWaiver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub at: DateTime<Utc>,
    pub step: Step,
    pub kind: OverrideKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<GateName>,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub current_step: Step,
    pub current_objective: String,
    /// Missing entries read as pending.
    #[serde(default)]
    pub quality_gates: BTreeMap<GateName, QualityGate>,
    #[serde(default)]
    pub step_history: Vec<StepRecord>,
    /// Mirror of `ProjectState::automation_active`.
    #[serde(default)]
    pub automation_active: bool,
    #[serde(default)]
    pub touched_files: BTreeSet<String>,
    #[serde(default)]
    pub ready_to_advance: bool,
    #[serde(default)]
    pub objective_complete: bool,
    #[serde(default)]
    pub overrides: Vec<OverrideRecord>,
    /// Fingerprints of applied PostToolUse events, oldest first.
    #[serde(default)]
    pub processed_events: Vec<String>,
}

impl WorkflowState {
    /// Fresh workflow at plan with an open history entry.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::starting(DEFAULT_OBJECTIVE, now)
    }

    /// Fresh workflow at plan working on `objective`.
    pub fn starting(objective: &str, now: DateTime<Utc>) -> Self {
        Self {
            current_step: Step::Plan,
            current_objective: objective.to_string(),
            quality_gates: BTreeMap::new(),
            step_history: vec![StepRecord {
                step: Step::Plan,
                objective: objective.to_string(),
                entered_at: now,
                exited_at: None,
                gates_required: Vec::new(),
                gates_passed: Vec::new(),
            }],
            automation_active: false,
            touched_files: BTreeSet::new(),
            ready_to_advance: false,
            objective_complete: false,
            overrides: Vec::new(),
            processed_events: Vec::new(),
        }
    }

    pub fn gate(&self, gate: GateName) -> QualityGate {
        self.quality_gates.get(&gate).cloned().unwrap_or_default()
    }

    pub fn gate_satisfied(&self, gate: GateName) -> bool {
        self.quality_gates
            .get(&gate)
            .is_some_and(QualityGate::satisfied)
    }

    pub fn set_gate(
        &mut self,
        gate: GateName,
        status: GateStatus,
        evidence: Option<String>,
        now: DateTime<Utc>,
    ) {
        let entry = self.quality_gates.entry(gate).or_default();
        entry.status = status;
        if evidence.is_some() {
            entry.evidence = evidence;
        }
        entry.updated_at = Some(now);
        if status != GateStatus::Passed {
            entry.waived = false;
        }
    }

    pub fn waive_gate(&mut self, gate: GateName, now: DateTime<Utc>) {
        let entry = self.quality_gates.entry(gate).or_default();
        entry.waived = true;
        entry.updated_at = Some(now);
    }

    /// Gates in `gates` that are neither passed nor waived, with their status.
    pub fn outstanding(
        &self,
        gates: impl IntoIterator<Item = GateName>,
    ) -> Vec<(GateName, GateStatus)> {
        gates
            .into_iter()
            .filter(|gate| !self.gate_satisfied(*gate))
            .map(|gate| (gate, self.gate(gate).status))
            .collect()
    }

    pub fn reset_gates(&mut self) {
        self.quality_gates.clear();
    }

    pub fn open_record(&self) -> Option<&StepRecord> {
        self.step_history.last().filter(|record| record.is_open())
    }

    pub fn enter_step(
        &mut self,
        step: Step,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if let Some(open) = self.open_record() {
            return Err(TransitionError::StepAlreadyOpen {
                open: open.step,
                requested: step,
            });
        }
        self.current_step = step;
        self.step_history.push(StepRecord {
            step,
            objective: self.current_objective.clone(),
            entered_at: now,
            exited_at: None,
            gates_required: Vec::new(),
            gates_passed: Vec::new(),
        });
        Ok(())
    }

    /// Close the open entry, snapshotting which of `required` had passed.
    pub fn exit_step(
        &mut self,
        required: &[GateName],
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let gates_passed: Vec<GateName> = required
            .iter()
            .copied()
            .filter(|gate| self.gate(*gate).status == GateStatus::Passed)
            .collect();
        let record = self
            .step_history
            .last_mut()
            .filter(|record| record.is_open())
            .ok_or(TransitionError::NoOpenStep)?;
        record.exited_at = Some(now);
        record.gates_required = required.to_vec();
        record.gates_passed = gates_passed;
        Ok(())
    }

    pub fn has_processed(&self, fingerprint: &str) -> bool {
        self.processed_events.iter().any(|seen| seen == fingerprint)
    }

    /// Remember `fingerprint`, dropping the oldest entries beyond `limit`.
    pub fn remember_event(&mut self, fingerprint: &str, limit: usize) {
        self.processed_events.push(fingerprint.to_string());
        let excess = self.processed_events.len().saturating_sub(limit);
        if excess > 0 {
            self.processed_events.drain(..excess);
        }
    }
}
