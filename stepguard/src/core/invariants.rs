//! Semantic invariants of the state documents not expressible via serde.

use std::collections::BTreeSet;

use crate::state::{OverrideKind, ProjectState, WorkflowState};

/// Check project invariants:
/// - `current_phase` is non-empty
/// - `completed_phases` has no duplicates
pub fn project_violations(project: &ProjectState) -> Vec<String> {
    let mut errors = Vec::new();
    if project.current_phase.trim().is_empty() {
        errors.push("current_phase must not be empty".to_string());
    }
    let mut seen = BTreeSet::new();
    for phase in &project.completed_phases {
        if !seen.insert(phase.as_str()) {
            errors.push(format!("completed_phases lists '{phase}' twice"));
        }
    }
    errors
}

/// Check workflow invariants:
/// - at most one open history entry, and it is the last one
/// - the open entry matches `current_step`
/// - a closed entry missing required gates is covered by a logged waiver
pub fn workflow_violations(workflow: &WorkflowState) -> Vec<String> {
    let mut errors = Vec::new();
    let last = workflow.step_history.len().saturating_sub(1);

    for (index, record) in workflow.step_history.iter().enumerate() {
        let label = format!("step_history[{index}]");
        match record.exited_at {
            None if index != last => {
                errors.push(format!("{label}: {} entered again before exit", record.step));
            }
            None if record.step != workflow.current_step => {
                errors.push(format!(
                    "{label}: open entry is {} but current_step is {}",
                    record.step, workflow.current_step
                ));
            }
            None => {}
            Some(exited_at) => {
                for gate in &record.gates_required {
                    if record.gates_passed.contains(gate) {
                        continue;
                    }
                    let waived = workflow.overrides.iter().any(|entry| {
                        entry.kind == OverrideKind::GateWaiver
                            && entry.gates.contains(gate)
                            && entry.at <= exited_at
                    });
                    if !waived {
                        errors.push(format!(
                            "{label}: left {} without passing the {gate} gate",
                            record.step
                        ));
                    }
                }
            }
        }
    }
    errors
}

/// Timestamps that run backwards. Hooks run as separate processes, so a
/// clock step between two of them produces these; they are reported, never
/// treated as corruption.
pub fn clock_anomalies(project: &ProjectState, workflow: &WorkflowState) -> Vec<String> {
    let mut anomalies = Vec::new();
    if project.updated_at < project.created_at {
        anomalies.push("project updated_at is earlier than created_at".to_string());
    }
    for (index, record) in workflow.step_history.iter().enumerate() {
        if record.exited_at.is_some_and(|exited_at| exited_at < record.entered_at) {
            anomalies.push(format!("step_history[{index}]: exited before it was entered"));
        }
    }
    anomalies
}

/// `automation_active` must agree between the two documents.
pub fn mirror_violations(project: &ProjectState, workflow: &WorkflowState) -> Vec<String> {
    if project.automation_active == workflow.automation_active {
        return Vec::new();
    }
    vec![format!(
        "automation_active differs: project has {}, workflow has {}",
        project.automation_active, workflow.automation_active
    )]
}
