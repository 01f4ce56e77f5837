//! Workflow adherence score.
//!
//! `100 × passed / required` over closed step history (100 when nothing was
//! required), minus a fixed penalty per logged override, clamped to 0–100
//! and rounded to one decimal. The score is informational only.

use crate::state::WorkflowState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplianceReport {
    pub score: f64,
    pub gates_required: usize,
    pub gates_passed: usize,
    pub overrides: usize,
}

pub fn compliance_score(workflow: &WorkflowState, override_penalty: u32) -> ComplianceReport {
    let (gates_required, gates_passed) = workflow
        .step_history
        .iter()
        .filter(|record| !record.is_open())
        .fold((0, 0), |(required, passed), record| {
            (
                required + record.gates_required.len(),
                passed + record.gates_passed.len(),
            )
        });
    let overrides = workflow.overrides.len();

    let base = if gates_required == 0 {
        100.0
    } else {
        100.0 * gates_passed as f64 / gates_required as f64
    };
    let penalized = base - f64::from(override_penalty) * overrides as f64;
    let score = (penalized.clamp(0.0, 100.0) * 10.0).round() / 10.0;

    ComplianceReport {
        score,
        gates_required,
        gates_passed,
        overrides,
    }
}
