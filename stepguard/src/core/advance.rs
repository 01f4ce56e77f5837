//! Step, objective and phase advancement at session end.
//!
//! Advancement is all-or-nothing: either every gate needed to leave the
//! current step is satisfied (passed or waived) and the position moves, or
//! nothing changes and the outstanding gates are reported.

use chrono::{DateTime, Utc};

use crate::core::bookkeeping::refresh_readiness;
use crate::core::types::{GateName, ProjectStatus, RequiredGates, Step};
use crate::state::{
    DEFAULT_OBJECTIVE, OverrideKind, OverrideRecord, ProjectState, TransitionError, WorkflowState,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Position unchanged; entries read "<gate> gate pending|failed".
    Held { outstanding: Vec<String> },
    NextStep { from: Step, to: Step },
    /// Objective finished; next objective of the same phase started.
    NextObjective { objective: String },
    /// Phase finished; first objective of the next phase started.
    NextPhase {
        completed: String,
        phase: String,
        objective: String,
    },
    /// Last objective of the last phase finished; project stopped.
    ProjectComplete { completed: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceReport {
    pub outcome: AdvanceOutcome,
    /// Gates waived by an emergency override on this Stop.
    pub waived: Vec<GateName>,
    pub reason: String,
}

impl AdvanceReport {
    pub fn advanced(&self) -> bool {
        !matches!(self.outcome, AdvanceOutcome::Held { .. })
    }

    pub fn outstanding(&self) -> &[String] {
        match &self.outcome {
            AdvanceOutcome::Held { outstanding } => outstanding,
            _ => &[],
        }
    }
}

/// Who asked for the advance and whether they invoked the override.
#[derive(Debug, Clone, Copy)]
pub struct AdvanceRequest<'a> {
    pub required: &'a RequiredGates,
    pub override_requested: bool,
    pub session_id: &'a str,
    pub now: DateTime<Utc>,
}

/// Try to move past the current step.
///
/// Leaving integrate completes the objective: gates and touched files reset,
/// then the next objective, the next phase, or project stop follows.
pub fn try_advance(
    project: &mut ProjectState,
    workflow: &mut WorkflowState,
    request: &AdvanceRequest<'_>,
) -> Result<AdvanceReport, TransitionError> {
    let step = workflow.current_step;
    let now = request.now;
    let outstanding = workflow.outstanding(request.required.to_leave(step));

    let mut waived = Vec::new();
    if !outstanding.is_empty() {
        if !request.override_requested {
            let outstanding: Vec<String> = outstanding
                .iter()
                .map(|(gate, status)| format!("{gate} gate {}", status.label()))
                .collect();
            return Ok(AdvanceReport {
                reason: format!("{step} cannot advance: {}", outstanding.join(", ")),
                outcome: AdvanceOutcome::Held { outstanding },
                waived,
            });
        }
        waived = outstanding.iter().map(|(gate, _)| *gate).collect();
        for gate in &waived {
            workflow.waive_gate(*gate, now);
        }
        workflow.overrides.push(OverrideRecord {
            at: now,
            step,
            kind: OverrideKind::GateWaiver,
            tool_name: None,
            gates: waived.clone(),
            session_id: request.session_id.to_string(),
        });
    }

    workflow.exit_step(request.required.for_step(step), now)?;

    let outcome = match step.next() {
        Some(next) => {
            workflow.enter_step(next, now)?;
            AdvanceOutcome::NextStep { from: step, to: next }
        }
        None => complete_objective(project, workflow, now)?,
    };
    refresh_readiness(workflow, request.required);
    project.updated_at = now;

    let mut reason = match &outcome {
        AdvanceOutcome::NextStep { from, to } => format!("advanced from {from} to {to}"),
        AdvanceOutcome::NextObjective { objective } => {
            format!("objective complete; starting {objective}")
        }
        AdvanceOutcome::NextPhase {
            completed, phase, ..
        } => format!("{completed} complete; starting {phase}"),
        AdvanceOutcome::ProjectComplete { completed } => {
            format!("{completed} complete; no phases remain, project stopped")
        }
        AdvanceOutcome::Held { .. } => String::new(),
    };
    if !waived.is_empty() {
        let names: Vec<&str> = waived.iter().map(|gate| gate.name()).collect();
        reason.push_str(&format!(" (emergency override waived: {})", names.join(", ")));
    }

    Ok(AdvanceReport {
        outcome,
        waived,
        reason,
    })
}

fn complete_objective(
    project: &mut ProjectState,
    workflow: &mut WorkflowState,
    now: DateTime<Utc>,
) -> Result<AdvanceOutcome, TransitionError> {
    workflow.reset_gates();
    workflow.touched_files.clear();

    let next_objective = project.phase(&project.current_phase).and_then(|phase| {
        let index = phase
            .objectives
            .iter()
            .position(|objective| *objective == workflow.current_objective)?;
        phase.objectives.get(index + 1).cloned()
    });
    if let Some(objective) = next_objective {
        workflow.current_objective = objective.clone();
        workflow.enter_step(Step::Plan, now)?;
        return Ok(AdvanceOutcome::NextObjective { objective });
    }

    let completed = project.current_phase.clone();
    project.complete_phase(&completed);
    match project.next_phase().cloned() {
        Some(phase) => {
            let objective = phase
                .objectives
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_OBJECTIVE.to_string());
            project.current_phase = phase.id.clone();
            workflow.current_objective = objective.clone();
            workflow.enter_step(Step::Plan, now)?;
            Ok(AdvanceOutcome::NextPhase {
                completed,
                phase: phase.id,
                objective,
            })
        }
        None => {
            project.transition(ProjectStatus::Stopped)?;
            Ok(AdvanceOutcome::ProjectComplete { completed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GateStatus;
    use crate::state::PhasePlan;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn active_project() -> ProjectState {
        let mut project = ProjectState::new(now());
        project.transition(ProjectStatus::Active).expect("activate");
        project.automation_active = true;
        project
    }

    fn at_step(step: Step) -> WorkflowState {
        let mut workflow = WorkflowState::new(now());
        workflow.step_history[0].step = step;
        workflow.current_step = step;
        workflow
    }

    fn advance(
        project: &mut ProjectState,
        workflow: &mut WorkflowState,
        override_requested: bool,
    ) -> AdvanceReport {
        let required = RequiredGates::default();
        try_advance(
            project,
            workflow,
            &AdvanceRequest {
                required: &required,
                override_requested,
                session_id: "s-1",
                now: now(),
            },
        )
        .expect("advance")
    }

    fn pass(workflow: &mut WorkflowState, gates: &[GateName]) {
        for gate in gates {
            workflow.set_gate(*gate, GateStatus::Passed, None, now());
        }
    }

    #[test]
    fn validate_advances_when_compile_and_test_pass() {
        let mut project = active_project();
        let mut workflow = at_step(Step::Validate);
        pass(&mut workflow, &[GateName::Compile, GateName::Test]);

        let report = advance(&mut project, &mut workflow, false);
        assert!(report.advanced());
        assert_eq!(workflow.current_step, Step::Review);
        assert_eq!(workflow.open_record().map(|r| r.step), Some(Step::Review));
        let closed = &workflow.step_history[0];
        assert_eq!(closed.gates_passed, vec![GateName::Compile, GateName::Test]);
    }

    #[test]
    fn review_holds_while_review_gate_pending() {
        let mut project = active_project();
        let mut workflow = at_step(Step::Review);
        let before = workflow.clone();

        let report = advance(&mut project, &mut workflow, false);
        assert!(!report.advanced());
        assert_eq!(report.outstanding(), ["review gate pending".to_string()]);
        assert!(report.reason.contains("review gate pending"));
        assert_eq!(workflow, before);
    }

    #[test]
    fn failed_gates_are_reported_as_failed() {
        let mut project = active_project();
        let mut workflow = at_step(Step::Validate);
        workflow.set_gate(GateName::Compile, GateStatus::Passed, None, now());
        workflow.set_gate(GateName::Test, GateStatus::Failed, None, now());
        let report = advance(&mut project, &mut workflow, false);
        assert_eq!(report.outstanding(), ["test gate failed".to_string()]);
    }

    #[test]
    fn override_waives_outstanding_gates_and_logs_it() {
        let mut project = active_project();
        let mut workflow = at_step(Step::Review);

        let report = advance(&mut project, &mut workflow, true);
        assert!(report.advanced());
        assert_eq!(report.waived, vec![GateName::Review]);
        assert_eq!(workflow.current_step, Step::Refine);
        assert_eq!(workflow.overrides.len(), 1);
        assert_eq!(workflow.overrides[0].kind, OverrideKind::GateWaiver);
        assert!(workflow.step_history[0].gates_passed.is_empty());
    }

    #[test]
    fn integrate_needs_every_gate_in_the_cycle() {
        let mut project = active_project();
        let mut workflow = at_step(Step::Integrate);
        pass(&mut workflow, &[GateName::Integration, GateName::Compile, GateName::Test]);

        let report = advance(&mut project, &mut workflow, false);
        assert_eq!(report.outstanding(), ["review gate pending".to_string()]);
        assert_eq!(workflow.current_step, Step::Integrate);
    }

    #[test]
    fn finishing_an_objective_moves_to_the_next_one() {
        let mut project = active_project();
        project.phase_plan = vec![PhasePlan {
            id: "phase-1".to_string(),
            objectives: vec!["objective-1".to_string(), "objective-2".to_string()],
        }];
        let mut workflow = at_step(Step::Integrate);
        workflow.touched_files.insert("src/lib.rs".to_string());
        pass(&mut workflow, &GateName::ALL);

        let report = advance(&mut project, &mut workflow, false);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::NextObjective {
                objective: "objective-2".to_string()
            }
        );
        assert_eq!(workflow.current_step, Step::Plan);
        assert_eq!(workflow.current_objective, "objective-2");
        assert!(workflow.quality_gates.is_empty());
        assert!(workflow.touched_files.is_empty());
    }

    #[test]
    fn finishing_a_phase_moves_to_the_next_phase() {
        let mut project = active_project();
        project.phase_plan = vec![
            PhasePlan {
                id: "phase-1".to_string(),
                objectives: vec!["objective-1".to_string()],
            },
            PhasePlan {
                id: "phase-2".to_string(),
                objectives: vec!["ship it".to_string()],
            },
        ];
        let mut workflow = at_step(Step::Integrate);
        pass(&mut workflow, &GateName::ALL);

        let report = advance(&mut project, &mut workflow, false);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::NextPhase {
                completed: "phase-1".to_string(),
                phase: "phase-2".to_string(),
                objective: "ship it".to_string()
            }
        );
        assert_eq!(project.completed_phases, vec!["phase-1"]);
        assert_eq!(project.current_phase, "phase-2");
        assert_eq!(project.status, ProjectStatus::Active);
    }

    #[test]
    fn finishing_the_last_phase_stops_the_project() {
        let mut project = active_project();
        let mut workflow = at_step(Step::Integrate);
        pass(&mut workflow, &GateName::ALL);

        let report = advance(&mut project, &mut workflow, false);
        assert_eq!(
            report.outcome,
            AdvanceOutcome::ProjectComplete {
                completed: "phase-1".to_string()
            }
        );
        assert_eq!(project.status, ProjectStatus::Stopped);
        assert!(workflow.open_record().is_none());
    }
}
