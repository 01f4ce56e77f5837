//! Test-only helpers for building projects and hook events.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::types::{ProjectStatus, Step};
use crate::io::config::{StepguardConfig, write_config};
use crate::io::paths::StepguardPaths;
use crate::io::state_store::{StateSnapshot, load_states, save_states};
use crate::state::{StepRecord, WorkflowState};

/// Session id carried by every helper event.
pub const SESSION_ID: &str = "s-1";

/// Deterministic clock for tests: 2026-03-01 12:00 UTC.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A project root in a temp directory. Dropping it removes everything.
pub struct TestProject {
    temp: TempDir,
    paths: StepguardPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = StepguardPaths::new(temp.path());
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &StepguardPaths {
        &self.paths
    }

    /// Write an active project whose workflow sits at `step` with a single
    /// open history entry.
    pub fn activate_at(&self, step: Step) -> Result<()> {
        let now = fixed_now();
        let mut states = StateSnapshot::new(now);
        states.project.status = ProjectStatus::Active;
        states.project.automation_active = true;
        states.workflow = WorkflowState {
            current_step: step,
            step_history: vec![StepRecord {
                step,
                objective: states.workflow.current_objective.clone(),
                entered_at: now,
                exited_at: None,
                gates_required: Vec::new(),
                gates_passed: Vec::new(),
            }],
            ..states.workflow
        };
        self.write_states(&states)
    }

    pub fn load(&self) -> Result<StateSnapshot> {
        Ok(load_states(&self.paths, fixed_now())?.states)
    }

    /// Load, mutate and save both documents.
    pub fn update(&self, change: impl FnOnce(&mut StateSnapshot)) -> Result<()> {
        let mut states = self.load()?;
        change(&mut states);
        self.write_states(&states)
    }

    pub fn write_states(&self, states: &StateSnapshot) -> Result<()> {
        save_states(&self.paths, states)?;
        Ok(())
    }

    pub fn write_config(&self, config: &StepguardConfig) -> Result<()> {
        write_config(&self.paths.config_path, config)
    }
}

pub fn pre_event(tool: &str, input: Value) -> Value {
    json!({
        "event_type": "PreToolUse",
        "session_id": SESSION_ID,
        "tool_name": tool,
        "tool_input": input,
    })
}

pub fn post_event(tool: &str, input: Value, response: Value) -> Value {
    json!({
        "event_type": "PostToolUse",
        "session_id": SESSION_ID,
        "tool_name": tool,
        "tool_input": input,
        "tool_response": response,
    })
}

pub fn stop_event() -> Value {
    json!({
        "event_type": "Stop",
        "session_id": SESSION_ID,
    })
}
