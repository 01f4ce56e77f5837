//! Health check for `.stepguard/`: config and both state documents.
//!
//! Unlike the hooks, nothing here recovers or rewrites anything. A corrupt
//! document is reported as an error so a human can look at it.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;

use crate::core::invariants::{
    clock_anomalies, mirror_violations, project_violations, workflow_violations,
};
use crate::core::types::{ProjectStatus, Step};
use crate::io::config::load_config;
use crate::io::paths::StepguardPaths;
use crate::io::state_store::parse_document;
use crate::state::{ProjectState, WorkflowState};

/// Validation result when every present document is healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateOutcome {
    /// No state documents yet; hooks will start from defaults.
    NotStarted,
    Ok {
        status: ProjectStatus,
        step: Step,
        objective: String,
        phase: String,
        /// Backwards timestamps; worth a look but not an error.
        warnings: Vec<String>,
    },
}

/// Validate config and state documents under `root`.
pub fn validate_project(root: &Path) -> Result<ValidateOutcome> {
    let paths = StepguardPaths::new(root);
    load_config(&paths.config_path).with_context(|| "load config.toml")?;

    let project: Option<ProjectState> =
        read_document(&paths.project_path, project_violations).with_context(|| "load project.json")?;
    let workflow: Option<WorkflowState> = read_document(&paths.workflow_path, workflow_violations)
        .with_context(|| "load workflow.json")?;

    let (project, workflow) = match (project, workflow) {
        (None, None) => return Ok(ValidateOutcome::NotStarted),
        (Some(project), Some(workflow)) => (project, workflow),
        (Some(_), None) => {
            return Err(anyhow!("missing {}", paths.workflow_path.display()));
        }
        (None, Some(_)) => {
            return Err(anyhow!("missing {}", paths.project_path.display()));
        }
    };

    let mismatches = mirror_violations(&project, &workflow);
    if !mismatches.is_empty() {
        return Err(anyhow!("state documents disagree: {}", mismatches.join("; ")));
    }

    let warnings = clock_anomalies(&project, &workflow);
    Ok(ValidateOutcome::Ok {
        warnings,
        status: project.status,
        step: workflow.current_step,
        objective: workflow.current_objective,
        phase: project.current_phase,
    })
}

fn read_document<T: DeserializeOwned>(
    path: &Path,
    violations: impl Fn(&T) -> Vec<String>,
) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    Ok(Some(parse_document(path, &raw, violations)?))
}
