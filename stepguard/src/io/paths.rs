//! Canonical locations under `.stepguard/`.

use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".stepguard";

/// All canonical paths within `.stepguard/` for a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepguardPaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub project_path: PathBuf,
    pub workflow_path: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub decision_log_path: PathBuf,
}

impl StepguardPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self {
            root,
            project_path: state_dir.join("project.json"),
            workflow_path: state_dir.join("workflow.json"),
            config_path: state_dir.join("config.toml"),
            lock_path: state_dir.join("state.lock"),
            decision_log_path: state_dir.join("decisions.jsonl"),
            state_dir,
        }
    }

    /// Backup location for a corrupt document, e.g. `project.json.corrupt-20260301T120000Z`.
    pub fn corrupt_backup(path: &Path, stamp: &str) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{name}.corrupt-{stamp}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_state_dir() {
        let paths = StepguardPaths::new("/work/project");
        assert_eq!(paths.state_dir, Path::new("/work/project/.stepguard"));
        assert_eq!(
            paths.workflow_path,
            Path::new("/work/project/.stepguard/workflow.json")
        );
        assert_eq!(
            StepguardPaths::corrupt_backup(&paths.project_path, "20260301T120000Z"),
            Path::new("/work/project/.stepguard/project.json.corrupt-20260301T120000Z")
        );
    }
}
