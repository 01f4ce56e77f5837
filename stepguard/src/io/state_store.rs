//! Load/save of the two state documents with locking and recovery.
//!
//! Every mutation goes through [`with_state_exclusive`]:
//!
//! 1. take an exclusive `fs2` lock on `.stepguard/state.lock`, polling until
//!    the configured deadline;
//! 2. load both documents, recovering corrupt ones to defaults;
//! 3. run the caller's mutation;
//! 4. if anything changed, write both documents to temp files, fsync them,
//!    then rename both into place;
//! 5. release the lock.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::invariants::{clock_anomalies, project_violations, workflow_violations};
use crate::io::paths::StepguardPaths;
use crate::state::{ProjectState, WorkflowState};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("timed out after {waited_ms}ms waiting for state lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited_ms: u128 },
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("serialize {document}: {source}")]
    Serialize {
        document: &'static str,
        source: serde_json::Error,
    },
}

impl StateError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        StateError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Both documents as one unit of mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub project: ProjectState,
    pub workflow: WorkflowState,
}

impl StateSnapshot {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            project: ProjectState::new(now),
            workflow: WorkflowState::new(now),
        }
    }

    /// Copy the authoritative flag into the workflow document.
    pub fn mirror_automation(&mut self) {
        self.workflow.automation_active = self.project.automation_active;
    }
}

/// A document that failed to load and was replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredDocument {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub states: StateSnapshot,
    pub recovered: Vec<RecoveredDocument>,
}

/// Parse one document strictly: JSON shape plus semantic invariants.
pub fn parse_document<T: DeserializeOwned>(
    path: &Path,
    raw: &str,
    violations: impl Fn(&T) -> Vec<String>,
) -> Result<T, StateError> {
    let value: T = serde_json::from_str(raw).map_err(|err| StateError::Corrupt {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let errors = violations(&value);
    if !errors.is_empty() {
        return Err(StateError::Corrupt {
            path: path.to_path_buf(),
            reason: errors.join("; "),
        });
    }
    Ok(value)
}

/// Load both documents. Missing files become defaults; corrupt files are
/// backed up and replaced by defaults. Only raw I/O failures are errors.
#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn load_states(paths: &StepguardPaths, now: DateTime<Utc>) -> Result<LoadedState, StateError> {
    let mut recovered = Vec::new();
    let project = load_document(
        &paths.project_path,
        project_violations,
        || ProjectState::new(now),
        now,
        &mut recovered,
    )?;
    let workflow = load_document(
        &paths.workflow_path,
        workflow_violations,
        || WorkflowState::starting(project.opening_objective(), now),
        now,
        &mut recovered,
    )?;
    for anomaly in clock_anomalies(&project, &workflow) {
        warn!(%anomaly, "state timestamps run backwards");
    }
    debug!(
        step = workflow.current_step.ordinal(),
        status = project.status.label(),
        recovered = recovered.len(),
        "state loaded"
    );
    Ok(LoadedState {
        states: StateSnapshot { project, workflow },
        recovered,
    })
}

fn load_document<T: DeserializeOwned>(
    path: &Path,
    violations: impl Fn(&T) -> Vec<String>,
    fresh: impl FnOnce() -> T,
    now: DateTime<Utc>,
    recovered: &mut Vec<RecoveredDocument>,
) -> Result<T, StateError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(fresh()),
        Err(err) => return Err(StateError::io("read", path, err)),
    };
    match parse_document(path, &raw, violations) {
        Ok(value) => Ok(value),
        Err(err) => {
            let backup = StepguardPaths::corrupt_backup(path, &now.format("%Y%m%dT%H%M%SZ").to_string());
            let backup = match fs::rename(path, &backup) {
                Ok(()) => Some(backup),
                Err(rename_err) => {
                    warn!(path = %path.display(), err = %rename_err, "could not back up corrupt state");
                    None
                }
            };
            warn!(
                path = %path.display(),
                backup = ?backup,
                err = %err,
                "corrupt state document replaced with defaults"
            );
            recovered.push(RecoveredDocument {
                path: path.to_path_buf(),
                backup,
                reason: err.to_string(),
            });
            Ok(fresh())
        }
    }
}

/// Write both documents in one commit boundary (temp files, fsync, rename).
#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn save_states(paths: &StepguardPaths, states: &StateSnapshot) -> Result<(), StateError> {
    let mut states = states.clone();
    states.mirror_automation();

    let dir = &paths.state_dir;
    fs::create_dir_all(dir).map_err(|err| StateError::io("create directory", dir, err))?;

    let project = staged_document(dir, "project", &states.project)?;
    let workflow = staged_document(dir, "workflow", &states.workflow)?;
    project
        .persist(&paths.project_path)
        .map_err(|err| StateError::io("replace", &paths.project_path, err.error))?;
    workflow
        .persist(&paths.workflow_path)
        .map_err(|err| StateError::io("replace", &paths.workflow_path, err.error))?;
    sync_dir(dir)?;

    debug!(
        step = states.workflow.current_step.ordinal(),
        status = states.project.status.label(),
        "state saved"
    );
    Ok(())
}

fn staged_document<T: Serialize>(
    dir: &Path,
    document: &'static str,
    value: &T,
) -> Result<NamedTempFile, StateError> {
    let mut payload = serde_json::to_vec_pretty(value)
        .map_err(|source| StateError::Serialize { document, source })?;
    payload.push(b'\n');
    let mut temp =
        NamedTempFile::new_in(dir).map_err(|err| StateError::io("create temp file in", dir, err))?;
    temp.write_all(&payload)
        .map_err(|err| StateError::io("write", temp.path(), err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| StateError::io("sync", temp.path(), err))?;
    Ok(temp)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StateError> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| StateError::io("sync directory", dir, err))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StateError> {
    Ok(())
}

/// Run `operation` on the loaded state while holding the exclusive lock.
///
/// State is saved only when the operation succeeds and either changed the
/// state or a corrupt document was recovered.
pub fn with_state_exclusive<T>(
    paths: &StepguardPaths,
    timeout: Duration,
    now: DateTime<Utc>,
    operation: impl FnOnce(&mut StateSnapshot) -> Result<T>,
) -> Result<T> {
    let lock_file = acquire_lock(&paths.lock_path, timeout)?;
    let LoadedState {
        mut states,
        recovered,
    } = load_states(paths, now)?;
    states.mirror_automation();
    let before = states.clone();

    let result = operation(&mut states)?;

    states.mirror_automation();
    if states != before || !recovered.is_empty() {
        save_states(paths, &states)?;
    }
    drop(lock_file);
    Ok(result)
}

fn acquire_lock(path: &Path, timeout: Duration) -> Result<File, StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| StateError::io("create directory", parent, err))?;
    }
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|err| StateError::io("open state lock", path, err))?;

    let started = Instant::now();
    let contended = fs2::lock_contended_error();
    loop {
        match FileExt::try_lock_exclusive(&lock_file) {
            Ok(()) => {
                debug!(waited_ms = started.elapsed().as_millis(), "state lock acquired");
                return Ok(lock_file);
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.raw_os_error() == contended.raw_os_error() =>
            {
                let waited = started.elapsed();
                if waited >= timeout {
                    warn!(path = %path.display(), waited_ms = waited.as_millis(), "state lock timed out");
                    return Err(StateError::LockTimeout {
                        path: path.to_path_buf(),
                        waited_ms: waited.as_millis(),
                    });
                }
                thread::sleep(LOCK_POLL_INTERVAL.min(timeout - waited));
            }
            Err(err) => return Err(StateError::io("lock", path, err)),
        }
    }
}
