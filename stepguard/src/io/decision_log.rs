//! Append-only audit log of PreToolUse decisions (`.stepguard/decisions.jsonl`).
//!
//! Product output, separate from `tracing` diagnostics: one JSON object per
//! line, written regardless of `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{Action, Decision, Step};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub at: DateTime<Utc>,
    pub session_id: String,
    pub tool_name: String,
    pub step: Step,
    pub action: Action,
    pub reason: String,
    pub matched_rule: String,
    pub override_used: bool,
}

impl DecisionRecord {
    pub fn new(
        at: DateTime<Utc>,
        session_id: &str,
        tool_name: &str,
        step: Step,
        decision: &Decision,
    ) -> Self {
        Self {
            at,
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            step,
            action: decision.action,
            reason: decision.reason.clone(),
            matched_rule: decision.matched_rule.clone(),
            override_used: decision.override_used,
        }
    }
}

pub fn append_decision(path: &Path, record: &DecisionRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize decision record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    Ok(())
}

/// Read every record; a missing log reads as empty.
pub fn read_decisions(path: &Path) -> Result<Vec<DecisionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), index + 1))
        })
        .collect()
}
