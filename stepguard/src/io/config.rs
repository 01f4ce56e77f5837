//! Stepguard configuration stored under `.stepguard/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::classifier::{ToolCatalog, ToolOverride};
use crate::core::rules::RuleSet;
use crate::core::types::{RequiredGates, Step, StepRules};

/// Stepguard configuration (TOML).
///
/// This file is intended to be edited by humans. Every field is optional;
/// missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StepguardConfig {
    /// Master switch; when false every hook is pass-through.
    pub automation_enabled: bool,

    /// Evaluate PreToolUse as if the workflow were at this step (1–6).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_override: Option<Step>,

    /// Text that, anywhere in a tool input, requests an emergency override.
    pub emergency_override_marker: String,

    /// How long a hook waits for the state lock before giving up.
    pub lock_timeout_ms: u64,

    /// Compliance points deducted per logged override.
    pub override_penalty: u32,

    /// PostToolUse fingerprints remembered for duplicate detection.
    pub max_processed_events: usize,

    pub required_gates: RequiredGates,

    pub step_rules: StepRules,

    /// Extra or replacement tool catalog entries.
    pub tools: BTreeMap<String, ToolOverride>,
}

impl Default for StepguardConfig {
    fn default() -> Self {
        Self {
            automation_enabled: true,
            step_override: None,
            emergency_override_marker: "EMERGENCY_OVERRIDE".to_string(),
            lock_timeout_ms: 2_000,
            override_penalty: 10,
            max_processed_events: 256,
            required_gates: RequiredGates::default(),
            step_rules: StepRules::default(),
            tools: BTreeMap::new(),
        }
    }
}

impl StepguardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.emergency_override_marker.trim().is_empty() {
            return Err(anyhow!("emergency_override_marker must be non-empty"));
        }
        if self.lock_timeout_ms == 0 {
            return Err(anyhow!("lock_timeout_ms must be > 0"));
        }
        if self.override_penalty > 100 {
            return Err(anyhow!("override_penalty must be between 0 and 100"));
        }
        if self.max_processed_events == 0 {
            return Err(anyhow!("max_processed_events must be > 0"));
        }
        for step in Step::ALL {
            let rules = self.step_rules.for_step(step);
            if let Some(tool) = rules.allow.iter().find(|tool| rules.block.contains(tool)) {
                return Err(anyhow!(
                    "step_rules.{}: {tool} is both allowed and blocked",
                    step.name()
                ));
            }
        }
        if let Some(name) = self.tools.keys().find(|name| name.trim().is_empty()) {
            return Err(anyhow!("tools: invalid tool name {name:?}"));
        }
        Ok(())
    }

    pub fn catalog(&self) -> ToolCatalog {
        ToolCatalog::with_overrides(&self.tools)
    }

    pub fn rule_set<'a>(&'a self, catalog: &'a ToolCatalog) -> RuleSet<'a> {
        RuleSet {
            catalog,
            step_rules: &self.step_rules,
            override_marker: &self.emergency_override_marker,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `StepguardConfig::default()`.
pub fn load_config(path: &Path) -> Result<StepguardConfig> {
    if !path.exists() {
        let cfg = StepguardConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: StepguardConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
///
/// Stepguard itself only reads config; writing is for the command layer's
/// fixtures and tests.
#[cfg(any(test, feature = "test-support"))]
pub fn write_config(path: &Path, cfg: &StepguardConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(any(test, feature = "test-support"))]
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
