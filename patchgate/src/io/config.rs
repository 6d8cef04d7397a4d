//! Engine configuration stored under `.patchgate/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::guardrail::GuardrailPolicy;

pub const DEFAULT_ARTIFACTS_DIR: &str = ".patchgate";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_COMMIT_MESSAGE_TEMPLATE: &str = "agent: {{ goal }} ({{ plan_id }})";

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields take the
/// defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Where plans, diffs, logs and records are written. Relative paths
    /// resolve against the repository root.
    pub artifacts_dir: PathBuf,

    /// Branch that engine branches are merged into.
    pub trunk_branch: String,

    /// Prefix for engine-created branches. Cleanup deletes everything under it.
    pub branch_prefix: String,

    /// Truncate the unified diff returned by execute beyond this many chars.
    pub diff_max_chars: usize,

    /// minijinja template for commit messages (`goal`, `plan_id`, `mode`).
    pub commit_message_template: String,

    pub guardrails: GuardrailPolicy,

    pub verification: VerificationConfig,

    pub planner: PlannerConfig,
}

/// Budgets for the file previews handed to the planner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_files: usize,
    pub max_chars_per_file: usize,
    pub max_total_chars: usize,
    /// Files larger than this are never previewed.
    pub max_file_bytes: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_files: 12,
            max_chars_per_file: 4_000,
            max_total_chars: 40_000,
            max_file_bytes: 200_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationConfig {
    /// Allow-listed command run after execute in gated modes.
    pub default_command: String,

    /// Modes whose branches must pass verification before merge.
    pub required_modes: Vec<String>,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Allow-list of runnable commands, keyed by name.
    pub commands: BTreeMap<String, CommandSpec>,
}

/// One allow-listed command: explicit argv, never a shell string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory relative to the repository root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10 * 60
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
            cwd: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Human-readable argv for records and logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        let mut commands = BTreeMap::new();
        commands.insert("test".to_string(), CommandSpec::new("cargo", &["test"]));
        Self {
            default_command: "test".to_string(),
            required_modes: vec!["self_improve".to_string()],
            output_limit_bytes: 100_000,
            commands,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            trunk_branch: "main".to_string(),
            branch_prefix: "agent/".to_string(),
            diff_max_chars: 400_000,
            commit_message_template: DEFAULT_COMMIT_MESSAGE_TEMPLATE.to_string(),
            guardrails: GuardrailPolicy::default(),
            verification: VerificationConfig::default(),
            planner: PlannerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.artifacts_dir.as_os_str().is_empty() {
            return Err(anyhow!("artifacts_dir must be non-empty"));
        }
        if self.trunk_branch.trim().is_empty() {
            return Err(anyhow!("trunk_branch must be non-empty"));
        }
        if self.branch_prefix.trim().is_empty() {
            return Err(anyhow!("branch_prefix must be non-empty"));
        }
        if self.trunk_branch.starts_with(&self.branch_prefix) {
            return Err(anyhow!(
                "trunk_branch '{}' must not start with branch_prefix '{}'",
                self.trunk_branch,
                self.branch_prefix
            ));
        }
        if self.diff_max_chars == 0 {
            return Err(anyhow!("diff_max_chars must be > 0"));
        }
        if self.commit_message_template.trim().is_empty() {
            return Err(anyhow!("commit_message_template must be non-empty"));
        }
        if self.guardrails.max_ops == 0 {
            return Err(anyhow!("guardrails.max_ops must be > 0"));
        }
        let verification = &self.verification;
        if verification.output_limit_bytes == 0 {
            return Err(anyhow!("verification.output_limit_bytes must be > 0"));
        }
        for (name, spec) in &verification.commands {
            if spec.program.trim().is_empty() {
                return Err(anyhow!("verification.commands.{name}.program must be non-empty"));
            }
            if spec.timeout_secs == 0 {
                return Err(anyhow!("verification.commands.{name}.timeout_secs must be > 0"));
            }
        }
        if !verification.required_modes.is_empty()
            && !verification.commands.contains_key(&verification.default_command)
        {
            return Err(anyhow!(
                "verification.default_command '{}' is not in verification.commands",
                verification.default_command
            ));
        }
        Ok(())
    }

    /// Absolute artifacts directory for `repo_root`.
    pub fn artifacts_path(&self, repo_root: &Path) -> PathBuf {
        if self.artifacts_dir.is_absolute() {
            self.artifacts_dir.clone()
        } else {
            repo_root.join(&self.artifacts_dir)
        }
    }

    pub fn requires_verification(&self, mode: &str) -> bool {
        self.verification
            .required_modes
            .iter()
            .any(|required| required == mode)
    }
}

/// Default config location for a repository.
pub fn default_config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(DEFAULT_ARTIFACTS_DIR).join(CONFIG_FILE_NAME)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

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
