//! Verification runner: allow-listed commands run against a plan branch.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::guardrail::normalize_rel_path;
use crate::io::artifacts::ArtifactStore;
use crate::io::config::{CommandSpec, VerificationConfig};
use crate::io::process::run_command_with_timeout;
use crate::io::records::{VerificationRecord, now_rfc3339};

/// Result of running one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl RunResult {
    /// A run that never started.
    pub fn failed_to_start(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            exit_code: None,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms: 0,
            timed_out: false,
        }
    }
}

pub trait CommandRunner {
    /// Run `spec` in `cwd`. Never fails: spawn errors come back as `ok = false`.
    fn run(&self, spec: &CommandSpec, cwd: &Path, timeout: Duration) -> RunResult;
}

/// Runs commands as child processes with explicit argv (no shell).
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub output_limit_bytes: usize,
}

impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %spec.program))]
    fn run(&self, spec: &CommandSpec, cwd: &Path, timeout: Duration) -> RunResult {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).current_dir(cwd);
        match run_command_with_timeout(cmd, timeout, self.output_limit_bytes) {
            Ok(output) => {
                let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
                stdout.push_str(&output.stdout_truncated_notice());
                let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
                stderr.push_str(&output.stderr_truncated_notice());
                if output.timed_out {
                    stderr.push_str(&format!(
                        "\n[timed out after {}s; process group killed]\n",
                        timeout.as_secs()
                    ));
                }
                RunResult {
                    ok: output.status.success() && !output.timed_out,
                    exit_code: output.status.code(),
                    stdout,
                    stderr,
                    duration_ms: u64::try_from(output.duration.as_millis()).unwrap_or(u64::MAX),
                    timed_out: output.timed_out,
                }
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "command failed to start");
                RunResult::failed_to_start(format!("{err:#}"))
            }
        }
    }
}

/// Resolves allow-listed commands and records their outcome.
pub struct Verifier<'a, R: CommandRunner> {
    pub runner: &'a R,
    pub config: &'a VerificationConfig,
    pub artifacts: &'a ArtifactStore,
    pub repo_root: &'a Path,
}

impl<R: CommandRunner> Verifier<'_, R> {
    /// Run the allow-listed command `name` for `branch_name` and write its logs.
    ///
    /// A name missing from the allow-list, or a `cwd` that escapes the
    /// repository, yields a failed record without spawning anything.
    #[instrument(skip_all, fields(command = name, branch = branch_name))]
    pub fn verify(
        &self,
        name: &str,
        branch_name: &str,
        plan_id: &str,
    ) -> Result<VerificationRecord> {
        let (command, result) = match self.config.commands.get(name) {
            None => (
                name.to_string(),
                RunResult::failed_to_start(format!(
                    "command '{name}' is not in the verification allow-list"
                )),
            ),
            Some(spec) => {
                let result = match self.resolve_cwd(spec) {
                    Ok(cwd) => {
                        self.runner
                            .run(spec, &cwd, Duration::from_secs(spec.timeout_secs))
                    }
                    Err(reason) => RunResult::failed_to_start(reason),
                };
                (spec.display(), result)
            }
        };

        let stdout_log =
            self.artifacts
                .write_verification_log(name, plan_id, "stdout", &result.stdout)?;
        let stderr_log =
            self.artifacts
                .write_verification_log(name, plan_id, "stderr", &result.stderr)?;

        if result.ok {
            info!(duration_ms = result.duration_ms, "verification passed");
        } else {
            warn!(exit_code = ?result.exit_code, timed_out = result.timed_out, "verification failed");
        }

        Ok(VerificationRecord {
            branch_name: branch_name.to_string(),
            plan_id: plan_id.to_string(),
            ok: result.ok,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            timed_out: result.timed_out,
            command,
            log_paths: vec![stdout_log, stderr_log],
            created_at: now_rfc3339(),
        })
    }

    fn resolve_cwd(&self, spec: &CommandSpec) -> Result<PathBuf, String> {
        let Some(rel) = &spec.cwd else {
            return Ok(self.repo_root.to_path_buf());
        };
        let raw = rel.to_string_lossy();
        if raw.trim().is_empty() || raw == "." {
            return Ok(self.repo_root.to_path_buf());
        }
        let normalized = normalize_rel_path(&raw)
            .map_err(|reason| format!("invalid verification cwd '{raw}': {reason}"))?;
        Ok(self.repo_root.join(normalized))
    }
}
