//! Git adapter for the engine.
//!
//! The engine isolates every plan on its own branch and commits
//! deterministically, so we keep a small, explicit wrapper around `git`
//! subprocess calls behind the [`VersionControl`] trait.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// One line of `git diff --name-status`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FileChange {
    /// Status letter(s), e.g. `A`, `M`, `D`, `R100`.
    pub status: String,
    pub path: String,
}

/// Version-control operations the engine depends on.
pub trait VersionControl {
    /// Full SHA of `HEAD`.
    fn head_ref(&self) -> Result<String>;
    /// Current branch name (errors on detached HEAD).
    fn current_branch(&self) -> Result<String>;
    fn checkout_new_branch(&self, branch: &str) -> Result<()>;
    fn checkout(&self, branch: &str) -> Result<()>;
    /// Stage everything (respecting `.gitignore`) and commit; returns the new SHA.
    fn commit_all(&self, message: &str) -> Result<String>;
    fn diff_name_status(&self, base: &str, head: &str) -> Result<Vec<FileChange>>;
    fn diff_unified(&self, base: &str, head: &str) -> Result<String>;
    fn reset_hard(&self, rev: &str) -> Result<()>;
    fn delete_branch_force(&self, branch: &str) -> Result<()>;
    fn merge_no_ff(&self, branch: &str) -> Result<()>;
    fn merge_abort(&self) -> Result<()>;
    fn list_local_branches(&self) -> Result<Vec<String>>;
    fn branch_exists(&self, branch: &str) -> Result<bool>;
    /// Status entries including untracked files.
    fn status_porcelain(&self) -> Result<Vec<StatusEntry>>;

    fn is_clean(&self) -> Result<bool> {
        Ok(self.status_porcelain()?.is_empty())
    }

    /// Error listing the offending entries unless the tree is clean.
    fn ensure_clean(&self) -> Result<()> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(dirty_count = entries.len(), "worktree not clean");
        let mut msg = String::from("working tree not clean:\n");
        for entry in entries {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Top-level directory of the repository containing `workdir`.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(anyhow!("git {} failed: {}", args.join(" "), detail));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl VersionControl for Git {
    fn head_ref(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    #[instrument(skip_all)]
    fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    #[instrument(skip_all, fields(branch))]
    fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    fn checkout(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn commit_all(&self, message: &str) -> Result<String> {
        self.run_checked(&["add", "-A"])?;
        let staged = self.run_capture(&["diff", "--cached", "--name-only"])?;
        if staged.trim().is_empty() {
            return Err(anyhow!("nothing staged to commit"));
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        self.head_ref()
    }

    fn diff_name_status(&self, base: &str, head: &str) -> Result<Vec<FileChange>> {
        let out = self.run_capture(&["diff", "--name-status", base, head])?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_name_status_line)
            .collect()
    }

    fn diff_unified(&self, base: &str, head: &str) -> Result<String> {
        self.run_capture(&["diff", base, head])
    }

    #[instrument(skip_all, fields(rev))]
    fn reset_hard(&self, rev: &str) -> Result<()> {
        debug!(rev, "hard reset");
        self.run_checked(&["reset", "--hard", rev])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    fn delete_branch_force(&self, branch: &str) -> Result<()> {
        debug!(branch, "force-deleting branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch))]
    fn merge_no_ff(&self, branch: &str) -> Result<()> {
        debug!(branch, "merging with --no-ff");
        self.run_checked(&["merge", "--no-ff", "--no-edit", branch])?;
        Ok(())
    }

    fn merge_abort(&self) -> Result<()> {
        self.run_checked(&["merge", "--abort"])?;
        Ok(())
    }

    fn list_local_branches(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }
}

/// Truncate `diff` to at most `max_chars` characters, appending a marker that
/// records the original length.
pub fn truncate_diff(diff: &str, max_chars: usize) -> String {
    let total = diff.chars().count();
    if total <= max_chars {
        return diff.to_string();
    }
    let mut out: String = diff.chars().take(max_chars).collect();
    out.push_str(&format!("\n...TRUNCATED ({total} chars total)\n"));
    out
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

fn parse_name_status_line(line: &str) -> Result<FileChange> {
    let (status, rest) = line
        .split_once('\t')
        .ok_or_else(|| anyhow!("unexpected name-status line: '{line}'"))?;
    // Renames and copies list old and new paths; keep the new one.
    let path = rest.rsplit('\t').next().unwrap_or(rest).trim();
    if status.trim().is_empty() || path.is_empty() {
        return Err(anyhow!("unexpected name-status line: '{line}'"));
    }
    Ok(FileChange {
        status: status.trim().to_string(),
        path: path.to_string(),
    })
}
