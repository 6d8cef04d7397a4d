//! Test-only helpers: a throwaway git repository, a scripted command runner,
//! and plan builders.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::engine::Engine;
use crate::io::config::{CommandSpec, EngineConfig};
use crate::io::git::Git;
use crate::io::planner::StubPlanner;
use crate::io::verify::{CommandRunner, RunResult};

/// Engine wired to a real git repository and scripted verification.
pub type TestEngine = Engine<Git, ScriptedRunner, StubPlanner>;

/// A git repository in a temp directory with one commit on `main`.
pub struct TestRepo {
    temp: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { temp };
        repo.git(&["init", "-q"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        repo.git(&["config", "user.email", "patchgate@example.com"])?;
        repo.git(&["config", "user.name", "patchgate"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write_file("README.md", "# test repo\n")?;
        repo.git(&["add", "-A"])?;
        repo.git(&["commit", "-q", "-m", "initial"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read_file(&self, rel: &str) -> Result<String> {
        let path = self.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Write `rel` and commit it on the current branch.
    pub fn commit_file(&self, rel: &str, contents: &str) -> Result<()> {
        self.write_file(rel, contents)?;
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-q", "-m", &format!("add {rel}")])?;
        Ok(())
    }

    /// Run git and return trimmed stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn head(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"])
    }

    pub fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn branches(&self) -> Result<Vec<String>> {
        let out = self.git(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Config with a `check` command that the scripted runner answers.
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.verification.commands.clear();
        config
            .verification
            .commands
            .insert("check".to_string(), CommandSpec::new("check", &[]));
        config.verification.default_command = "check".to_string();
        config
    }

    pub fn engine(&self, runner: ScriptedRunner) -> TestEngine {
        self.engine_with(self.config(), runner, StubPlanner::default())
    }

    pub fn engine_with(
        &self,
        config: EngineConfig,
        runner: ScriptedRunner,
        planner: StubPlanner,
    ) -> TestEngine {
        Engine::new(self.path(), config, Git::new(self.path()), runner, planner)
    }
}

/// Command runner that returns queued results and logs each invocation.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    results: RefCell<Vec<RunResult>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    /// Every run exits with `code`.
    pub fn exiting(code: i32) -> Self {
        let runner = Self::default();
        runner.push(exit_result(code));
        runner
    }

    pub fn push(&self, result: RunResult) {
        self.results.borrow_mut().push(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec, _cwd: &Path, _timeout: Duration) -> RunResult {
        self.calls.borrow_mut().push(spec.display());
        let mut results = self.results.borrow_mut();
        // The last result repeats once the queue is down to one.
        if results.len() > 1 {
            results.remove(0)
        } else {
            results
                .first()
                .cloned()
                .unwrap_or_else(|| RunResult::failed_to_start("no scripted result"))
        }
    }
}

pub fn exit_result(code: i32) -> RunResult {
    RunResult {
        ok: code == 0,
        exit_code: Some(code),
        stdout: format!("exit {code}\n"),
        stderr: String::new(),
        duration_ms: 1,
        timed_out: false,
    }
}

/// Raw plan JSON with `ops` and the given mode.
pub fn plan_json(mode: &str, ops: Vec<Value>) -> Value {
    json!({
        "meta": {
            "goal": "test change",
            "rationale": "exercise the engine",
            "confidence": 0.9,
            "mode": mode
        },
        "ops": ops
    })
}

pub fn create_op(file: &str, content: &str) -> Value {
    json!({ "file": file, "type": "createFile", "content": content })
}

pub fn update_op(file: &str, content: &str) -> Value {
    json!({ "file": file, "type": "updateFile", "content": content })
}

pub fn replace_op(file: &str, start_line: usize, end_line: usize, content: &str) -> Value {
    json!({
        "file": file,
        "type": "replaceRange",
        "startLine": start_line,
        "endLine": end_line,
        "content": content
    })
}

pub fn insert_op(file: &str, start_line: usize, content: &str) -> Value {
    json!({ "file": file, "type": "insertAfter", "startLine": start_line, "content": content })
}

pub fn delete_op(file: &str, start_line: usize, end_line: usize) -> Value {
    json!({ "file": file, "type": "deleteRange", "startLine": start_line, "endLine": end_line })
}
