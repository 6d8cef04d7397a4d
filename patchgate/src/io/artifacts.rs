//! Artifact files written per plan: plan JSON, diff and verification logs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::naming;
use crate::core::plan::Plan;
use crate::io::records::write_json_atomic;

/// Keeps the artifacts directory out of `git status` and `git add -A`.
const ARTIFACTS_GITIGNORE: &str = "*\n";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory and its `.gitignore` if missing.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create artifacts dir {}", self.dir.display()))?;
        let gitignore = self.dir.join(".gitignore");
        if !gitignore.exists() {
            write_text(&gitignore, ARTIFACTS_GITIGNORE)?;
        }
        Ok(())
    }

    pub fn write_plan(&self, plan_id: &str, plan: &Plan) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.dir.join(naming::plan_artifact_name(plan_id));
        write_json_atomic(&path, plan)?;
        Ok(path)
    }

    pub fn write_diff(&self, plan_id: &str, diff: &str) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.dir.join(naming::diff_artifact_name(plan_id));
        write_text(&path, diff)?;
        Ok(path)
    }

    /// Write one verification stream log; returns its path.
    pub fn write_verification_log(
        &self,
        command_name: &str,
        plan_id: &str,
        stream: &str,
        contents: &str,
    ) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self
            .dir
            .join(naming::verification_log_name(command_name, plan_id, stream));
        write_text(&path, contents)?;
        Ok(path)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
