//! Planner boundary.
//!
//! A planner turns repository context into raw plan JSON. Its output is
//! untrusted: the engine normalizes it with `parse_plan` and validates it
//! before anything is touched.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::io::context::FilePreview;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoContext {
    pub root: PathBuf,
    pub head_ref: String,
    pub branch: String,
}

/// Everything a planner is told about the request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerInput {
    pub repo: RepoContext,
    /// Paths of the previewed files.
    pub scope: Vec<String>,
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub files_preview: Vec<FilePreview>,
}

pub trait Planner {
    fn plan(&self, input: &PlannerInput) -> Result<Value>;
}

/// Returns a fixed response; with no response configured it proposes nothing.
#[derive(Debug, Clone, Default)]
pub struct StubPlanner {
    pub response: Option<Value>,
}

impl StubPlanner {
    pub fn returning(response: Value) -> Self {
        Self {
            response: Some(response),
        }
    }
}

impl Planner for StubPlanner {
    fn plan(&self, input: &PlannerInput) -> Result<Value> {
        debug!(mode = %input.mode, "stub planner invoked");
        Ok(self.response.clone().unwrap_or_else(|| {
            json!({
                "meta": {
                    "goal": "noop",
                    "rationale": "Stub planner produced no changes.",
                    "confidence": 0.0
                },
                "ops": []
            })
        }))
    }
}

/// Reads a plan from a JSON file written by an external tool.
#[derive(Debug, Clone)]
pub struct FilePlanner {
    pub path: PathBuf,
}

impl Planner for FilePlanner {
    fn plan(&self, _input: &PlannerInput) -> Result<Value> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read plan {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse plan {}", self.path.display()))
    }
}
