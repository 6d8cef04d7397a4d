//! Identifiers derived from plans: plan ids, branch names, artifact file names.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

static UNSAFE_NAME_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9._-]+").unwrap());

/// Plan id for a plan accepted at `at` (`plan_<unix millis>`).
pub fn plan_id_at(at: DateTime<Utc>) -> String {
    format!("plan_{}", at.timestamp_millis())
}

/// Branch that carries the changes of `plan_id`.
pub fn branch_for_plan(prefix: &str, plan_id: &str) -> String {
    format!("{prefix}{plan_id}")
}

/// Whether `branch` was created by the engine.
pub fn is_engine_branch(prefix: &str, branch: &str) -> bool {
    !prefix.is_empty() && branch.starts_with(prefix) && branch.len() > prefix.len()
}

/// Replace runs of characters outside `[a-zA-Z0-9._-]` with `_`.
pub fn sanitize_file_component(name: &str) -> String {
    let cleaned = UNSAFE_NAME_CHARS_RE.replace_all(name, "_");
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.into_owned()
    }
}

/// File name for a verification log stream (`stdout` / `stderr`).
pub fn verification_log_name(command_name: &str, tag: &str, stream: &str) -> String {
    format!(
        "verify_{}_{}_{stream}.log",
        sanitize_file_component(command_name),
        sanitize_file_component(tag)
    )
}

/// `plan_<millis>.json` for ids produced by [`plan_id_at`].
pub fn plan_artifact_name(plan_id: &str) -> String {
    format!("{}.json", sanitize_file_component(plan_id))
}

pub fn diff_artifact_name(plan_id: &str) -> String {
    format!("diff_{}.patch", sanitize_file_component(plan_id))
}
