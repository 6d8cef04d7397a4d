//! Guardrail validation for proposed plans.
//!
//! Validation is pure: it reads the plan and the policy and returns the first
//! violation found. It never touches the filesystem, so it is safe to call at
//! proposal time and again right before execution.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::plan::{OpKind, Operation, Plan};
use crate::error::GuardrailViolation;

/// Path policy and budgets applied to every plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardrailPolicy {
    /// Prefixes rejected unless the plan lists them in `meta.unlock` and
    /// `allow_unlock` is set.
    pub locked_path_prefixes: Vec<String>,
    /// Prefixes that are always rejected.
    pub denied_path_prefixes: Vec<String>,
    pub allow_unlock: bool,
    pub max_ops: usize,
    pub max_total_write_bytes: usize,
    /// Extra denied prefixes that apply only to plans run in the given mode.
    pub mode_denied_prefixes: BTreeMap<String, Vec<String>>,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        let mut mode_denied_prefixes = BTreeMap::new();
        mode_denied_prefixes.insert(
            "self_improve".to_string(),
            vec![
                "patchgate/src/".to_string(),
                "Cargo.toml".to_string(),
                "Cargo.lock".to_string(),
            ],
        );
        Self {
            locked_path_prefixes: Vec::new(),
            denied_path_prefixes: vec![".git/".to_string(), ".patchgate/".to_string()],
            allow_unlock: false,
            max_ops: 20,
            max_total_write_bytes: 200_000,
            mode_denied_prefixes,
        }
    }
}

static DRIVE_LETTER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z]:").unwrap());

/// Validate `plan` against `policy`, failing on the first violation.
pub fn validate(plan: &Plan, policy: &GuardrailPolicy) -> Result<(), GuardrailViolation> {
    if plan.ops.len() > policy.max_ops {
        return Err(GuardrailViolation::TooManyOps {
            count: plan.ops.len(),
            max: policy.max_ops,
        });
    }

    let normalized = plan
        .ops
        .iter()
        .map(|op| normalize_op_path(op).map(|path| (op, path)))
        .collect::<Result<Vec<_>, _>>()?;

    for (op, path) in &normalized {
        check_prefixes(op, path, plan, policy)?;
    }

    for op in &plan.ops {
        check_shape(op)?;
    }

    let total = plan.total_write_bytes();
    if total > policy.max_total_write_bytes {
        return Err(GuardrailViolation::ByteBudgetExceeded {
            total,
            max: policy.max_total_write_bytes,
        });
    }

    if let Some(prefixes) = policy.mode_denied_prefixes.get(&plan.meta.mode) {
        for (op, path) in &normalized {
            if let Some(prefix) = matching_prefix(path, prefixes) {
                return Err(GuardrailViolation::ModeDeniedPath {
                    op_id: op.id.clone(),
                    path: op.file.clone(),
                    prefix,
                    mode: plan.meta.mode.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Normalize a repository-relative path to forward slashes, dropping empty
/// and `.` segments.
///
/// Returns the reason string when the path is unsafe.
pub fn normalize_rel_path(raw: &str) -> Result<String, &'static str> {
    if raw.trim().is_empty() {
        return Err("empty path");
    }
    if raw.contains('\0') {
        return Err("NUL byte in path");
    }
    let slashed = raw.replace('\\', "/");
    if slashed.starts_with('/') {
        return Err("absolute path");
    }
    if DRIVE_LETTER_RE.is_match(&slashed) {
        return Err("drive-letter path");
    }
    let mut segments = Vec::new();
    for segment in slashed.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err("path traversal"),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err("empty path");
    }
    Ok(segments.join("/"))
}

fn normalize_op_path(op: &Operation) -> Result<String, GuardrailViolation> {
    normalize_rel_path(&op.file).map_err(|reason| GuardrailViolation::UnsafePath {
        op_id: op.id.clone(),
        path: op.file.clone(),
        reason: reason.to_string(),
    })
}

fn check_prefixes(
    op: &Operation,
    path: &str,
    plan: &Plan,
    policy: &GuardrailPolicy,
) -> Result<(), GuardrailViolation> {
    if let Some(prefix) = matching_prefix(path, &policy.denied_path_prefixes) {
        return Err(GuardrailViolation::DeniedPath {
            op_id: op.id.clone(),
            path: op.file.clone(),
            prefix,
        });
    }
    for locked in &policy.locked_path_prefixes {
        let locked_norm = normalize_prefix(locked);
        if locked_norm.is_empty() || !path.starts_with(&locked_norm) {
            continue;
        }
        let unlocked = policy.allow_unlock
            && plan
                .meta
                .unlock
                .iter()
                .any(|u| normalize_prefix(u) == locked_norm);
        if !unlocked {
            return Err(GuardrailViolation::LockedPath {
                op_id: op.id.clone(),
                path: op.file.clone(),
                prefix: locked.clone(),
            });
        }
    }
    Ok(())
}

fn check_shape(op: &Operation) -> Result<(), GuardrailViolation> {
    if !op.reversible {
        return Err(GuardrailViolation::NonReversible {
            op_id: op.id.clone(),
        });
    }
    let range_error = |message: String| GuardrailViolation::MalformedRange {
        op_id: op.id.clone(),
        message,
    };
    match &op.kind {
        OpKind::CreateFile { .. } | OpKind::UpdateFile { .. } => Ok(()),
        OpKind::InsertAfter { start_line, .. } => {
            if *start_line < 1 {
                return Err(range_error(format!("startLine {start_line} < 1")));
            }
            Ok(())
        }
        OpKind::ReplaceRange {
            start_line,
            end_line,
            ..
        }
        | OpKind::DeleteRange {
            start_line,
            end_line,
        } => {
            if *start_line < 1 {
                return Err(range_error(format!("startLine {start_line} < 1")));
            }
            if end_line < start_line {
                return Err(range_error(format!(
                    "endLine {end_line} < startLine {start_line}"
                )));
            }
            Ok(())
        }
    }
}

/// Prefixes are compared on normalized form; a trailing slash is kept so that
/// `src/` does not match `srcfoo`.
fn normalize_prefix(prefix: &str) -> String {
    let slashed = prefix.trim().replace('\\', "/");
    let trimmed = slashed.trim_start_matches("./").trim_start_matches('/');
    trimmed.to_string()
}

fn matching_prefix(path: &str, prefixes: &[String]) -> Option<String> {
    prefixes
        .iter()
        .find(|prefix| {
            let norm = normalize_prefix(prefix);
            !norm.is_empty() && path.starts_with(&norm)
        })
        .cloned()
}
