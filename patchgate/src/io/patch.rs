//! Applies validated operations to the working tree.
//!
//! Operations run strictly in order and the first failure aborts the batch.
//! Every target is re-resolved against the canonical repository root right
//! before it is touched, so a symlinked directory cannot redirect a write.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::guardrail::normalize_rel_path;
use crate::core::lines::{LineError, apply_line_op};
use crate::core::plan::{OpKind, Operation};
use crate::error::ExecutionError;

/// What one operation did to the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedOp {
    pub op_id: String,
    /// Normalized repository-relative path.
    pub file: String,
    pub existed_before: bool,
    /// False when the computed content matched the file byte for byte.
    pub changed: bool,
}

/// Apply `ops` in order under `repo_root`.
#[instrument(skip_all, fields(ops = ops.len(), root = %repo_root.display()))]
pub fn apply_all(ops: &[Operation], repo_root: &Path) -> Result<Vec<AppliedOp>, ExecutionError> {
    let root = repo_root
        .canonicalize()
        .map_err(|err| ExecutionError::Io {
            op_id: String::new(),
            path: repo_root.display().to_string(),
            message: format!("canonicalize repository root: {err}"),
        })?;
    let mut applied = Vec::with_capacity(ops.len());
    for op in ops {
        applied.push(apply_one(op, &root)?);
    }
    Ok(applied)
}

/// Absolute paths that `createFile` ops would bring into existence.
///
/// Computed before execution so a rollback can remove untracked files that
/// `git reset --hard` leaves behind.
pub fn planned_new_files(ops: &[Operation], repo_root: &Path) -> Vec<PathBuf> {
    ops.iter()
        .filter(|op| matches!(op.kind, OpKind::CreateFile { .. }))
        .filter_map(|op| normalize_rel_path(&op.file).ok())
        .map(|rel| repo_root.join(rel))
        .filter(|path| fs::symlink_metadata(path).is_err())
        .collect()
}

fn apply_one(op: &Operation, root: &Path) -> Result<AppliedOp, ExecutionError> {
    let rel = normalize_rel_path(&op.file).map_err(|_| ExecutionError::OutsideRoot {
        op_id: op.id.clone(),
        path: op.file.clone(),
    })?;
    let target = root.join(&rel);
    ensure_within_root(op, &rel, &target, root)?;
    let existed_before = fs::symlink_metadata(&target).is_ok();
    let io_err = |message: String| ExecutionError::Io {
        op_id: op.id.clone(),
        path: rel.clone(),
        message,
    };

    let changed = match &op.kind {
        OpKind::CreateFile { content } => {
            if existed_before {
                return Err(ExecutionError::TargetExists {
                    op_id: op.id.clone(),
                    path: rel.clone(),
                });
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| io_err(format!("create parent directories: {err}")))?;
            }
            fs::write(&target, content).map_err(|err| io_err(format!("write: {err}")))?;
            true
        }
        OpKind::UpdateFile { content } => {
            let current = read_existing(op, &rel, &target, existed_before)?;
            write_if_changed(&target, &current, content).map_err(io_err)?
        }
        kind @ (OpKind::ReplaceRange { .. }
        | OpKind::InsertAfter { .. }
        | OpKind::DeleteRange { .. }) => {
            let current = read_existing(op, &rel, &target, existed_before)?;
            let next = apply_line_op(&current, kind).map_err(|err| match err {
                LineError::NotLineBased { .. } => io_err(err.to_string()),
                LineError::StartOutOfRange { .. }
                | LineError::EndOutOfRange { .. }
                | LineError::InvertedRange { .. } => ExecutionError::OutOfBounds {
                    op_id: op.id.clone(),
                    path: rel.clone(),
                    message: err.to_string(),
                },
            })?;
            write_if_changed(&target, &current, &next).map_err(io_err)?
        }
    };

    debug!(op_id = %op.id, kind = op.kind.name(), file = %rel, changed, "applied op");
    Ok(AppliedOp {
        op_id: op.id.clone(),
        file: rel,
        existed_before,
        changed,
    })
}

/// Canonicalize the deepest existing ancestor of `target` and require it to
/// stay under `root`.
fn ensure_within_root(
    op: &Operation,
    rel: &str,
    target: &Path,
    root: &Path,
) -> Result<(), ExecutionError> {
    let outside = || ExecutionError::OutsideRoot {
        op_id: op.id.clone(),
        path: rel.to_string(),
    };
    let mut probe = Some(target);
    while let Some(candidate) = probe {
        if fs::symlink_metadata(candidate).is_ok() {
            // A dangling symlink fails to canonicalize and is rejected.
            let resolved = candidate.canonicalize().map_err(|_| outside())?;
            if !resolved.starts_with(root) {
                return Err(outside());
            }
            return Ok(());
        }
        probe = candidate.parent();
    }
    Err(outside())
}

fn read_existing(
    op: &Operation,
    rel: &str,
    target: &Path,
    existed_before: bool,
) -> Result<String, ExecutionError> {
    if !existed_before || !target.is_file() {
        return Err(ExecutionError::MissingTarget {
            op_id: op.id.clone(),
            path: rel.to_string(),
        });
    }
    fs::read_to_string(target).map_err(|err| ExecutionError::Io {
        op_id: op.id.clone(),
        path: rel.to_string(),
        message: format!("read: {err}"),
    })
}

fn write_if_changed(target: &Path, current: &str, next: &str) -> Result<bool, String> {
    if current == next {
        return Ok(false);
    }
    fs::write(target, next).map_err(|err| format!("write: {err}"))?;
    Ok(true)
}
