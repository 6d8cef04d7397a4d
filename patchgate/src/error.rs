//! Error taxonomy surfaced to callers of the engine.
//!
//! Internal I/O helpers return `anyhow::Result` with context; the engine
//! converts those into one of the categories below at its boundary so that a
//! front end can render `{category, message}` without inspecting internals.

use serde::Serialize;

/// A plan (or one of its operations) broke a safety rule. Raised before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardrailViolation {
    #[error("plan has {count} operations (max {max})")]
    TooManyOps { count: usize, max: usize },

    #[error("op {op_id}: unsafe path '{path}' ({reason})")]
    UnsafePath {
        op_id: String,
        path: String,
        reason: String,
    },

    #[error("op {op_id}: path '{path}' is under denied prefix '{prefix}'")]
    DeniedPath {
        op_id: String,
        path: String,
        prefix: String,
    },

    #[error("op {op_id}: path '{path}' is under locked prefix '{prefix}' (not unlocked by plan)")]
    LockedPath {
        op_id: String,
        path: String,
        prefix: String,
    },

    #[error("op {op_id}: mode '{mode}' may not modify '{path}' (prefix '{prefix}')")]
    ModeDeniedPath {
        op_id: String,
        path: String,
        prefix: String,
        mode: String,
    },

    #[error("op {op_id}: malformed line range: {message}")]
    MalformedRange { op_id: String, message: String },

    #[error("op {op_id}: malformed operation: {message}")]
    MalformedOp { op_id: String, message: String },

    #[error("malformed plan: {message}")]
    MalformedPlan { message: String },

    #[error("op {op_id}: operation is marked non-reversible")]
    NonReversible { op_id: String },

    #[error("plan writes {total} bytes (max {max})")]
    ByteBudgetExceeded { total: usize, max: usize },
}

impl GuardrailViolation {
    /// Stable rule name for the violated check.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::TooManyOps { .. } => "max_ops",
            Self::UnsafePath { .. } => "unsafe_path",
            Self::DeniedPath { .. } => "denied_path",
            Self::LockedPath { .. } => "locked_path",
            Self::ModeDeniedPath { .. } => "mode_denied_path",
            Self::MalformedRange { .. } => "line_range",
            Self::MalformedOp { .. } => "op_shape",
            Self::MalformedPlan { .. } => "plan_shape",
            Self::NonReversible { .. } => "reversible",
            Self::ByteBudgetExceeded { .. } => "max_total_write_bytes",
        }
    }

    /// Id of the offending operation, when the rule is op-scoped.
    pub fn op_id(&self) -> Option<&str> {
        match self {
            Self::UnsafePath { op_id, .. }
            | Self::DeniedPath { op_id, .. }
            | Self::LockedPath { op_id, .. }
            | Self::ModeDeniedPath { op_id, .. }
            | Self::MalformedRange { op_id, .. }
            | Self::MalformedOp { op_id, .. }
            | Self::NonReversible { op_id } => Some(op_id),
            Self::TooManyOps { .. }
            | Self::MalformedPlan { .. }
            | Self::ByteBudgetExceeded { .. } => None,
        }
    }
}

/// Applying an operation to the working tree failed. Triggers rollback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("op {op_id}: target '{path}' does not exist")]
    MissingTarget { op_id: String, path: String },

    #[error("op {op_id}: createFile target '{path}' already exists")]
    TargetExists { op_id: String, path: String },

    #[error("op {op_id}: {message} in '{path}'")]
    OutOfBounds {
        op_id: String,
        path: String,
        message: String,
    },

    #[error("op {op_id}: '{path}' resolves outside the repository root")]
    OutsideRoot { op_id: String, path: String },

    #[error("op {op_id}: {message} ('{path}')")]
    Io {
        op_id: String,
        path: String,
        message: String,
    },

    #[error("execution produced no changes")]
    NoChanges,
}

/// Coarse error category rendered by front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Guardrail,
    Execution,
    Verification,
    VersionControl,
    State,
    Config,
}

/// Any failure of an engine operation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("guardrail violation: {0}")]
    Guardrail(#[from] GuardrailViolation),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("verification failure: {0}")]
    Verification(String),

    #[error("version control error: {0}")]
    VersionControl(String),

    #[error("planner error: {0}")]
    Planner(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("no pending plan (run a plan first)")]
    NoPendingPlan,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Wrap a git failure, keeping the full context chain in the message.
    pub fn vcs(err: anyhow::Error) -> Self {
        Self::VersionControl(format!("{err:#}"))
    }

    pub fn config(err: anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }

    pub fn planner(err: anyhow::Error) -> Self {
        Self::Planner(format!("{err:#}"))
    }

    /// Wrap a failure reading or writing artifacts and records.
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Guardrail(_) => ErrorCategory::Guardrail,
            Self::Execution(_) => ErrorCategory::Execution,
            Self::Verification(_) => ErrorCategory::Verification,
            Self::VersionControl(_) => ErrorCategory::VersionControl,
            Self::Planner(_)
            | Self::Storage(_)
            | Self::NoPendingPlan
            | Self::InvalidState(_) => ErrorCategory::State,
            Self::Config(_) => ErrorCategory::Config,
        }
    }

    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            category: self.category(),
            message: self.to_string(),
        }
    }
}

/// Structured `{category, message}` pair for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub category: ErrorCategory,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guardrail_violation_names_op_and_rule() {
        let err = GuardrailViolation::UnsafePath {
            op_id: "op_1".to_string(),
            path: "../secrets.env".to_string(),
            reason: "path traversal".to_string(),
        };
        assert_eq!(err.rule(), "unsafe_path");
        assert_eq!(err.op_id(), Some("op_1"));
        assert!(err.to_string().contains("op_1"));
        assert!(err.to_string().contains("path traversal"));
    }

    #[test]
    fn report_serializes_category_in_snake_case() {
        let err = EngineError::vcs(anyhow::anyhow!("merge conflict"));
        let json = serde_json::to_value(err.to_report()).expect("serialize");
        assert_eq!(json["category"], "version_control");
        assert_eq!(json["message"], "version control error: merge conflict");
    }

    #[test]
    fn execution_errors_convert_with_category() {
        let err: EngineError = ExecutionError::NoChanges.into();
        assert_eq!(err.category(), ErrorCategory::Execution);
        assert_eq!(
            err.to_string(),
            "execution error: execution produced no changes"
        );
    }
}
