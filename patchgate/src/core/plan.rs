//! Plan data model and normalization of untrusted planner output.
//!
//! Planner output arrives as loosely-typed JSON. [`parse_plan`] checks it
//! against the bundled v1 schema, coerces optional fields to documented
//! defaults, and converts every operation into the closed [`OpKind`] enum.
//! Shape errors that the enum cannot represent (an `endLine` on an insert, or
//! content on a delete) are rejected here rather than silently dropped.

use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GuardrailViolation;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.v1.schema.json");

pub const DEFAULT_GOAL: &str = "noop";
pub const DEFAULT_RATIONALE: &str = "Planner returned no rationale.";

/// A proposed change set. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub meta: PlanMeta,
    pub scope: PlanScope,
    pub ops: Vec<Operation>,
    pub expected_effects: Vec<String>,
    pub verification: PlanVerification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMeta {
    pub goal: String,
    pub rationale: String,
    /// Always within `[0, 1]`. Informational only.
    pub confidence: f64,
    pub mode: String,
    /// Locked prefixes the plan asks to unlock.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unlock: Vec<String>,
}

/// Planner-declared scope. Not authoritative; never used for safety decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanScope {
    pub files: Vec<String>,
    pub total_ops: usize,
    pub estimated_bytes_changed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanVerification {
    pub steps: Vec<String>,
    pub success_criteria: Vec<String>,
}

/// One atomic file edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "RawOperation")]
pub struct Operation {
    pub id: String,
    /// Repository-relative path as given by the planner.
    pub file: String,
    pub kind: OpKind,
    pub reversible: bool,
    pub before_summary: String,
    pub after_summary: String,
}

/// Operation kinds with their payloads. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    CreateFile {
        content: String,
    },
    UpdateFile {
        content: String,
    },
    ReplaceRange {
        start_line: usize,
        end_line: usize,
        content: String,
    },
    InsertAfter {
        start_line: usize,
        content: String,
    },
    DeleteRange {
        start_line: usize,
        end_line: usize,
    },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateFile { .. } => "createFile",
            Self::UpdateFile { .. } => "updateFile",
            Self::ReplaceRange { .. } => "replaceRange",
            Self::InsertAfter { .. } => "insertAfter",
            Self::DeleteRange { .. } => "deleteRange",
        }
    }

    /// Text written by this operation (empty for deletes).
    pub fn content(&self) -> &str {
        match self {
            Self::CreateFile { content }
            | Self::UpdateFile { content }
            | Self::ReplaceRange { content, .. }
            | Self::InsertAfter { content, .. } => content,
            Self::DeleteRange { .. } => "",
        }
    }

    /// First addressed line; whole-file kinds report line 1.
    pub fn start_line(&self) -> usize {
        match self {
            Self::CreateFile { .. } | Self::UpdateFile { .. } => 1,
            Self::ReplaceRange { start_line, .. }
            | Self::InsertAfter { start_line, .. }
            | Self::DeleteRange { start_line, .. } => *start_line,
        }
    }

    pub fn end_line(&self) -> Option<usize> {
        match self {
            Self::ReplaceRange { end_line, .. } | Self::DeleteRange { end_line, .. } => {
                Some(*end_line)
            }
            Self::CreateFile { .. } | Self::UpdateFile { .. } | Self::InsertAfter { .. } => None,
        }
    }

    pub fn is_line_based(&self) -> bool {
        !matches!(self, Self::CreateFile { .. } | Self::UpdateFile { .. })
    }
}

impl Plan {
    /// Sum of UTF-8 bytes written across all operations.
    pub fn total_write_bytes(&self) -> usize {
        self.ops.iter().map(|op| op.kind.content().len()).sum()
    }

    /// Distinct target files in operation order.
    pub fn op_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for op in &self.ops {
            if !files.contains(&op.file) {
                files.push(op.file.clone());
            }
        }
        files
    }
}

/// Wire representation of an operation (camelCase JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOperation {
    #[serde(default)]
    pub id: Option<String>,
    pub file: String,
    #[serde(rename = "type")]
    pub kind: RawOpType,
    #[serde(default)]
    pub start_line: Option<i64>,
    #[serde(default)]
    pub end_line: Option<i64>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reversible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RawOpType {
    CreateFile,
    UpdateFile,
    ReplaceRange,
    InsertAfter,
    DeleteRange,
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        let (kind, start_line, end_line, content) = match op.kind {
            OpKind::CreateFile { content } => (RawOpType::CreateFile, 1, None, content),
            OpKind::UpdateFile { content } => (RawOpType::UpdateFile, 1, None, content),
            OpKind::ReplaceRange {
                start_line,
                end_line,
                content,
            } => (
                RawOpType::ReplaceRange,
                start_line,
                Some(end_line),
                content,
            ),
            OpKind::InsertAfter {
                start_line,
                content,
            } => (RawOpType::InsertAfter, start_line, None, content),
            OpKind::DeleteRange {
                start_line,
                end_line,
            } => (
                RawOpType::DeleteRange,
                start_line,
                Some(end_line),
                String::new(),
            ),
        };
        Self {
            id: Some(op.id),
            file: op.file,
            kind,
            start_line: Some(to_i64(start_line)),
            end_line: end_line.map(to_i64),
            content: Some(content),
            reversible: Some(op.reversible),
            before_summary: non_empty(op.before_summary),
            after_summary: non_empty(op.after_summary),
        }
    }
}

impl RawOperation {
    /// Convert into the strict model. `index` is the 0-based position in `ops`.
    pub fn into_operation(self, index: usize) -> Result<Operation, GuardrailViolation> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("op_{}", index + 1));
        let malformed = |message: String| GuardrailViolation::MalformedOp {
            op_id: id.clone(),
            message,
        };

        let start_line = match self.start_line {
            None => 1,
            Some(n) if n < 0 => return Err(malformed(format!("negative startLine {n}"))),
            Some(n) => usize::try_from(n).map_err(|_| malformed(format!("startLine {n}")))?,
        };
        let end_line = match self.end_line {
            None => None,
            Some(n) if n < 0 => return Err(malformed(format!("negative endLine {n}"))),
            Some(n) => {
                Some(usize::try_from(n).map_err(|_| malformed(format!("endLine {n}")))?)
            }
        };
        let content = self.content.unwrap_or_default();

        let kind = match (self.kind, end_line) {
            (RawOpType::CreateFile, None) => OpKind::CreateFile { content },
            (RawOpType::UpdateFile, None) => OpKind::UpdateFile { content },
            (RawOpType::InsertAfter, None) => OpKind::InsertAfter {
                start_line,
                content,
            },
            (RawOpType::CreateFile | RawOpType::UpdateFile | RawOpType::InsertAfter, Some(_)) => {
                return Err(malformed(format!(
                    "{} must have endLine = null",
                    raw_type_name(self.kind)
                )));
            }
            (RawOpType::ReplaceRange, Some(end_line)) => OpKind::ReplaceRange {
                start_line,
                end_line,
                content,
            },
            (RawOpType::DeleteRange, Some(end_line)) => {
                if !content.is_empty() {
                    return Err(malformed("deleteRange content must be empty".to_string()));
                }
                OpKind::DeleteRange {
                    start_line,
                    end_line,
                }
            }
            (RawOpType::ReplaceRange | RawOpType::DeleteRange, None) => {
                return Err(malformed(format!(
                    "{} requires endLine",
                    raw_type_name(self.kind)
                )));
            }
        };

        Ok(Operation {
            id,
            file: self.file,
            kind,
            // Only an explicit `false` disqualifies an operation.
            reversible: self.reversible.unwrap_or(true),
            before_summary: self.before_summary.unwrap_or_default(),
            after_summary: self.after_summary.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawPlan {
    meta: RawMeta,
    scope: RawScope,
    ops: Vec<RawOperation>,
    expected_effects: Vec<String>,
    verification: RawVerification,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawMeta {
    goal: Option<String>,
    rationale: Option<String>,
    confidence: Option<Value>,
    mode: Option<String>,
    unlock: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawScope {
    files: Vec<String>,
    total_ops: Option<u64>,
    estimated_bytes_changed: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawVerification {
    steps: Vec<String>,
    success_criteria: Vec<String>,
}

/// Parse untrusted planner JSON into a strict [`Plan`].
///
/// `default_mode` is used when the planner omits `meta.mode`.
pub fn parse_plan(value: &Value, default_mode: &str) -> Result<Plan, GuardrailViolation> {
    validate_plan_schema(value)?;
    let raw: RawPlan =
        serde_json::from_value(value.clone()).map_err(|err| GuardrailViolation::MalformedPlan {
            message: err.to_string(),
        })?;

    let ops = raw
        .ops
        .into_iter()
        .enumerate()
        .map(|(index, op)| op.into_operation(index))
        .collect::<Result<Vec<_>, _>>()?;

    let mode = raw
        .meta
        .mode
        .map(|mode| mode.trim().to_string())
        .filter(|mode| !mode.is_empty())
        .unwrap_or_else(|| default_mode.to_string());

    let mut plan = Plan {
        meta: PlanMeta {
            goal: non_blank_or(raw.meta.goal, DEFAULT_GOAL),
            rationale: non_blank_or(raw.meta.rationale, DEFAULT_RATIONALE),
            confidence: parse_confidence(raw.meta.confidence.as_ref()),
            mode,
            unlock: raw.meta.unlock,
        },
        scope: PlanScope {
            files: clean_strings(raw.scope.files),
            total_ops: raw
                .scope
                .total_ops
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
            estimated_bytes_changed: raw.scope.estimated_bytes_changed.unwrap_or(0),
        },
        ops,
        expected_effects: clean_strings(raw.expected_effects),
        verification: PlanVerification {
            steps: clean_strings(raw.verification.steps),
            success_criteria: clean_strings(raw.verification.success_criteria),
        },
    };

    if plan.scope.total_ops == 0 {
        plan.scope.total_ops = plan.ops.len();
    }
    if plan.scope.files.is_empty() && !plan.ops.is_empty() {
        plan.scope.files = plan.op_files();
    }
    Ok(plan)
}

/// Force `meta.mode` to `mode`, whatever the planner wrote.
///
/// Non-object input is left alone so schema validation reports it.
pub fn stamp_mode(raw: &mut Value, mode: &str) {
    let Some(obj) = raw.as_object_mut() else {
        return;
    };
    let meta = obj
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("mode".to_string(), Value::String(mode.to_string()));
    }
}

/// Validate planner JSON against the bundled schema (Draft 2020-12).
fn validate_plan_schema(instance: &Value) -> Result<(), GuardrailViolation> {
    let schema: Value =
        serde_json::from_str(PLAN_SCHEMA).map_err(|err| GuardrailViolation::MalformedPlan {
            message: format!("bundled plan schema is invalid: {err}"),
        })?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| GuardrailViolation::MalformedPlan {
            message: format!("compile plan schema: {err}"),
        })?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(GuardrailViolation::MalformedPlan {
            message: format!("schema validation failed: {}", messages.join("; ")),
        });
    }
    Ok(())
}

fn parse_confidence(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

fn non_blank_or(value: Option<String>, fallback: &str) -> String {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn clean_strings(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn raw_type_name(kind: RawOpType) -> &'static str {
    match kind {
        RawOpType::CreateFile => "createFile",
        RawOpType::UpdateFile => "updateFile",
        RawOpType::ReplaceRange => "replaceRange",
        RawOpType::InsertAfter => "insertAfter",
        RawOpType::DeleteRange => "deleteRange",
    }
}
