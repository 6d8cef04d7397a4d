//! Stable exit codes for `patchgate` CLI commands.

use crate::error::ErrorCategory;

/// Command succeeded.
pub const OK: i32 = 0;
/// Config, state or other generic failure.
pub const GENERIC: i32 = 1;
/// The plan was rejected before anything was touched.
pub const GUARDRAIL: i32 = 2;
/// Applying the plan failed and the repository was rolled back.
pub const EXECUTION: i32 = 3;
/// The merge gate refused a branch without a passing verification record.
pub const VERIFICATION: i32 = 4;
/// A git operation failed (dirty tree, conflict, missing branch).
pub const VERSION_CONTROL: i32 = 5;

pub fn for_category(category: ErrorCategory) -> i32 {
    match category {
        ErrorCategory::Guardrail => GUARDRAIL,
        ErrorCategory::Execution => EXECUTION,
        ErrorCategory::Verification => VERIFICATION,
        ErrorCategory::VersionControl => VERSION_CONTROL,
        ErrorCategory::State | ErrorCategory::Config => GENERIC,
    }
}
