//! Branch lifecycle manager.
//!
//! An [`Engine`] owns one repository root. It holds at most one pending plan,
//! isolates each approved plan on its own branch, rolls back failed
//! applications, and gates merges on the persisted verification record.
//!
//! ```text
//! Idle -> Planned -> Branched -> Applied -> Committed
//!      -> {VerifiedOk | VerifiedFailed | Unverified} -> MergePending
//!      -> {Merged | CleanedUp}
//! ```
//!
//! `RolledBack` is reachable from `Branched`, `Applied` and `Committed`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::guardrail::validate;
use crate::core::lifecycle::LifecycleState;
use crate::core::naming::{branch_for_plan, is_engine_branch, plan_id_at};
use crate::core::plan::{Plan, parse_plan, stamp_mode};
use crate::error::{EngineError, ExecutionError};
use crate::io::artifacts::ArtifactStore;
use crate::io::config::EngineConfig;
use crate::io::context::collect_previews;
use crate::io::git::{FileChange, VersionControl, truncate_diff};
use crate::io::patch::{apply_all, planned_new_files};
use crate::io::planner::{Planner, PlannerInput, RepoContext};
use crate::io::records::{BranchRecord, RecordStore, VerificationRecord, now_rfc3339};
use crate::io::verify::{CommandRunner, Verifier};

/// Attempts at finding an unused branch name for a new plan id.
const MAX_PLAN_ID_SUFFIX: u32 = 1_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub plan_id: String,
    pub plan: Plan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutcome {
    pub plan_id: String,
    pub branch: String,
    pub commit: String,
    pub files_changed: Vec<FileChange>,
    /// Unified diff against the base commit, possibly truncated.
    pub diff: String,
    pub diff_path: PathBuf,
    pub verification: Option<VerificationRecord>,
    /// State after verification, before returning to the original branch.
    pub verification_state: LifecycleState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: LifecycleState,
    pub pending_plan_id: Option<String>,
    pub pending_plan: Option<Plan>,
    pub current_branch: Option<String>,
    pub head: Option<String>,
    pub last_branch: Option<BranchRecord>,
    pub last_verification: Option<VerificationRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub merged_branch: String,
    pub trunk: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOutcome {
    pub deleted_branches: Vec<String>,
}

#[derive(Debug, Clone)]
struct PendingPlan {
    id: String,
    plan: Plan,
}

/// Where the tree stood before a plan branch was cut.
struct Checkpoint {
    base_ref: String,
    original_branch: String,
    branch: String,
    new_files: Vec<PathBuf>,
}

pub struct Engine<V: VersionControl, R: CommandRunner, P: Planner> {
    repo_root: PathBuf,
    config: EngineConfig,
    vcs: V,
    runner: R,
    planner: P,
    artifacts: ArtifactStore,
    records: RecordStore,
    state: LifecycleState,
    pending: Option<PendingPlan>,
}

impl<V: VersionControl, R: CommandRunner, P: Planner> Engine<V, R, P> {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        config: EngineConfig,
        vcs: V,
        runner: R,
        planner: P,
    ) -> Self {
        let repo_root = repo_root.into();
        let artifacts_dir = config.artifacts_path(&repo_root);
        Self {
            repo_root,
            config,
            vcs,
            runner,
            planner,
            artifacts: ArtifactStore::new(&artifacts_dir),
            records: RecordStore::new(artifacts_dir),
            state: LifecycleState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn pending_plan_id(&self) -> Option<&str> {
        self.pending.as_ref().map(|pending| pending.id.as_str())
    }

    /// Ask the planner for a plan and make it the pending plan.
    #[instrument(skip_all, fields(mode = %mode))]
    pub fn run(&mut self, mode: &str, reason: Option<&str>) -> Result<RunOutcome, EngineError> {
        let head_ref = self.vcs.head_ref().map_err(EngineError::vcs)?;
        let branch = self.vcs.current_branch().map_err(EngineError::vcs)?;
        let files_preview = collect_previews(&self.repo_root, &self.config.planner)
            .map_err(|err| EngineError::planner(err.context("collect file previews")))?;
        let input = PlannerInput {
            repo: RepoContext {
                root: self.repo_root.clone(),
                head_ref,
                branch,
            },
            scope: files_preview
                .iter()
                .map(|preview| preview.path.clone())
                .collect(),
            mode: mode.to_string(),
            reason: reason.map(str::to_string),
            files_preview,
        };

        let mut raw = self.planner.plan(&input).map_err(EngineError::planner)?;
        stamp_mode(&mut raw, mode);
        let plan = parse_plan(&raw, mode)?;
        let plan_id = self.accept(plan.clone())?;
        Ok(RunOutcome { plan_id, plan })
    }

    /// Normalize raw plan JSON and accept it.
    pub fn accept_json(&mut self, raw: &Value, default_mode: &str) -> Result<String, EngineError> {
        let plan = parse_plan(raw, default_mode)?;
        self.accept(plan)
    }

    /// Validate `plan` and store it as the pending plan, replacing any other.
    #[instrument(skip_all, fields(ops = plan.ops.len(), mode = %plan.meta.mode))]
    pub fn accept(&mut self, plan: Plan) -> Result<String, EngineError> {
        validate(&plan, &self.config.guardrails)?;
        let id = self.fresh_plan_id()?;
        if let Some(previous) = &self.pending {
            info!(replaced = %previous.id, "replacing pending plan");
        }
        self.advance(LifecycleState::Planned)?;
        info!(plan_id = %id, "plan accepted");
        self.pending = Some(PendingPlan {
            id: id.clone(),
            plan,
        });
        Ok(id)
    }

    /// Execute the pending plan on a fresh branch.
    ///
    /// Any failure before the outcome is recorded rolls the repository back
    /// to where it started, commit included. On success the branch is kept
    /// and the original branch is checked out again.
    #[instrument(skip_all)]
    pub fn approve_and_execute(&mut self) -> Result<ExecuteOutcome, EngineError> {
        let PendingPlan { id, plan } = self.pending.clone().ok_or(EngineError::NoPendingPlan)?;

        self.artifacts.ensure_dir().map_err(EngineError::storage)?;
        self.vcs.ensure_clean().map_err(EngineError::vcs)?;
        let base_ref = self.vcs.head_ref().map_err(EngineError::vcs)?;
        let original_branch = self.vcs.current_branch().map_err(EngineError::vcs)?;
        self.artifacts
            .write_plan(&id, &plan)
            .map_err(EngineError::storage)?;

        let branch = branch_for_plan(&self.config.branch_prefix, &id);
        self.vcs
            .checkout_new_branch(&branch)
            .map_err(EngineError::vcs)?;
        self.advance(LifecycleState::Branched)?;
        info!(plan_id = %id, branch = %branch, "plan branch created");

        let checkpoint = Checkpoint {
            base_ref,
            original_branch,
            branch,
            new_files: planned_new_files(&plan.ops, &self.repo_root),
        };

        let commit = match self.apply_and_commit(&plan, &id) {
            Ok(commit) => commit,
            Err(err) => {
                warn!(plan_id = %id, err = %err, "execution failed, rolling back");
                self.rollback(&checkpoint);
                return Err(err);
            }
        };

        let outcome = match self.finish_execution(&plan, &id, &checkpoint, commit) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(plan_id = %id, err = %err, "recording execution failed, rolling back");
                self.rollback(&checkpoint);
                self.forget_records_for(&checkpoint.branch);
                return Err(err);
            }
        };
        self.pending = None;
        self.vcs
            .checkout(&checkpoint.original_branch)
            .map_err(EngineError::vcs)?;
        self.advance(LifecycleState::MergePending)?;
        info!(plan_id = %id, branch = %outcome.branch, "plan awaiting merge");
        Ok(outcome)
    }

    /// Current state, pending plan and persisted records.
    pub fn status(&self) -> Result<StatusReport, EngineError> {
        Ok(StatusReport {
            state: self.state,
            pending_plan_id: self.pending.as_ref().map(|pending| pending.id.clone()),
            pending_plan: self.pending.as_ref().map(|pending| pending.plan.clone()),
            current_branch: self.vcs.current_branch().ok(),
            head: self.vcs.head_ref().ok(),
            last_branch: self.records.load_branch().map_err(EngineError::storage)?,
            last_verification: self
                .records
                .load_verification()
                .map_err(EngineError::storage)?,
        })
    }

    /// Merge the last executed branch into trunk with `--no-ff`.
    #[instrument(skip_all)]
    pub fn merge(&mut self) -> Result<MergeOutcome, EngineError> {
        let record = self
            .records
            .load_branch()
            .map_err(EngineError::storage)?
            .ok_or_else(|| {
                EngineError::InvalidState("no branch awaiting merge (apply a plan first)".into())
            })?;

        if self.config.requires_verification(&record.mode) {
            let verification = self
                .records
                .load_verification()
                .map_err(EngineError::storage)?;
            check_merge_gate(&record, verification.as_ref())?;
        }

        self.vcs.ensure_clean().map_err(EngineError::vcs)?;
        if !self
            .vcs
            .branch_exists(&record.branch_name)
            .map_err(EngineError::vcs)?
        {
            return Err(EngineError::VersionControl(format!(
                "branch '{}' no longer exists",
                record.branch_name
            )));
        }

        let trunk = self.config.trunk_branch.clone();
        self.vcs.checkout(&trunk).map_err(EngineError::vcs)?;
        if let Err(err) = self.vcs.merge_no_ff(&record.branch_name) {
            warn!(branch = %record.branch_name, "merge failed, aborting");
            if let Err(abort_err) = self.vcs.merge_abort() {
                warn!(err = %format!("{abort_err:#}"), "merge --abort failed");
            }
            return Err(EngineError::vcs(err.context(format!(
                "merge {} into {trunk}",
                record.branch_name
            ))));
        }

        self.records.clear_all().map_err(EngineError::storage)?;
        if self.pending.is_none() {
            self.advance(LifecycleState::Merged)?;
        }
        info!(branch = %record.branch_name, trunk = %trunk, "merged");
        Ok(MergeOutcome {
            merged_branch: record.branch_name,
            trunk,
        })
    }

    /// Delete every engine branch and forget all plan state.
    #[instrument(skip_all)]
    pub fn cleanup(&mut self) -> Result<CleanupOutcome, EngineError> {
        self.vcs.ensure_clean().map_err(EngineError::vcs)?;
        let prefix = self.config.branch_prefix.clone();
        let trunk = self.config.trunk_branch.clone();

        let current = self.vcs.current_branch().map_err(EngineError::vcs)?;
        if is_engine_branch(&prefix, &current) {
            self.vcs.checkout(&trunk).map_err(EngineError::vcs)?;
        }

        let mut deleted_branches = Vec::new();
        for branch in self.vcs.list_local_branches().map_err(EngineError::vcs)? {
            if branch == trunk || !is_engine_branch(&prefix, &branch) {
                continue;
            }
            self.vcs
                .delete_branch_force(&branch)
                .map_err(EngineError::vcs)?;
            deleted_branches.push(branch);
        }

        self.records.clear_all().map_err(EngineError::storage)?;
        self.pending = None;
        self.advance(LifecycleState::CleanedUp)?;
        info!(deleted = deleted_branches.len(), "cleanup complete");
        Ok(CleanupOutcome { deleted_branches })
    }

    fn apply_and_commit(&mut self, plan: &Plan, plan_id: &str) -> Result<String, EngineError> {
        validate(plan, &self.config.guardrails)?;
        apply_all(&plan.ops, &self.repo_root)?;
        self.advance(LifecycleState::Applied)?;

        if self.vcs.is_clean().map_err(EngineError::vcs)? {
            return Err(ExecutionError::NoChanges.into());
        }

        let message = render_commit_message(&self.config.commit_message_template, plan, plan_id)?;
        let commit = self.vcs.commit_all(&message).map_err(EngineError::vcs)?;
        self.advance(LifecycleState::Committed)?;
        info!(plan_id, commit = %commit, "committed plan");
        Ok(commit)
    }

    fn finish_execution(
        &mut self,
        plan: &Plan,
        plan_id: &str,
        checkpoint: &Checkpoint,
        commit: String,
    ) -> Result<ExecuteOutcome, EngineError> {
        let files_changed = self
            .vcs
            .diff_name_status(&checkpoint.base_ref, &commit)
            .map_err(EngineError::vcs)?;
        let full_diff = self
            .vcs
            .diff_unified(&checkpoint.base_ref, &commit)
            .map_err(EngineError::vcs)?;
        let diff_path = self
            .artifacts
            .write_diff(plan_id, &full_diff)
            .map_err(EngineError::storage)?;
        let diff = truncate_diff(&full_diff, self.config.diff_max_chars);

        self.records
            .write_branch(&BranchRecord {
                branch_name: checkpoint.branch.clone(),
                plan_id: plan_id.to_string(),
                base_ref: checkpoint.base_ref.clone(),
                mode: plan.meta.mode.clone(),
                created_at: now_rfc3339(),
            })
            .map_err(EngineError::storage)?;

        let verification = if self.config.requires_verification(&plan.meta.mode) {
            let verifier = Verifier {
                runner: &self.runner,
                config: &self.config.verification,
                artifacts: &self.artifacts,
                repo_root: &self.repo_root,
            };
            let record = verifier
                .verify(
                    &self.config.verification.default_command,
                    &checkpoint.branch,
                    plan_id,
                )
                .map_err(EngineError::storage)?;
            self.records
                .write_verification(&record)
                .map_err(EngineError::storage)?;
            self.advance(if record.ok {
                LifecycleState::VerifiedOk
            } else {
                LifecycleState::VerifiedFailed
            })?;
            Some(record)
        } else {
            self.records
                .clear_verification()
                .map_err(EngineError::storage)?;
            self.advance(LifecycleState::Unverified)?;
            None
        };

        Ok(ExecuteOutcome {
            plan_id: plan_id.to_string(),
            branch: checkpoint.branch.clone(),
            commit,
            files_changed,
            diff,
            diff_path,
            verification,
            verification_state: self.state,
        })
    }

    /// Restore the pre-execution tree. Every step is attempted even if an
    /// earlier one fails.
    fn rollback(&mut self, checkpoint: &Checkpoint) {
        if let Err(err) = self.vcs.reset_hard(&checkpoint.base_ref) {
            warn!(err = %format!("{err:#}"), "rollback: reset failed");
        }
        for path in &checkpoint.new_files {
            remove_created_file(path, &self.repo_root);
        }
        if let Err(err) = self.vcs.checkout(&checkpoint.original_branch) {
            warn!(err = %format!("{err:#}"), "rollback: checkout failed");
        }
        if let Err(err) = self.vcs.reset_hard(&checkpoint.base_ref) {
            warn!(err = %format!("{err:#}"), "rollback: reset of original branch failed");
        }
        if let Err(err) = self.vcs.delete_branch_force(&checkpoint.branch) {
            warn!(err = %format!("{err:#}"), "rollback: branch delete failed");
        }
        self.pending = None;
        self.state = LifecycleState::RolledBack;
        info!(branch = %checkpoint.branch, "rolled back");
    }

    /// Drop the persisted records if they describe `branch`. Records of an
    /// earlier branch still awaiting merge are left alone.
    fn forget_records_for(&self, branch: &str) {
        match self.records.load_branch() {
            Ok(Some(record)) if record.branch_name == branch => {
                if let Err(err) = self.records.clear_all() {
                    warn!(err = %format!("{err:#}"), "rollback: clearing records failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "rollback: reading branch record failed"),
        }
    }

    fn advance(&mut self, next: LifecycleState) -> Result<(), EngineError> {
        if !self.state.can_advance_to(next) {
            return Err(EngineError::InvalidState(format!(
                "cannot move from {:?} to {next:?}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// `plan_<millis>`, suffixed `-2`, `-3`, ... while the branch name is taken.
    fn fresh_plan_id(&self) -> Result<String, EngineError> {
        let base = plan_id_at(Utc::now());
        for n in 1..=MAX_PLAN_ID_SUFFIX {
            let candidate = if n == 1 {
                base.clone()
            } else {
                format!("{base}-{n}")
            };
            let branch = branch_for_plan(&self.config.branch_prefix, &candidate);
            if !self.vcs.branch_exists(&branch).map_err(EngineError::vcs)? {
                return Ok(candidate);
            }
        }
        Err(EngineError::InvalidState(format!(
            "no free branch name for plan id {base}"
        )))
    }
}

/// Reject a merge unless the verification record passed for this branch.
fn check_merge_gate(
    branch: &BranchRecord,
    verification: Option<&VerificationRecord>,
) -> Result<(), EngineError> {
    let Some(verification) = verification else {
        return Err(EngineError::Verification(format!(
            "mode '{}' requires verification but no record exists for '{}'",
            branch.mode, branch.branch_name
        )));
    };
    if verification.branch_name != branch.branch_name {
        return Err(EngineError::Verification(format!(
            "verification record is for '{}', not '{}'",
            verification.branch_name, branch.branch_name
        )));
    }
    if !verification.ok {
        return Err(EngineError::Verification(format!(
            "verification failed for '{}' (command '{}', exit code {})",
            branch.branch_name,
            verification.command,
            verification
                .exit_code
                .map_or_else(|| "none".to_string(), |code| code.to_string())
        )));
    }
    Ok(())
}

fn render_commit_message(template: &str, plan: &Plan, plan_id: &str) -> Result<String, EngineError> {
    let env = Environment::new();
    let rendered = env
        .render_str(
            template,
            context! {
                goal => plan.meta.goal.as_str(),
                plan_id => plan_id,
                mode => plan.meta.mode.as_str(),
            },
        )
        .map_err(|err| EngineError::Config(format!("render commit_message_template: {err}")))?;
    let message = rendered.trim();
    if message.is_empty() {
        return Err(EngineError::Config(
            "commit_message_template rendered an empty message".to_string(),
        ));
    }
    Ok(message.to_string())
}

/// Remove a file created during a failed execution, then any directories
/// that became empty, stopping at `root`.
fn remove_created_file(path: &Path, root: &Path) {
    if fs::symlink_metadata(path).is_err() {
        return;
    }
    if let Err(err) = fs::remove_file(path) {
        warn!(path = %path.display(), err = %err, "rollback: could not remove created file");
        return;
    }
    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) || fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}
