//! End-to-end engine tests against real git repositories.
//!
//! Each test drives an [`Engine`](patchgate::engine::Engine) through
//! accept → execute → merge/cleanup and checks both the returned outcomes
//! and what actually landed in git.

use anyhow::{Result, anyhow};
use patchgate::core::lifecycle::LifecycleState;
use patchgate::engine::Engine;
use patchgate::error::{EngineError, ExecutionError, GuardrailViolation};
use patchgate::io::config::DEFAULT_ARTIFACTS_DIR;
use patchgate::io::git::{FileChange, Git, StatusEntry, VersionControl};
use patchgate::io::planner::StubPlanner;
use patchgate::io::records::RecordStore;
use patchgate::test_support::{
    ScriptedRunner, TestRepo, create_op, insert_op, plan_json, replace_op, update_op,
};

fn records(repo: &TestRepo) -> RecordStore {
    RecordStore::new(repo.path().join(DEFAULT_ARTIFACTS_DIR))
}

/// Real git, except that diffing always fails.
struct DiffUnavailable(Git);

impl VersionControl for DiffUnavailable {
    fn head_ref(&self) -> Result<String> {
        self.0.head_ref()
    }
    fn current_branch(&self) -> Result<String> {
        self.0.current_branch()
    }
    fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        self.0.checkout_new_branch(branch)
    }
    fn checkout(&self, branch: &str) -> Result<()> {
        self.0.checkout(branch)
    }
    fn commit_all(&self, message: &str) -> Result<String> {
        self.0.commit_all(message)
    }
    fn diff_name_status(&self, _base: &str, _head: &str) -> Result<Vec<FileChange>> {
        Err(anyhow!("diff unavailable"))
    }
    fn diff_unified(&self, _base: &str, _head: &str) -> Result<String> {
        Err(anyhow!("diff unavailable"))
    }
    fn reset_hard(&self, rev: &str) -> Result<()> {
        self.0.reset_hard(rev)
    }
    fn delete_branch_force(&self, branch: &str) -> Result<()> {
        self.0.delete_branch_force(branch)
    }
    fn merge_no_ff(&self, branch: &str) -> Result<()> {
        self.0.merge_no_ff(branch)
    }
    fn merge_abort(&self) -> Result<()> {
        self.0.merge_abort()
    }
    fn list_local_branches(&self) -> Result<Vec<String>> {
        self.0.list_local_branches()
    }
    fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.0.branch_exists(branch)
    }
    fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        self.0.status_porcelain()
    }
}

/// Scenario A: a single `createFile` lands on its own branch and nowhere else.
#[test]
fn create_file_commits_on_isolated_branch() {
    let repo = TestRepo::new().expect("repo");
    let base = repo.head().expect("head");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));

    let plan_id = engine
        .accept_json(&plan_json("default", vec![create_op("notes.md", "hello\n")]), "default")
        .expect("accept");
    assert_eq!(engine.state(), LifecycleState::Planned);

    let outcome = engine.approve_and_execute().expect("execute");
    assert_eq!(outcome.plan_id, plan_id);
    assert_eq!(outcome.branch, format!("agent/{plan_id}"));
    assert!(outcome.branch.starts_with("agent/plan_"));
    assert_eq!(outcome.files_changed.len(), 1);
    assert_eq!(outcome.files_changed[0].status, "A");
    assert_eq!(outcome.files_changed[0].path, "notes.md");
    assert!(outcome.diff.contains("+hello"));
    assert!(outcome.diff_path.exists());
    assert!(outcome.verification.is_none());
    assert_eq!(outcome.verification_state, LifecycleState::Unverified);
    assert_eq!(engine.state(), LifecycleState::MergePending);
    assert!(engine.pending_plan_id().is_none());

    // Back on trunk, untouched; the branch carries the commit.
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert_eq!(repo.head().expect("head"), base);
    assert!(!repo.path().join("notes.md").exists());
    assert_eq!(
        repo.git(&["show", &format!("{}:notes.md", outcome.branch)])
            .expect("show"),
        "hello"
    );
    assert_eq!(
        repo.git(&["log", "-1", "--format=%s", &outcome.branch])
            .expect("log"),
        format!("agent: test change ({plan_id})")
    );
    assert!(repo.git(&["status", "--porcelain"]).expect("status").is_empty());
}

/// Scenario B: `replaceRange` rewrites exactly the addressed line.
#[test]
fn replace_range_rewrites_middle_line() {
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("a.txt", "A\nX\nC\n").expect("seed");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));

    engine
        .accept_json(&plan_json("default", vec![replace_op("a.txt", 2, 2, "B\n")]), "default")
        .expect("accept");
    let outcome = engine.approve_and_execute().expect("execute");

    assert_eq!(outcome.files_changed[0].status, "M");
    assert_eq!(
        repo.git(&["show", &format!("{}:a.txt", outcome.branch)])
            .expect("show"),
        "A\nB\nC"
    );
    assert_eq!(repo.read_file("a.txt").expect("read"), "A\nX\nC\n");
}

/// Scenario C: traversal is refused before anything is touched.
#[test]
fn traversal_plan_is_rejected_up_front() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));

    let err = engine
        .accept_json(
            &plan_json("default", vec![create_op("../secrets.env", "TOKEN=1\n")]),
            "default",
        )
        .expect_err("unsafe path");
    match err {
        EngineError::Guardrail(GuardrailViolation::UnsafePath { reason, .. }) => {
            assert!(reason.contains("traversal"), "reason: {reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(engine.state(), LifecycleState::Idle);
    assert!(matches!(
        engine.approve_and_execute(),
        Err(EngineError::NoPendingPlan)
    ));
    assert_eq!(repo.branches().expect("branches"), vec!["main"]);
    assert!(!repo.path().join("../secrets.env").exists());
}

/// Scenario D: a failed verification is recorded and blocks the merge.
#[test]
fn failed_verification_blocks_merge() {
    let repo = TestRepo::new().expect("repo");
    let trunk = repo.head().expect("head");
    let mut engine = repo.engine(ScriptedRunner::exiting(1));

    engine
        .accept_json(&plan_json("self_improve", vec![create_op("notes.md", "x\n")]), "default")
        .expect("accept");
    let outcome = engine.approve_and_execute().expect("execute");

    let verification = outcome.verification.expect("verification ran");
    assert!(!verification.ok);
    assert_eq!(verification.exit_code, Some(1));
    assert_eq!(verification.branch_name, outcome.branch);
    assert_eq!(verification.log_paths.len(), 2);
    assert!(verification.log_paths.iter().all(|path| path.exists()));
    assert_eq!(outcome.verification_state, LifecycleState::VerifiedFailed);
    assert_eq!(engine.runner().calls(), vec!["check"]);

    let err = engine.merge().expect_err("gate");
    assert!(matches!(err, EngineError::Verification(_)), "{err}");
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert_eq!(repo.head().expect("head"), trunk);
    assert!(records(&repo).load_branch().expect("load").is_some());
}

#[test]
fn passing_verification_allows_merge() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));

    engine
        .accept_json(&plan_json("self_improve", vec![create_op("notes.md", "x\n")]), "default")
        .expect("accept");
    let outcome = engine.approve_and_execute().expect("execute");
    assert_eq!(outcome.verification_state, LifecycleState::VerifiedOk);

    let merged = engine.merge().expect("merge");
    assert_eq!(merged.merged_branch, outcome.branch);
    assert_eq!(merged.trunk, "main");
    assert_eq!(engine.state(), LifecycleState::Merged);
    assert_eq!(repo.read_file("notes.md").expect("read"), "x\n");
    // --no-ff leaves a merge commit with two parents.
    let parents = repo.git(&["rev-list", "--parents", "-n", "1", "HEAD"]).expect("parents");
    assert_eq!(parents.split_whitespace().count(), 3);

    let store = records(&repo);
    assert!(store.load_branch().expect("load").is_none());
    assert!(store.load_verification().expect("load").is_none());
}

#[test]
fn merge_rejects_verification_for_another_branch() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    engine
        .accept_json(&plan_json("self_improve", vec![create_op("notes.md", "x\n")]), "default")
        .expect("accept");
    engine.approve_and_execute().expect("execute");

    let store = records(&repo);
    let mut stale = store.load_verification().expect("load").expect("record");
    stale.branch_name = "agent/plan_0".to_string();
    store.write_verification(&stale).expect("write");

    let err = engine.merge().expect_err("stale record");
    assert!(matches!(err, EngineError::Verification(_)));
}

#[test]
fn merge_without_verification_record_fails_in_gated_mode() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    engine
        .accept_json(&plan_json("self_improve", vec![create_op("notes.md", "x\n")]), "default")
        .expect("accept");
    engine.approve_and_execute().expect("execute");
    records(&repo).clear_verification().expect("clear");

    assert!(matches!(engine.merge(), Err(EngineError::Verification(_))));
}

#[test]
fn merge_without_branch_record_is_invalid_state() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    assert!(matches!(engine.merge(), Err(EngineError::InvalidState(_))));
}

#[test]
fn ungated_mode_merges_without_verification() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(1));
    engine
        .accept_json(&plan_json("default", vec![create_op("notes.md", "x\n")]), "default")
        .expect("accept");
    engine.approve_and_execute().expect("execute");

    engine.merge().expect("merge");
    assert!(engine.runner().calls().is_empty());
    assert_eq!(repo.read_file("notes.md").expect("read"), "x\n");
}

#[test]
fn failure_after_commit_rolls_back_branch_and_commit() {
    let repo = TestRepo::new().expect("repo");
    let head = repo.head().expect("head");
    let mut engine = Engine::new(
        repo.path(),
        repo.config(),
        DiffUnavailable(Git::new(repo.path())),
        ScriptedRunner::exiting(0),
        StubPlanner::default(),
    );
    engine
        .accept_json(&plan_json("default", vec![create_op("notes.md", "x\n")]), "default")
        .expect("accept");

    let err = engine.approve_and_execute().expect_err("diff fails");
    assert!(matches!(err, EngineError::VersionControl(_)), "{err}");
    assert_eq!(engine.state(), LifecycleState::RolledBack);
    assert!(engine.pending_plan_id().is_none());
    assert_eq!(repo.branches().expect("branches"), vec!["main"]);
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert_eq!(repo.head().expect("head"), head);
    assert!(!repo.path().join("notes.md").exists());
    assert!(repo.git(&["status", "--porcelain"]).expect("status").is_empty());
    assert!(records(&repo).load_branch().expect("load").is_none());
}

#[test]
fn plan_accepted_before_merge_still_executes() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    engine
        .accept_json(&plan_json("default", vec![create_op("first.md", "1\n")]), "default")
        .expect("accept first");
    let first = engine.approve_and_execute().expect("execute first");

    let second_id = engine
        .accept_json(&plan_json("default", vec![create_op("second.md", "2\n")]), "default")
        .expect("accept second");
    engine.merge().expect("merge first");
    assert_eq!(engine.state(), LifecycleState::Planned);
    assert_eq!(engine.pending_plan_id(), Some(second_id.as_str()));
    assert_eq!(repo.read_file("first.md").expect("read"), "1\n");

    let second = engine.approve_and_execute().expect("execute second");
    assert_eq!(second.plan_id, second_id);
    assert_ne!(second.branch, first.branch);
    assert_eq!(engine.state(), LifecycleState::MergePending);
    engine.merge().expect("merge second");
    assert_eq!(engine.state(), LifecycleState::Merged);
    assert_eq!(repo.read_file("second.md").expect("read"), "2\n");
}

#[test]
fn conflicting_merge_is_aborted() {
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("a.txt", "A\nX\nC\n").expect("seed");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    engine
        .accept_json(&plan_json("default", vec![replace_op("a.txt", 2, 2, "B\n")]), "default")
        .expect("accept");
    let outcome = engine.approve_and_execute().expect("execute");

    repo.commit_file("a.txt", "A\nY\nC\n").expect("conflicting trunk edit");
    let trunk_head = repo.head().expect("head");

    let err = engine.merge().expect_err("conflict");
    assert!(matches!(err, EngineError::VersionControl(_)), "{err}");
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert_eq!(repo.head().expect("head"), trunk_head);
    assert_eq!(repo.read_file("a.txt").expect("read"), "A\nY\nC\n");
    assert!(repo.git(&["status", "--porcelain"]).expect("status").is_empty());
    let record = records(&repo).load_branch().expect("load").expect("record kept");
    assert_eq!(record.branch_name, outcome.branch);
}

#[test]
fn identical_update_rolls_back_with_no_changes() {
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("a.txt", "same\n").expect("seed");
    let head = repo.head().expect("head");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));

    engine
        .accept_json(&plan_json("default", vec![update_op("a.txt", "same\n")]), "default")
        .expect("accept");
    let err = engine.approve_and_execute().expect_err("no changes");

    assert!(matches!(err, EngineError::Execution(ExecutionError::NoChanges)));
    assert_eq!(engine.state(), LifecycleState::RolledBack);
    assert!(engine.pending_plan_id().is_none());
    assert_eq!(repo.branches().expect("branches"), vec!["main"]);
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert_eq!(repo.head().expect("head"), head);
}

#[test]
fn failed_op_rolls_back_earlier_ops() {
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("a.txt", "one\n").expect("seed");
    let head = repo.head().expect("head");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));

    let ops = vec![
        insert_op("a.txt", 1, "two"),
        create_op("fresh/dir/new.txt", "x\n"),
        update_op("missing.txt", "y\n"),
    ];
    engine
        .accept_json(&plan_json("default", ops), "default")
        .expect("accept");
    let err = engine.approve_and_execute().expect_err("missing target");

    assert!(matches!(
        err,
        EngineError::Execution(ExecutionError::MissingTarget { .. })
    ));
    assert_eq!(engine.state(), LifecycleState::RolledBack);
    assert_eq!(repo.read_file("a.txt").expect("read"), "one\n");
    assert!(!repo.path().join("fresh").exists());
    assert_eq!(repo.branches().expect("branches"), vec!["main"]);
    assert_eq!(repo.head().expect("head"), head);
    assert!(repo.git(&["status", "--porcelain"]).expect("status").is_empty());
}

#[test]
fn dirty_tree_refuses_execution_and_keeps_plan() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    let plan_id = engine
        .accept_json(&plan_json("default", vec![create_op("notes.md", "x\n")]), "default")
        .expect("accept");
    repo.write_file("scratch.txt", "wip\n").expect("dirty");

    let err = engine.approve_and_execute().expect_err("dirty");
    assert!(matches!(err, EngineError::VersionControl(_)));
    assert!(err.to_string().contains("scratch.txt"));
    assert_eq!(engine.state(), LifecycleState::Planned);
    assert_eq!(engine.pending_plan_id(), Some(plan_id.as_str()));
    assert_eq!(repo.branches().expect("branches"), vec!["main"]);
}

#[test]
fn second_accept_replaces_pending_plan() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    engine
        .accept_json(&plan_json("default", vec![create_op("first.md", "1\n")]), "default")
        .expect("accept");
    engine
        .accept_json(&plan_json("default", vec![create_op("second.md", "2\n")]), "default")
        .expect("accept");

    let outcome = engine.approve_and_execute().expect("execute");
    let paths: Vec<&str> = outcome
        .files_changed
        .iter()
        .map(|change| change.path.as_str())
        .collect();
    assert_eq!(paths, vec!["second.md"]);
}

#[test]
fn plan_ids_do_not_reuse_existing_branches() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    engine
        .accept_json(&plan_json("default", vec![create_op("a.md", "a\n")]), "default")
        .expect("accept");
    let first = engine.approve_and_execute().expect("execute");

    let second = engine
        .accept_json(&plan_json("default", vec![create_op("b.md", "b\n")]), "default")
        .expect("accept");
    assert_ne!(second, first.plan_id);
}

#[test]
fn run_stamps_requested_mode_on_planner_output() {
    let repo = TestRepo::new().expect("repo");
    let planner = StubPlanner::returning(plan_json("default", vec![create_op("n.md", "n\n")]));
    let mut engine = repo.engine_with(repo.config(), ScriptedRunner::exiting(0), planner);

    let outcome = engine.run("self_improve", Some("tests are red")).expect("run");
    assert_eq!(outcome.plan.meta.mode, "self_improve");
    assert_eq!(engine.pending_plan_id(), Some(outcome.plan_id.as_str()));

    let executed = engine.approve_and_execute().expect("execute");
    assert!(executed.verification.is_some());
}

#[test]
fn run_rejects_mode_denied_paths() {
    let repo = TestRepo::new().expect("repo");
    let planner = StubPlanner::returning(plan_json(
        "default",
        vec![update_op("patchgate/src/engine.rs", "// gone\n")],
    ));
    let mut engine = repo.engine_with(repo.config(), ScriptedRunner::exiting(0), planner);

    let err = engine.run("self_improve", None).expect_err("denied");
    assert!(matches!(err, EngineError::Guardrail(_)), "{err}");
    assert_eq!(engine.state(), LifecycleState::Idle);
}

#[test]
fn status_reports_records_after_execute() {
    let repo = TestRepo::new().expect("repo");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    let before = engine.status().expect("status");
    assert_eq!(before.state, LifecycleState::Idle);
    assert!(before.last_branch.is_none());
    assert_eq!(before.current_branch.as_deref(), Some("main"));

    engine
        .accept_json(&plan_json("self_improve", vec![create_op("n.md", "n\n")]), "default")
        .expect("accept");
    let pending = engine.status().expect("status");
    assert!(pending.pending_plan.is_some());

    let outcome = engine.approve_and_execute().expect("execute");
    let after = engine.status().expect("status");
    assert_eq!(after.state, LifecycleState::MergePending);
    assert!(after.pending_plan_id.is_none());
    let branch = after.last_branch.expect("branch record");
    assert_eq!(branch.branch_name, outcome.branch);
    assert_eq!(branch.mode, "self_improve");
    assert!(after.last_verification.expect("verification").ok);
}

#[test]
fn cleanup_deletes_engine_branches_only() {
    let repo = TestRepo::new().expect("repo");
    repo.git(&["branch", "feature/keep"]).expect("branch");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    engine
        .accept_json(&plan_json("default", vec![create_op("a.md", "a\n")]), "default")
        .expect("accept");
    let outcome = engine.approve_and_execute().expect("execute");
    repo.git(&["checkout", "-q", &outcome.branch]).expect("checkout");

    let cleaned = engine.cleanup().expect("cleanup");
    assert_eq!(cleaned.deleted_branches, vec![outcome.branch]);
    assert_eq!(engine.state(), LifecycleState::CleanedUp);
    assert_eq!(repo.current_branch().expect("branch"), "main");
    assert_eq!(
        repo.branches().expect("branches"),
        vec!["feature/keep", "main"]
    );
    assert!(records(&repo).load_branch().expect("load").is_none());
}

#[test]
fn cleanup_refuses_dirty_tree() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file("scratch.txt", "wip\n").expect("dirty");
    let mut engine = repo.engine(ScriptedRunner::exiting(0));
    assert!(matches!(
        engine.cleanup(),
        Err(EngineError::VersionControl(_))
    ));
}
