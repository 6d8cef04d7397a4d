//! Persisted branch and verification records.
//!
//! `last_branch.json` names the branch awaiting merge; `last_verification.json`
//! holds the most recent verification result and gates merge for verified
//! modes. Both live in the artifacts directory and are written atomically.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const BRANCH_RECORD_FILE: &str = "last_branch.json";
pub const VERIFICATION_RECORD_FILE: &str = "last_verification.json";

/// The most recently executed plan branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BranchRecord {
    pub branch_name: String,
    pub plan_id: String,
    /// Commit the branch was cut from.
    pub base_ref: String,
    pub mode: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

/// Outcome of a verification run against a plan branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRecord {
    pub branch_name: String,
    pub plan_id: String,
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub command: String,
    pub log_paths: Vec<PathBuf>,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

/// Current time as an RFC 3339 UTC timestamp for `createdAt` fields.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Record file locations within an artifacts directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(artifacts_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: artifacts_dir.into(),
        }
    }

    pub fn branch_path(&self) -> PathBuf {
        self.dir.join(BRANCH_RECORD_FILE)
    }

    pub fn verification_path(&self) -> PathBuf {
        self.dir.join(VERIFICATION_RECORD_FILE)
    }

    pub fn load_branch(&self) -> Result<Option<BranchRecord>> {
        load_optional(&self.branch_path())
    }

    pub fn write_branch(&self, record: &BranchRecord) -> Result<()> {
        debug!(branch = %record.branch_name, plan_id = %record.plan_id, "writing branch record");
        write_json_atomic(&self.branch_path(), record)
    }

    pub fn load_verification(&self) -> Result<Option<VerificationRecord>> {
        load_optional(&self.verification_path())
    }

    pub fn write_verification(&self, record: &VerificationRecord) -> Result<()> {
        debug!(branch = %record.branch_name, ok = record.ok, "writing verification record");
        write_json_atomic(&self.verification_path(), record)
    }

    pub fn clear_verification(&self) -> Result<()> {
        remove_if_exists(&self.verification_path())
    }

    /// Remove both records. Missing files are not an error.
    pub fn clear_all(&self) -> Result<()> {
        remove_if_exists(&self.branch_path())?;
        remove_if_exists(&self.verification_path())
    }
}

fn load_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    debug!(path = %path.display(), "loading record");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read record {}", path.display()))?;
    let record = serde_json::from_str(&contents)
        .with_context(|| format!("parse record {}", path.display()))?;
    Ok(Some(record))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed record");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove record {}", path.display())),
    }
}

/// Atomically write pretty JSON to disk (temp file + rename).
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("record path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_record() -> BranchRecord {
        BranchRecord {
            branch_name: "agent/plan_1".to_string(),
            plan_id: "plan_1".to_string(),
            base_ref: "abc123".to_string(),
            mode: "default".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn missing_records_load_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(temp.path());
        assert_eq!(store.load_branch().expect("load"), None);
        assert_eq!(store.load_verification().expect("load"), None);
        store.clear_all().expect("clearing nothing is fine");
    }

    #[test]
    fn branch_record_round_trips_in_camel_case() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(temp.path().join("artifacts"));
        store.write_branch(&branch_record()).expect("write");

        let raw = fs::read_to_string(store.branch_path()).expect("read");
        assert!(raw.contains("\"branchName\": \"agent/plan_1\""));
        assert!(raw.ends_with("}\n"));
        assert_eq!(store.load_branch().expect("load"), Some(branch_record()));
    }

    #[test]
    fn clear_verification_keeps_branch_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::new(temp.path());
        store.write_branch(&branch_record()).expect("write branch");
        store
            .write_verification(&VerificationRecord {
                branch_name: "agent/plan_1".to_string(),
                plan_id: "plan_1".to_string(),
                ok: false,
                exit_code: Some(1),
                duration_ms: 12,
                timed_out: false,
                command: "cargo test".to_string(),
                log_paths: vec![PathBuf::from("verify_test_plan_1_stdout.log")],
                created_at: "2026-01-01T00:00:00Z".to_string(),
            })
            .expect("write verification");

        store.clear_verification().expect("clear");
        assert_eq!(store.load_verification().expect("load"), None);
        assert!(store.load_branch().expect("load").is_some());

        store.clear_all().expect("clear all");
        assert_eq!(store.load_branch().expect("load"), None);
    }
}
