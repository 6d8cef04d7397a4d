//! `patchgate` command line.
//!
//! Every command prints a JSON document on stdout. Failures print
//! `{"category", "message"}` on stderr and exit with a per-category code
//! (see [`patchgate::exit_codes`]).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};

use patchgate::core::guardrail::validate;
use patchgate::core::plan::{parse_plan, stamp_mode};
use patchgate::engine::Engine;
use patchgate::error::EngineError;
use patchgate::exit_codes;
use patchgate::io::artifacts::ArtifactStore;
use patchgate::io::config::{EngineConfig, default_config_path, load_config, write_config};
use patchgate::io::git::Git;
use patchgate::io::planner::FilePlanner;
use patchgate::io::verify::ProcessRunner;

const DEFAULT_MODE: &str = "default";

#[derive(Parser)]
#[command(
    name = "patchgate",
    version,
    about = "Guarded patch application on isolated git branches"
)]
struct Cli {
    /// Repository to operate on.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Config file (defaults to `.patchgate/config.toml` in the repository).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config and create the artifacts directory.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Normalize a plan file and check it against the guardrails.
    Validate {
        plan: PathBuf,
        #[arg(long, default_value = DEFAULT_MODE)]
        mode: String,
    },
    /// Validate a plan file, apply it on a new branch, commit and verify.
    Apply {
        plan: PathBuf,
        #[arg(long, default_value = DEFAULT_MODE)]
        mode: String,
        /// Free-form reason recorded with the request.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show the last executed branch and verification record.
    Status,
    /// Merge the last executed branch into trunk.
    Merge,
    /// Delete all engine branches and records.
    Cleanup,
}

fn main() {
    patchgate::logging::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(output) => {
            println!("{}", to_pretty(&output));
            std::process::exit(exit_codes::OK);
        }
        Err(err) => {
            let report = err.to_report();
            eprintln!("{}", to_pretty(&report));
            std::process::exit(exit_codes::for_category(report.category));
        }
    }
}

fn run(cli: &Cli) -> Result<Value, EngineError> {
    let repo_root = resolve_repo_root(&cli.repo)?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(&repo_root));

    let config = || load_config(&config_path).map_err(EngineError::config);

    match &cli.command {
        Command::Init { force } => cmd_init(&repo_root, &config_path, *force),
        Command::Validate { plan, mode } => cmd_validate(&config()?, plan, mode),
        Command::Apply { plan, mode, reason } => {
            let mut engine = engine(&repo_root, config()?, plan.clone());
            let planned = engine.run(mode, reason.as_deref())?;
            let executed = engine.approve_and_execute()?;
            Ok(json!({ "planned": to_value(&planned)?, "executed": to_value(&executed)? }))
        }
        Command::Status => to_value(&engine(&repo_root, config()?, PathBuf::new()).status()?),
        Command::Merge => to_value(&engine(&repo_root, config()?, PathBuf::new()).merge()?),
        Command::Cleanup => to_value(&engine(&repo_root, config()?, PathBuf::new()).cleanup()?),
    }
}

fn engine(
    repo_root: &Path,
    config: EngineConfig,
    plan_path: PathBuf,
) -> Engine<Git, ProcessRunner, FilePlanner> {
    let runner = ProcessRunner {
        output_limit_bytes: config.verification.output_limit_bytes,
    };
    Engine::new(
        repo_root,
        config,
        Git::new(repo_root),
        runner,
        FilePlanner { path: plan_path },
    )
}

fn cmd_init(repo_root: &Path, config_path: &Path, force: bool) -> Result<Value, EngineError> {
    let written = force || !config_path.exists();
    let config = if written {
        let config = EngineConfig::default();
        write_config(config_path, &config).map_err(EngineError::config)?;
        config
    } else {
        load_config(config_path).map_err(EngineError::config)?
    };
    let artifacts_dir = config.artifacts_path(repo_root);
    ArtifactStore::new(&artifacts_dir)
        .ensure_dir()
        .map_err(EngineError::storage)?;
    Ok(json!({
        "configPath": config_path,
        "configWritten": written,
        "artifactsDir": artifacts_dir,
    }))
}

fn cmd_validate(config: &EngineConfig, plan_path: &Path, mode: &str) -> Result<Value, EngineError> {
    let mut raw = read_plan(plan_path)?;
    stamp_mode(&mut raw, mode);
    let plan = parse_plan(&raw, mode)?;
    validate(&plan, &config.guardrails)?;
    Ok(json!({ "valid": true, "plan": to_value(&plan)? }))
}

fn read_plan(path: &Path) -> Result<Value, EngineError> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read plan {}", path.display()))
        .map_err(EngineError::planner)?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", path.display()))
        .map_err(EngineError::planner)
}

fn resolve_repo_root(repo: &Path) -> Result<PathBuf, EngineError> {
    Git::new(repo)
        .toplevel()
        .with_context(|| format!("{} is not inside a git repository", repo.display()))
        .map_err(EngineError::vcs)
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value)
        .context("serialize output")
        .map_err(EngineError::storage)
}

fn to_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| {
        format!(r#"{{"category":"state","message":"serialize output: {err}"}}"#)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["patchgate", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.repo, PathBuf::from("."));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["patchgate", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_apply_with_mode_and_reason() {
        let cli = Cli::parse_from([
            "patchgate",
            "--repo",
            "/tmp/repo",
            "apply",
            "plan.json",
            "--mode",
            "self_improve",
            "--reason",
            "tests failing",
        ]);
        assert_eq!(cli.repo, PathBuf::from("/tmp/repo"));
        match cli.command {
            Command::Apply { plan, mode, reason } => {
                assert_eq!(plan, PathBuf::from("plan.json"));
                assert_eq!(mode, "self_improve");
                assert_eq!(reason.as_deref(), Some("tests failing"));
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn parse_validate_defaults_mode() {
        let cli = Cli::parse_from(["patchgate", "validate", "plan.json", "--config", "c.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(cli.command, Command::Validate { ref mode, .. } if mode == DEFAULT_MODE));
    }
}
