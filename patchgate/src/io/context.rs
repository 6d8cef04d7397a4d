//! Repository excerpts handed to the planner as `files_preview`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::io::config::PlannerConfig;

const SKIP_DIRS: &[&str] = &["target", "node_modules", "dist", "coverage"];
const PREVIEW_EXTENSIONS: &[&str] = &["rs", "toml", "md", "json", "yml", "yaml", "txt"];
const TRUNCATED_MARKER: &str = "\n...TRUNCATED...";

/// Excerpt of one repository file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePreview {
    /// Repository-relative path with forward slashes.
    pub path: String,
    pub content: String,
}

/// Collect previews of text files under `root` within `budget`.
///
/// Hidden entries and build output directories are skipped. Files are visited
/// in path order so the result is deterministic for a given tree.
pub fn collect_previews(root: &Path, budget: &PlannerConfig) -> Result<Vec<FilePreview>> {
    let mut candidates = Vec::new();
    walk(root, root, &mut candidates)?;
    candidates.sort();

    let mut previews = Vec::new();
    let mut total_chars = 0usize;
    for rel in candidates {
        if previews.len() >= budget.max_files || total_chars >= budget.max_total_chars {
            break;
        }
        let full = root.join(&rel);
        let Ok(meta) = fs::metadata(&full) else {
            continue;
        };
        if meta.len() > budget.max_file_bytes {
            continue;
        }
        // Binary or non-UTF-8 files are not previewed.
        let Ok(raw) = fs::read_to_string(&full) else {
            continue;
        };
        let remaining = budget.max_total_chars - total_chars;
        let content = excerpt(&raw, budget.max_chars_per_file.min(remaining));
        total_chars += content.chars().count();
        previews.push(FilePreview { path: rel, content });
    }
    debug!(files = previews.len(), total_chars, "collected planner previews");
    Ok(previews)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read dir entry in {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry
            .file_type()
            .with_context(|| format!("file type {}", entry.path().display()))?;
        let path = entry.path();
        if file_type.is_dir() {
            if !SKIP_DIRS.contains(&name.as_str()) {
                walk(root, &path, out)?;
            }
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let previewable = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| PREVIEW_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if !previewable {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

fn excerpt(raw: &str, max_chars: usize) -> String {
    let normalized = raw.replace("\r\n", "\n");
    if normalized.chars().count() <= max_chars {
        return normalized;
    }
    let mut out: String = normalized.chars().take(max_chars).collect();
    out.push_str(TRUNCATED_MARKER);
    out
}
