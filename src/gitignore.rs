// src/gitignore.rs

//! Tagged blocks in `.git/info/exclude`
//!
//! Staged files are hidden from git by appending a block bracketed by
//! `# confik:start:<run id>` and `# confik:end:<run id>` sentinel lines.
//! Blocks are keyed by run id so several runs (or leftovers of crashed runs)
//! can coexist and be removed precisely.

use crate::error::{Error, Result};
use crate::fsutil;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const START_PREFIX: &str = "# confik:start:";
const END_PREFIX: &str = "# confik:end:";

/// Reference to the ignore block written by one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitContext {
    pub git_root: String,
    pub git_dir: String,
    pub exclude_path: String,
    pub run_id: String,
}

/// Which tagged blocks to strip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockScope<'a> {
    /// Only the block tagged with this run id
    Run(&'a str),
    /// Every tagged block, whatever its run id
    All,
}

/// Walk up from `start` until a directory containing `.git` is found
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut current = std::path::absolute(start).ok()?;
    loop {
        if fsutil::exists(&current.join(".git")) {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Resolve the git directory for a work tree root
///
/// `.git` is usually a directory; worktrees and submodules use a file
/// containing `gitdir: <path>` instead.
pub fn resolve_git_dir(git_root: &Path) -> Result<PathBuf> {
    let git_path = git_root.join(".git");
    let meta = fs::metadata(&git_path)?;
    if meta.is_dir() {
        return Ok(git_path);
    }

    let content = fs::read_to_string(&git_path)?;
    let pointer = content
        .trim()
        .strip_prefix("gitdir:")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::GitDir(git_path.clone()))?;

    Ok(std::path::absolute(git_root.join(pointer))?)
}

/// Path of the exclude file inside a git directory
pub fn exclude_path(git_dir: &Path) -> PathBuf {
    git_dir.join("info").join("exclude")
}

fn start_line(run_id: &str) -> String {
    format!("{START_PREFIX}{run_id}")
}

fn end_line(run_id: &str) -> String {
    format!("{END_PREFIX}{run_id}")
}

/// Append a block for `run_id` listing `paths`; returns the exclude file path
///
/// A block whose start sentinel is already present is left alone, so
/// repeating the call is a no-op.
pub fn append_block(git_dir: &Path, run_id: &str, paths: &[String]) -> Result<PathBuf> {
    let exclude = exclude_path(git_dir);
    if let Some(info_dir) = exclude.parent() {
        fs::create_dir_all(info_dir)?;
    }

    let start = start_line(run_id);
    let mut content = match fs::read_to_string(&exclude) {
        Ok(existing) => existing,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if content.lines().any(|line| line == start) {
        debug!("Ignore block {} already present in {}", run_id, exclude.display());
        return Ok(exclude);
    }

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&start);
    content.push('\n');
    for path in paths {
        content.push_str(path);
        content.push('\n');
    }
    content.push_str(&end_line(run_id));
    content.push('\n');

    fs::write(&exclude, content)?;
    debug!("Appended ignore block {} to {}", run_id, exclude.display());
    Ok(exclude)
}

/// Remove the block tagged `run_id`; a missing file is not an error
pub fn remove_block(exclude: &Path, run_id: &str) -> Result<()> {
    rewrite_without(exclude, BlockScope::Run(run_id))
}

/// Remove every tagged block, for recovery without a manifest
pub fn remove_all_blocks(exclude: &Path) -> Result<()> {
    rewrite_without(exclude, BlockScope::All)
}

fn rewrite_without(exclude: &Path, scope: BlockScope<'_>) -> Result<()> {
    let content = match fs::read_to_string(exclude) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let updated = strip_blocks(&content, scope);
    if updated == content {
        return Ok(());
    }

    fs::write(exclude, updated)?;
    debug!("Removed ignore block(s) {:?} from {}", scope, exclude.display());
    Ok(())
}

/// Strip tagged blocks from ignore-file content
///
/// Lines outside the targeted blocks are kept verbatim and in order, and a
/// trailing newline on the input is preserved. A start sentinel without a
/// matching end sentinel swallows everything up to end of file; a damaged
/// ignore file must never abort a run.
pub fn strip_blocks(content: &str, scope: BlockScope<'_>) -> String {
    let (target_start, target_end) = match scope {
        BlockScope::Run(run_id) => (Some(start_line(run_id)), Some(end_line(run_id))),
        BlockScope::All => (None, None),
    };

    let mut kept: Vec<&str> = Vec::new();
    let mut skipping = false;
    for line in content.split('\n') {
        if !skipping && line.starts_with(START_PREFIX) {
            let targeted = target_start.as_deref().is_none_or(|start| line == start);
            if targeted {
                skipping = true;
                continue;
            }
        }
        if skipping {
            let ends = line.starts_with(END_PREFIX)
                && target_end.as_deref().is_none_or(|end| line == end);
            if ends {
                skipping = false;
            }
            continue;
        }
        kept.push(line);
    }

    let mut result = kept.join("\n");
    if content.ends_with('\n') && !result.ends_with('\n') {
        result.push('\n');
    }
    result
}
