// src/fsutil.rs

//! Filesystem helpers shared by staging and cleanup
//!
//! Everything here is deliberately small and synchronous:
//! - existence/directory checks that never fail
//! - idempotent directory creation with a per-run cache
//! - mode-preserving file copies that never overwrite
//! - "remove if empty" directory removal that tolerates repeated cleanup
//! - path rendering for the manifest (root-relative, `/`-separated)

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::hash::Hash;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Outcome of preparing a destination directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirStatus {
    /// The directory exists (or would exist in dry-run mode)
    Ready,
    /// Some ancestor exists but is not a directory
    Blocked,
}

/// Directories already confirmed present during one staging run
///
/// Scoped to a single orchestrator invocation; never persisted.
#[derive(Debug, Default)]
pub struct DirCache {
    known: HashSet<PathBuf>,
}

impl DirCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.known.contains(path)
    }

    fn mark(&mut self, path: &Path) {
        self.known.insert(path.to_path_buf());
    }
}

/// Returns true if `path` is a directory; any stat error yields false
pub fn is_directory(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Returns true if anything (file, directory, symlink) exists at `path`
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Ensure `dir` and all of its missing ancestors exist
///
/// Newly created directories are appended to `created` in creation order
/// (shallowest first). Returns [`DirStatus::Blocked`] when an ancestor
/// exists but is not a directory; callers treat that as a skip rather than
/// a failure. In dry-run mode nothing is created, but the directories that
/// would be created are still recorded.
pub fn ensure_dir(
    dir: &Path,
    dry_run: bool,
    cache: &mut DirCache,
    created: &mut Vec<PathBuf>,
) -> io::Result<DirStatus> {
    let resolved = std::path::absolute(dir)?;
    if cache.contains(&resolved) {
        return Ok(DirStatus::Ready);
    }

    let mut missing = Vec::new();
    let mut current = resolved.clone();
    loop {
        if cache.contains(&current) {
            break;
        }
        match fs::metadata(&current) {
            Ok(meta) => {
                if !meta.is_dir() {
                    debug!("{} exists but is not a directory", current.display());
                    return Ok(DirStatus::Blocked);
                }
                cache.mark(&current);
                break;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                missing.push(current.clone());
                match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                }
            }
            Err(e) => return Err(e),
        }
    }

    if missing.is_empty() {
        return Ok(DirStatus::Ready);
    }

    missing.reverse();
    create_missing(missing, dry_run, cache, created)?;
    Ok(DirStatus::Ready)
}

/// Create `missing` (shallowest first), recording each directory as soon as
/// it exists so a later failure leaves no unrecorded directories
fn create_missing(
    missing: Vec<PathBuf>,
    dry_run: bool,
    cache: &mut DirCache,
    created: &mut Vec<PathBuf>,
) -> io::Result<()> {
    for path in missing {
        if !dry_run {
            match fs::create_dir(&path) {
                Ok(()) => debug!("Created directory {}", path.display()),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && is_directory(&path) => {
                    // Appeared concurrently; not ours to remove
                    cache.mark(&path);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        cache.mark(&path);
        created.push(path);
    }
    Ok(())
}

/// Copy `src` to a new file at `dest`, then copy the permission bits
///
/// The destination is opened with create-new semantics, so an existing path
/// is never overwritten. A partially written destination is removed before
/// the error is returned.
pub fn copy_file(src: &Path, dest: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let permissions = input.metadata()?.permissions();

    let mut output = OpenOptions::new().write(true).create_new(true).open(dest)?;

    let copied = io::copy(&mut input, &mut output).and_then(|_| output.sync_all());
    drop(output);
    if let Err(e) = copied {
        let _ = fs::remove_file(dest);
        return Err(e);
    }

    if let Err(e) = fs::set_permissions(dest, permissions) {
        debug!("Failed to copy permissions onto {}: {}", dest.display(), e);
    }

    Ok(())
}

/// Remove `dir` if it exists and is empty
///
/// A missing directory counts as removed, so cleanup can run twice.
/// Returns `Ok(false)` if the directory still has entries.
pub fn remove_dir_if_empty(dir: &Path) -> io::Result<bool> {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    if entries.next().is_some() {
        return Ok(false);
    }

    match fs::remove_dir(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

/// Order-preserving deduplication
pub fn unique<T: Clone + Eq + Hash>(items: &[T]) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert((*item).clone()))
        .cloned()
        .collect()
}

/// Render a relative path with `/` separators
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Root-relative, slash-normalized rendering of `path`
///
/// Returns `None` for paths outside `base` or equal to it.
pub fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    if rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    let key = to_slash(rel);
    if key.is_empty() || key == "." {
        return None;
    }
    Some(key)
}

/// Render every path relative to `base` for persistence in the manifest
pub fn to_relative_paths(base: &Path, paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|path| {
            let key = relative_key(base, path);
            if key.is_none() {
                debug!("Dropping {} from manifest: outside {}", path.display(), base.display());
            }
            key
        })
        .collect()
}

/// Join a `/`-separated relative key onto `base`
pub fn join_relative(base: &Path, key: &str) -> PathBuf {
    key.split('/').fold(base.to_path_buf(), |acc, part| acc.join(part))
}

/// Resolve manifest entries back to absolute paths under `base`
pub fn from_relative_paths(base: &Path, keys: &[String]) -> Vec<PathBuf> {
    keys.iter().map(|key| join_relative(base, key)).collect()
}
