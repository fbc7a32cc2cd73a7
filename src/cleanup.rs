// src/cleanup.rs

//! Reversal of staged artifacts
//!
//! Used both in-process at the end of a run and out-of-process by
//! `--clean` or the recovery pass before a new run. Every reversal is
//! attempted even when an earlier one fails; problems are collected into a
//! [`CleanupReport`]. The manifest is only deleted when nothing is left
//! behind, so an incomplete cleanup can be retried later.

use crate::config::{MANIFEST_FILENAME, SOURCE_DIRNAME};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::gitignore::{self, GitContext};
use crate::lock::StagingLock;
use crate::manifest::Manifest;
use crate::vscode::{self, VsCodeContext};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Everything that went wrong during one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Reversal steps that failed, in the order they were attempted
    pub failures: Vec<String>,
    /// Artifacts that still exist afterwards
    pub remaining: BTreeSet<PathBuf>,
    /// Ignore blocks whose removal failed
    pub unreversed_gitignore: Vec<GitContext>,
    /// Settings edits whose reversal failed
    pub unreversed_vscode: Vec<VsCodeContext>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.remaining.is_empty()
    }

    fn fail(&mut self, message: String) {
        warn!("Cleanup: {}", message);
        self.failures.push(message);
    }

    fn remain(&mut self, path: &Path) {
        self.remaining.insert(path.to_path_buf());
    }

    /// `Err(Error::CleanupIncomplete)` unless the report is clean
    pub fn into_result(self) -> Result<()> {
        if self.is_clean() {
            Ok(())
        } else {
            Err(Error::CleanupIncomplete(self))
        }
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.failures.is_empty() {
            parts.push(format!(
                "{} cleanup error(s): {}",
                self.failures.len(),
                self.failures.join("; ")
            ));
        }
        if !self.remaining.is_empty() {
            let paths: Vec<String> = self
                .remaining
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            parts.push(format!("{} path(s) remain: {}", paths.len(), paths.join(", ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// The artifacts one cleanup pass should reverse
#[derive(Debug)]
pub struct CleanupPlan<'a> {
    pub manifest_path: &'a Path,
    pub created_files: &'a [PathBuf],
    pub created_dirs: &'a [PathBuf],
    pub vscode: &'a [VsCodeContext],
    pub gitignore: &'a [GitContext],
    /// Delete the manifest if everything else was reversed
    pub remove_manifest: bool,
}

impl CleanupPlan<'_> {
    /// Reverse everything in dependency order, then release `lock`
    ///
    /// Order: settings entries, files, directories (deepest first), ignore
    /// block, manifest, lock.
    pub fn execute(&self, lock: Option<&mut StagingLock>) -> CleanupReport {
        let mut report = self.reverse();
        self.finish(&mut report, lock);
        report
    }

    /// Reverse the recorded effects without touching the manifest or lock
    pub fn reverse(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        // A created settings file that had to be kept also keeps its directory
        let mut settings_files = Vec::new();
        let mut kept_settings_dirs = Vec::new();
        for ctx in self.vscode {
            if let Err(e) = vscode::remove_excludes(ctx) {
                report.fail(format!("remove VS Code excludes: {e}"));
                report.unreversed_vscode.push(ctx.clone());
            }
            if ctx.settings_created {
                let path = ctx.settings_path();
                if fsutil::exists(&path) {
                    debug!("Keeping edited {}", path.display());
                    kept_settings_dirs.extend(path.parent().map(Path::to_path_buf));
                }
                settings_files.push(path);
            }
        }

        for file in self.created_files {
            if settings_files.contains(file) {
                continue;
            }
            match fs::remove_file(file) {
                Ok(()) => debug!("Removed {}", file.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => report.fail(format!("remove file {}: {e}", file.display())),
            }
            if fsutil::exists(file) {
                report.remain(file);
            }
        }

        let mut dirs = fsutil::unique(self.created_dirs);
        dirs.sort_by_key(|dir| Reverse(dir.components().count()));
        for dir in &dirs {
            match fsutil::remove_dir_if_empty(dir) {
                Ok(true) => debug!("Removed directory {}", dir.display()),
                Ok(false) => {
                    if !kept_settings_dirs.contains(dir) {
                        report.remain(dir);
                    }
                }
                Err(e) => {
                    report.fail(format!("remove dir {}: {e}", dir.display()));
                    if fsutil::exists(dir) {
                        report.remain(dir);
                    }
                }
            }
        }

        for git in self.gitignore {
            let exclude = Path::new(&git.exclude_path);
            if let Err(e) = gitignore::remove_block(exclude, &git.run_id) {
                report.fail(format!("remove gitignore block {}: {e}", exclude.display()));
                report.unreversed_gitignore.push(git.clone());
            }
        }

        report
    }

    /// Delete the manifest if allowed and `report` is clean, then release
    /// `lock`; problems are added to `report`
    pub fn finish(&self, report: &mut CleanupReport, lock: Option<&mut StagingLock>) {
        if self.remove_manifest && report.is_clean() {
            match fs::remove_file(self.manifest_path) {
                Ok(()) => debug!("Removed manifest {}", self.manifest_path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => report.fail(format!(
                    "remove manifest {}: {e}",
                    self.manifest_path.display()
                )),
            }
            if fsutil::exists(self.manifest_path) {
                report.remain(self.manifest_path);
            }
        }

        if let Some(lock) = lock
            && let Err(e) = lock.release()
        {
            report.fail(format!("release lock: {e}"));
        }
    }
}

/// Path of the manifest for a project root
pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(SOURCE_DIRNAME).join(MANIFEST_FILENAME)
}

/// Reverse whatever a previous run left behind under `root`
///
/// With a manifest, exactly its recorded effects are reversed. Without one,
/// `force` strips every tagged ignore block, since nothing else is known. A
/// corrupt manifest is discarded after the same coarse block removal and
/// surfaces as [`Error::CorruptManifest`]. Unless `quiet`, the outcome is
/// printed.
pub fn clean_leftovers(root: &Path, force: bool, quiet: bool) -> Result<()> {
    let result = clean_leftovers_inner(root, force);
    if !quiet {
        match &result {
            Ok(()) => println!("confik: cleanup complete"),
            Err(Error::CleanupIncomplete(report)) => {
                println!("confik: cleanup incomplete ({report})")
            }
            Err(e) => println!("confik: cleanup incomplete ({e})"),
        }
    }
    result
}

fn clean_leftovers_inner(root: &Path, force: bool) -> Result<()> {
    let manifest_path = manifest_path(root);

    if fsutil::exists(&manifest_path) {
        match Manifest::read(&manifest_path) {
            Ok(manifest) => {
                info!("Reversing leftovers of run {}", manifest.run_id);
                let created_files = fsutil::from_relative_paths(root, &manifest.created_files);
                let created_dirs = fsutil::from_relative_paths(root, &manifest.created_dirs);
                let vscode: Vec<VsCodeContext> = manifest
                    .vscode
                    .into_iter()
                    .chain(manifest.carried_vscode)
                    .collect();
                let gitignore: Vec<GitContext> = manifest
                    .gitignore
                    .into_iter()
                    .chain(manifest.carried_gitignore)
                    .collect();
                let plan = CleanupPlan {
                    manifest_path: &manifest_path,
                    created_files: &created_files,
                    created_dirs: &created_dirs,
                    vscode: &vscode,
                    gitignore: &gitignore,
                    remove_manifest: true,
                };
                return plan.execute(None).into_result();
            }
            Err(Error::CorruptManifest { path, reason }) => {
                eprintln!(
                    "confik: manifest {} is corrupt ({}); removing all confik ignore blocks and discarding it",
                    path.display(),
                    reason
                );
                let mut report = CleanupReport::default();
                strip_all_blocks(root, &mut report);
                if let Err(e) = fs::remove_file(&path)
                    && e.kind() != ErrorKind::NotFound
                {
                    report.fail(format!("remove manifest {}: {e}", path.display()));
                }
                if !report.is_clean() {
                    warn!("Coarse recovery incomplete: {}", report);
                }
                return Err(Error::CorruptManifest { path, reason });
            }
            Err(e) => return Err(e),
        }
    }

    if force {
        let mut report = CleanupReport::default();
        strip_all_blocks(root, &mut report);
        return report.into_result();
    }

    Ok(())
}

fn strip_all_blocks(root: &Path, report: &mut CleanupReport) {
    let Some(git_root) = gitignore::find_git_root(root) else {
        debug!("No git repository above {}", root.display());
        return;
    };
    let git_dir = match gitignore::resolve_git_dir(&git_root) {
        Ok(dir) => dir,
        Err(e) => {
            debug!("Skipping ignore blocks: {}", e);
            return;
        }
    };
    let exclude = gitignore::exclude_path(&git_dir);
    if let Err(e) = gitignore::remove_all_blocks(&exclude) {
        report.fail(format!("remove gitignore blocks {}: {e}", exclude.display()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(root: &Path, manifest: &Manifest) -> PathBuf {
        let path = manifest_path(root);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        manifest.write(&path).unwrap();
        path
    }

    fn manifest(run_id: &str, files: &[&str], dirs: &[&str]) -> Manifest {
        Manifest {
            run_id: run_id.to_string(),
            created_files: files.iter().map(|s| s.to_string()).collect(),
            created_dirs: dirs.iter().map(|s| s.to_string()).collect(),
            gitignore: None,
            vscode: None,
            carried_gitignore: Vec::new(),
            carried_vscode: Vec::new(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_clean_leftovers_from_manifest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();

        fs::write(base.join("alpha.txt"), "alpha").unwrap();
        fs::create_dir_all(base.join("nested")).unwrap();
        fs::write(base.join("nested").join("beta.txt"), "beta").unwrap();

        let info_dir = base.join(".git").join("info");
        fs::create_dir_all(&info_dir).unwrap();
        let exclude = info_dir.join("exclude");
        fs::write(&exclude, "keep\n# confik:start:run1\nalpha.txt\n# confik:end:run1\n").unwrap();

        let mut record = manifest("run1", &["alpha.txt", "nested/beta.txt"], &["nested"]);
        record.gitignore = Some(GitContext {
            git_root: base.to_string_lossy().into_owned(),
            git_dir: base.join(".git").to_string_lossy().into_owned(),
            exclude_path: exclude.to_string_lossy().into_owned(),
            run_id: "run1".to_string(),
        });
        let path = write_manifest(base, &record);

        clean_leftovers(base, true, true).unwrap();

        assert!(!base.join("alpha.txt").exists());
        assert!(!base.join("nested").exists());
        assert_eq!(fs::read_to_string(&exclude).unwrap(), "keep\n");
        assert!(!path.exists());
    }

    #[test]
    fn test_already_removed_files_do_not_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write_manifest(temp_dir.path(), &manifest("run-ghost", &["gone.txt"], &[]));

        clean_leftovers(temp_dir.path(), true, true).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_blocks_removed_without_manifest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let info_dir = temp_dir.path().join(".git").join("info");
        fs::create_dir_all(&info_dir).unwrap();
        let exclude = info_dir.join("exclude");
        fs::write(&exclude, "# confik:start:run2\nfoo\n# confik:end:run2\n").unwrap();

        clean_leftovers(temp_dir.path(), true, true).unwrap();
        assert!(!fs::read_to_string(&exclude).unwrap().contains("confik:start:run2"));
    }

    #[test]
    fn test_no_manifest_without_force_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let info_dir = temp_dir.path().join(".git").join("info");
        fs::create_dir_all(&info_dir).unwrap();
        let exclude = info_dir.join("exclude");
        let block = "# confik:start:run3\nfoo\n# confik:end:run3\n";
        fs::write(&exclude, block).unwrap();

        clean_leftovers(temp_dir.path(), false, true).unwrap();
        assert_eq!(fs::read_to_string(&exclude).unwrap(), block);
    }

    #[test]
    fn test_remaining_artifacts_keep_manifest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested = temp_dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("user.txt"), "keep").unwrap();
        let path = write_manifest(temp_dir.path(), &manifest("run-remains", &[], &["nested"]));

        let err = clean_leftovers(temp_dir.path(), true, true).unwrap_err();
        let Error::CleanupIncomplete(report) = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(report.failures.is_empty());
        assert!(report.remaining.contains(&nested));
        assert!(err.to_string().contains("1 path(s) remain"));
        assert!(path.exists(), "manifest kept for a later retry");
    }

    #[test]
    fn test_corrupt_manifest_is_discarded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = manifest_path(temp_dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ definitely not a manifest").unwrap();

        let info_dir = temp_dir.path().join(".git").join("info");
        fs::create_dir_all(&info_dir).unwrap();
        let exclude = info_dir.join("exclude");
        fs::write(&exclude, "keep\n# confik:start:old\nfoo\n# confik:end:old\n").unwrap();

        let err = clean_leftovers(temp_dir.path(), true, true).unwrap_err();
        assert!(matches!(err, Error::CorruptManifest { .. }));
        assert!(!path.exists());
        assert_eq!(fs::read_to_string(&exclude).unwrap(), "keep\n");
    }

    #[test]
    fn test_directories_removed_deepest_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        let deep = base.join("a").join("b").join("c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("f.txt"), "x").unwrap();

        let files = vec![deep.join("f.txt")];
        let dirs = vec![base.join("a"), base.join("a").join("b"), deep.clone()];
        let manifest_path = manifest_path(base);
        let plan = CleanupPlan {
            manifest_path: &manifest_path,
            created_files: &files,
            created_dirs: &dirs,
            vscode: &[],
            gitignore: &[],
            remove_manifest: false,
        };

        let report = plan.execute(None);
        assert!(report.is_clean(), "{report}");
        assert!(!base.join("a").exists());
    }

    #[test]
    fn test_release_lock_during_cleanup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock_path = temp_dir.path().join(".confik.lock");
        let mut lock = StagingLock::acquire(&lock_path).unwrap();
        let manifest_path = manifest_path(temp_dir.path());

        let plan = CleanupPlan {
            manifest_path: &manifest_path,
            created_files: &[],
            created_dirs: &[],
            vscode: &[],
            gitignore: &[],
            remove_manifest: true,
        };
        assert!(plan.execute(Some(&mut lock)).is_clean());
        assert!(!lock.is_held());
    }

    #[test]
    fn test_kept_settings_directory_is_not_remaining() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        let staged = base.join("example.txt");
        fs::write(&staged, "x").unwrap();

        let mut files = vec![staged.clone()];
        let mut dirs = Vec::new();
        let ctx = vscode::apply_excludes(base, &[staged], &mut files, &mut dirs)
            .unwrap()
            .unwrap();

        // A human comment makes the created settings file worth keeping
        let settings = vscode::settings_path(base);
        let content = fs::read_to_string(&settings).unwrap();
        fs::write(&settings, format!("// mine\n{content}")).unwrap();

        let manifest_path = manifest_path(base);
        let plan = CleanupPlan {
            manifest_path: &manifest_path,
            created_files: &files,
            created_dirs: &dirs,
            vscode: std::slice::from_ref(&ctx),
            gitignore: &[],
            remove_manifest: true,
        };
        let report = plan.execute(None);

        assert!(report.is_clean(), "{report}");
        assert!(settings.exists());
        assert!(!base.join("example.txt").exists());
    }

    #[test]
    fn test_failed_block_removal_is_reported_unreversed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        // An exclude path that cannot be read as a file
        let exclude = base.join("exclude");
        fs::create_dir_all(&exclude).unwrap();
        let git = GitContext {
            git_root: base.to_string_lossy().into_owned(),
            git_dir: base.to_string_lossy().into_owned(),
            exclude_path: exclude.to_string_lossy().into_owned(),
            run_id: "run-stuck".to_string(),
        };

        let manifest_path = manifest_path(base);
        let plan = CleanupPlan {
            manifest_path: &manifest_path,
            created_files: &[],
            created_dirs: &[],
            vscode: &[],
            gitignore: std::slice::from_ref(&git),
            remove_manifest: true,
        };
        let report = plan.execute(None);

        assert!(!report.is_clean());
        assert_eq!(report.unreversed_gitignore, vec![git]);
        assert!(report.unreversed_vscode.is_empty());
    }

    #[test]
    fn test_carried_blocks_removed_by_clean() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();
        let info_dir = base.join(".git").join("info");
        fs::create_dir_all(&info_dir).unwrap();
        let exclude = info_dir.join("exclude");
        fs::write(
            &exclude,
            "keep\n# confik:start:old\nx\n# confik:end:old\n# confik:start:new\ny\n# confik:end:new\n",
        )
        .unwrap();

        let context = |run_id: &str| GitContext {
            git_root: base.to_string_lossy().into_owned(),
            git_dir: base.join(".git").to_string_lossy().into_owned(),
            exclude_path: exclude.to_string_lossy().into_owned(),
            run_id: run_id.to_string(),
        };
        let mut record = manifest("new", &[], &[]);
        record.gitignore = Some(context("new"));
        record.carried_gitignore = vec![context("old")];
        let path = write_manifest(base, &record);

        clean_leftovers(base, false, true).unwrap();
        assert_eq!(fs::read_to_string(&exclude).unwrap(), "keep\n");
        assert!(!path.exists());
    }

    #[test]
    fn test_report_display() {
        let mut report = CleanupReport::default();
        report.failures.push("remove file a: denied".to_string());
        report.remaining.insert(PathBuf::from("b"));
        report.remaining.insert(PathBuf::from("a"));
        assert_eq!(
            report.to_string(),
            "1 cleanup error(s): remove file a: denied; 2 path(s) remain: a, b"
        );
    }
}
