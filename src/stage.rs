// src/stage.rs

//! Staging orchestrator
//!
//! One invocation moves through these phases:
//!
//! 1. take the staging lock (waiting if another run holds it)
//! 2. reverse leftovers of a crashed run, if a manifest is present
//! 3. scan `.config` and decide what happens to each file
//! 4. copy files into the project root, recording every file and
//!    directory created
//! 5. hide staged files from VS Code and git (best effort)
//! 6. persist the manifest
//! 7. run the guarded command, or wait for an interrupt in standalone mode
//! 8. reverse everything exactly once and release the lock
//!
//! A failed copy aborts the run and rolls back everything staged so far.

use crate::cleanup::{self, CleanupPlan, CleanupReport};
use crate::config::{self, ConfikConfig, LOCK_FILENAME, SOURCE_DIRNAME};
use crate::error::{Error, Result};
use crate::fsutil::{self, DirCache, DirStatus};
use crate::gitignore::{self, GitContext};
use crate::lock::StagingLock;
use crate::manifest::Manifest;
use crate::patterns::matches_pattern_list;
use crate::runner::{self, CommandOutcome};
use crate::signals::{self, InterruptListener};
use crate::vscode::{self, VsCodeContext};
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Switches for one staging run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOptions {
    /// Report what would happen without touching the project root
    pub dry_run: bool,
    /// Allow `.git/info/exclude` integration (still subject to the config)
    pub gitignore: bool,
    /// Allow the built-in registry skip list (still subject to the config)
    pub registry: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            gitignore: true,
            registry: true,
        }
    }
}

/// Why a source file was not staged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Something already exists at the destination, or its parent could
    /// not be prepared
    Existing,
    /// Matched a user exclude pattern
    Excluded,
    /// Listed in the registry and not overridden
    Registry,
}

/// What happened to one source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Staged,
    Skipped(SkipReason),
}

/// Per-disposition lists of source-relative paths
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub staged: Vec<String>,
    pub skipped_existing: Vec<String>,
    pub skipped_excluded: Vec<String>,
    pub skipped_registry: Vec<String>,
}

impl Summary {
    fn record(&mut self, rel: String, disposition: Disposition) {
        let list = match disposition {
            Disposition::Staged => &mut self.staged,
            Disposition::Skipped(SkipReason::Existing) => &mut self.skipped_existing,
            Disposition::Skipped(SkipReason::Excluded) => &mut self.skipped_excluded,
            Disposition::Skipped(SkipReason::Registry) => &mut self.skipped_registry,
        };
        list.push(rel);
    }

    /// Summary lines, omitting empty categories
    pub fn lines(&self, dry_run: bool) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.staged.is_empty() {
            let verb = if dry_run { "would stage" } else { "staged" };
            lines.push(format!("confik: {} {} file(s)", verb, self.staged.len()));
        }
        if !self.skipped_existing.is_empty() {
            lines.push(format!(
                "confik: skipped {} existing file(s)",
                self.skipped_existing.len()
            ));
        }
        if !self.skipped_excluded.is_empty() {
            lines.push(format!(
                "confik: excluded {} file(s)",
                self.skipped_excluded.len()
            ));
        }
        if !self.skipped_registry.is_empty() {
            lines.push(format!(
                "confik: registry-skipped {} file(s)",
                self.skipped_registry.len()
            ));
        }
        lines
    }

    fn print(&self, dry_run: bool) {
        for line in self.lines(dry_run) {
            println!("{line}");
        }
    }
}

/// In-memory record of one run's effects
///
/// Paths are absolute here and become root-relative in the [`Manifest`].
#[derive(Debug)]
pub struct StagingRun {
    pub root: PathBuf,
    pub run_id: String,
    pub created_files: Vec<PathBuf>,
    pub created_dirs: Vec<PathBuf>,
    pub gitignore: Option<GitContext>,
    pub vscode: Option<VsCodeContext>,
    pub created_at: String,
    carried: Leftovers,
    manifest_written: bool,
    cleaned: bool,
}

/// What an incomplete recovery of an earlier run could not reverse
///
/// Kept on this run's manifest so a later `--clean` can retry it.
#[derive(Debug, Default)]
struct Leftovers {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    gitignore: Vec<GitContext>,
    vscode: Vec<VsCodeContext>,
}

impl Leftovers {
    fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.dirs.is_empty()
            && self.gitignore.is_empty()
            && self.vscode.is_empty()
    }
}

impl StagingRun {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            run_id: new_run_id(),
            created_files: Vec::new(),
            created_dirs: Vec::new(),
            gitignore: None,
            vscode: None,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            carried: Leftovers::default(),
            manifest_written: false,
            cleaned: false,
        }
    }

    /// Take over whatever an incomplete recovery left behind
    pub fn carry_over(&mut self, report: CleanupReport) {
        for path in report.remaining {
            if fsutil::is_directory(&path) {
                self.carried.dirs.push(path);
            } else {
                self.carried.files.push(path);
            }
        }
        self.carried.gitignore.extend(report.unreversed_gitignore);
        self.carried.vscode.extend(report.unreversed_vscode);
    }

    pub fn manifest(&self) -> Manifest {
        let files: Vec<PathBuf> = self
            .created_files
            .iter()
            .chain(&self.carried.files)
            .cloned()
            .collect();
        let dirs: Vec<PathBuf> = self
            .created_dirs
            .iter()
            .chain(&self.carried.dirs)
            .cloned()
            .collect();
        Manifest {
            run_id: self.run_id.clone(),
            created_files: fsutil::to_relative_paths(&self.root, &fsutil::unique(&files)),
            created_dirs: fsutil::to_relative_paths(&self.root, &fsutil::unique(&dirs)),
            gitignore: self.gitignore.clone(),
            vscode: self.vscode.clone(),
            carried_gitignore: self.carried.gitignore.clone(),
            carried_vscode: self.carried.vscode.clone(),
            created_at: self.created_at.clone(),
        }
    }

    /// Write the manifest; required before the guarded command starts
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        self.manifest().write(path)?;
        self.manifest_written = true;
        Ok(())
    }

    /// Reverse every recorded effect and release `lock`
    ///
    /// Runs at most once; later calls return an empty report. Leftovers of
    /// an earlier run are retried after this run's own effects. If they
    /// still cannot be reversed the manifest is kept, but the returned
    /// report only covers this run.
    pub fn cleanup(&mut self, manifest_path: &Path, lock: Option<&mut StagingLock>) -> CleanupReport {
        if self.cleaned {
            debug!("Cleanup for run {} already done", self.run_id);
            return CleanupReport::default();
        }
        self.cleaned = true;

        info!("Cleaning up run {}", self.run_id);
        let mut plan = CleanupPlan {
            manifest_path,
            created_files: &self.created_files,
            created_dirs: &self.created_dirs,
            vscode: self.vscode.as_slice(),
            gitignore: self.gitignore.as_slice(),
            remove_manifest: self.manifest_written,
        };
        let mut report = plan.reverse();

        if !self.carried.is_empty() {
            let carried = CleanupPlan {
                manifest_path,
                created_files: &self.carried.files,
                created_dirs: &self.carried.dirs,
                vscode: &self.carried.vscode,
                gitignore: &self.carried.gitignore,
                remove_manifest: false,
            }
            .reverse();
            if !carried.is_clean() {
                warn!(
                    "Leftovers of an earlier run remain ({}); keeping {} for `confik --clean`",
                    carried,
                    manifest_path.display()
                );
                plan.remove_manifest = false;
            }
        }

        plan.finish(&mut report, lock);
        report
    }
}

/// Unique id for a run: UTC timestamp plus 32 random bits
pub fn new_run_id() -> String {
    format!(
        "{}-{:08x}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        rand::random::<u32>()
    )
}

/// Decides and performs the staging of each source file
#[derive(Debug)]
pub struct Stager {
    root: PathBuf,
    source: PathBuf,
    options: StageOptions,
    config: ConfikConfig,
    registry: Vec<String>,
    cache: DirCache,
}

impl Stager {
    /// Prepare to stage `root/.config` into `root`
    pub fn new(root: &Path, options: StageOptions) -> Self {
        let source = root.join(SOURCE_DIRNAME);
        let config = ConfikConfig::load(&source);
        let registry = if options.registry && config.registry {
            config::registry_patterns()
        } else {
            Vec::new()
        };

        Self {
            root: root.to_path_buf(),
            source,
            options,
            config,
            registry,
            cache: DirCache::new(),
        }
    }

    pub fn config(&self) -> &ConfikConfig {
        &self.config
    }

    /// Every non-directory entry under the source directory, sorted by name
    pub fn scan(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| !entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Stage every scanned file into `run`, recording dispositions
    ///
    /// Stops at the first copy failure; whatever was staged before it is
    /// still recorded in `run` so the caller can roll it back.
    pub fn stage_all(&mut self, run: &mut StagingRun, summary: &mut Summary) -> Result<()> {
        for src in self.scan() {
            let Some(rel) = fsutil::relative_key(&self.source, &src) else {
                continue;
            };
            if config::is_reserved(&rel) {
                continue;
            }

            let disposition = self.stage_file(run, &src, &rel)?;
            debug!("{} -> {:?}", rel, disposition);
            summary.record(rel, disposition);
        }
        Ok(())
    }

    /// Decide what to do with one file and, if staging, copy it
    ///
    /// Order of checks: user excludes, registry (unless overridden), an
    /// existing destination. Only a failed copy is an error.
    pub fn stage_file(&mut self, run: &mut StagingRun, src: &Path, rel: &str) -> Result<Disposition> {
        if matches_pattern_list(rel, &self.config.exclude, true) {
            return Ok(Disposition::Skipped(SkipReason::Excluded));
        }
        if matches_pattern_list(rel, &self.registry, true)
            && !matches_pattern_list(rel, &self.config.registry_override, true)
        {
            return Ok(Disposition::Skipped(SkipReason::Registry));
        }

        let dest = fsutil::join_relative(&self.root, rel);
        if fsutil::exists(&dest) {
            return Ok(Disposition::Skipped(SkipReason::Existing));
        }

        if let Some(parent) = dest.parent() {
            match fsutil::ensure_dir(
                parent,
                self.options.dry_run,
                &mut self.cache,
                &mut run.created_dirs,
            ) {
                Ok(DirStatus::Ready) => {}
                Ok(DirStatus::Blocked) => return Ok(Disposition::Skipped(SkipReason::Existing)),
                Err(e) => {
                    debug!("Cannot prepare {}: {}", parent.display(), e);
                    return Ok(Disposition::Skipped(SkipReason::Existing));
                }
            }
        }

        if !self.options.dry_run {
            fsutil::copy_file(src, &dest).map_err(|source| Error::Copy {
                path: src.to_path_buf(),
                source,
            })?;
        }
        run.created_files.push(dest);
        Ok(Disposition::Staged)
    }

    /// Hide staged files from VS Code and git; failures only warn
    pub fn apply_integrations(&self, run: &mut StagingRun) {
        if self.config.vscode_exclude {
            let staged = run.created_files.clone();
            match vscode::apply_excludes(
                &self.root,
                &staged,
                &mut run.created_files,
                &mut run.created_dirs,
            ) {
                Ok(ctx) => run.vscode = ctx,
                Err(e) => warn!("Failed to add VS Code excludes: {}", e),
            }
        }

        if self.options.gitignore && self.config.gitignore {
            run.gitignore = self.apply_gitignore(run);
        }
    }

    fn apply_gitignore(&self, run: &StagingRun) -> Option<GitContext> {
        let Some(git_root) = gitignore::find_git_root(&self.root) else {
            debug!("{} is not inside a git repository", self.root.display());
            return None;
        };
        let git_dir = match gitignore::resolve_git_dir(&git_root) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Skipping git exclude: {}", e);
                return None;
            }
        };

        let paths: Vec<String> = run
            .created_files
            .iter()
            .filter_map(|file| fsutil::relative_key(&git_root, file))
            .collect();
        if paths.is_empty() {
            return None;
        }

        match gitignore::append_block(&git_dir, &run.run_id, &paths) {
            Ok(exclude) => Some(GitContext {
                git_root: git_root.to_string_lossy().into_owned(),
                git_dir: git_dir.to_string_lossy().into_owned(),
                exclude_path: exclude.to_string_lossy().into_owned(),
                run_id: run.run_id.clone(),
            }),
            Err(e) => {
                warn!("Failed to update git exclude: {}", e);
                None
            }
        }
    }
}

/// How the guarded phase ended
enum Ending {
    Exited(i32),
    Interrupted(i32),
    Failed(Error),
}

/// Stage `.config` into `root`, run `command`, then clean up
///
/// Returns the exit code the process should end with. An empty `command`
/// means standalone mode: staged files stay in place until an interrupt.
pub fn run(root: &Path, options: &StageOptions, command: &[String]) -> Result<i32> {
    let source = root.join(SOURCE_DIRNAME);
    if !fsutil::is_directory(&source) {
        eprintln!("confik: no .config directory found, continuing without staging");
        return run_unstaged(command);
    }

    let mut lock = StagingLock::acquire(&source.join(LOCK_FILENAME))?;
    let listener = InterruptListener::install()?;

    let manifest_path = cleanup::manifest_path(root);
    let mut leftovers = None;
    if fsutil::exists(&manifest_path) {
        info!("Found manifest from a previous run; recovering");
        match cleanup::clean_leftovers(root, false, true) {
            Ok(()) => {}
            Err(Error::CleanupIncomplete(report)) => {
                warn!("Recovery of previous run incomplete: {}", report);
                leftovers = Some(report);
            }
            Err(e) => warn!("Recovery of previous run failed: {}", e),
        }
    }

    let mut stager = Stager::new(root, options.clone());
    let mut run = StagingRun::new(root);
    if let Some(report) = leftovers {
        run.carry_over(report);
    }
    let mut summary = Summary::default();

    if let Err(e) = stager.stage_all(&mut run, &mut summary) {
        let report = run.cleanup(&manifest_path, Some(&mut lock));
        if !report.is_clean() {
            warn!("Rollback incomplete: {}", report);
        }
        return Err(e);
    }

    summary.print(options.dry_run);

    if options.dry_run {
        lock.release()?;
        if summary.staged.is_empty() {
            println!("confik: dry-run complete. No files to stage.");
        } else {
            println!("confik: dry-run complete. No files were written.");
        }
        return Ok(0);
    }

    if run.created_files.is_empty() {
        println!("confik: no files to stage");
        lock.release()?;
        drop(listener);
        return run_unstaged(command);
    }

    stager.apply_integrations(&mut run);

    if let Err(e) = run.persist(&manifest_path) {
        let report = run.cleanup(&manifest_path, Some(&mut lock));
        if !report.is_clean() {
            warn!("Rollback incomplete: {}", report);
        }
        return Err(e);
    }
    info!("Run {} staged {} file(s)", run.run_id, summary.staged.len());

    let ending = match listener.received() {
        Some(signal) => Ending::Interrupted(signal),
        None => match command.split_first() {
            Some((program, args)) => match runner::run_guarded(program, args, &listener) {
                Ok(CommandOutcome::Exited(code)) => Ending::Exited(code),
                Ok(CommandOutcome::Interrupted(signal)) => Ending::Interrupted(signal),
                Err(e) => Ending::Failed(e),
            },
            None => {
                eprintln!("confik: files staged; press Ctrl-C to clean up");
                Ending::Interrupted(listener.wait())
            }
        },
    };

    listener.disarm();
    if let Ending::Interrupted(signal) = ending {
        eprintln!(
            "confik: received {}, cleaning up...",
            signals::signal_name(signal)
        );
    }
    let report = run.cleanup(&manifest_path, Some(&mut lock));

    match ending {
        Ending::Failed(e) => {
            if !report.is_clean() {
                warn!("Cleanup incomplete: {}", report);
            }
            Err(e)
        }
        _ if !report.is_clean() => Err(Error::CleanupIncomplete(report)),
        Ending::Exited(code) => Ok(code),
        Ending::Interrupted(_) if command.is_empty() => Ok(0),
        Ending::Interrupted(signal) => Ok(128 + signal),
    }
}

/// Run `command` without staging anything
fn run_unstaged(command: &[String]) -> Result<i32> {
    let Some((program, args)) = command.split_first() else {
        return Ok(0);
    };
    let listener = InterruptListener::install()?;
    match runner::run_guarded(program, args, &listener)? {
        CommandOutcome::Exited(code) => Ok(code),
        CommandOutcome::Interrupted(signal) => Ok(128 + signal),
    }
}

/// `--clean`: reverse leftovers under `root` while holding the lock
pub fn clean(root: &Path) -> Result<()> {
    let source = root.join(SOURCE_DIRNAME);
    if !fsutil::is_directory(&source) {
        eprintln!("confik: no .config directory found, continuing without staging");
        return Ok(());
    }

    let mut lock = StagingLock::acquire(&source.join(LOCK_FILENAME))?;
    let result = cleanup::clean_leftovers(root, true, false);
    lock.release()?;
    result
}
