// src/manifest.rs

//! Durable record of one staging run
//!
//! Written to `.config/.confik-manifest.json` after staging and before the
//! guarded command starts, so a crashed run can still be reversed by a later
//! `--clean` or by the recovery pass at the start of the next run.

use crate::config::MANIFEST_TEMP_SUFFIX;
use crate::error::{Error, Result};
use crate::gitignore::GitContext;
use crate::vscode::VsCodeContext;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Effects of a staging run; paths are relative to the project root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub run_id: String,
    #[serde(default)]
    pub created_files: Vec<String>,
    #[serde(default)]
    pub created_dirs: Vec<String>,
    #[serde(default)]
    pub gitignore: Option<GitContext>,
    #[serde(default)]
    pub vscode: Option<VsCodeContext>,
    /// Ignore blocks of earlier runs that could not be removed yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub carried_gitignore: Vec<GitContext>,
    /// Settings edits of earlier runs that could not be reverted yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub carried_vscode: Vec<VsCodeContext>,
    pub created_at: String,
}

impl Manifest {
    /// Persist the manifest at `path`, replacing any previous one atomically
    ///
    /// The content goes to a sibling temp file (owner-only on Unix) that is
    /// synced and then renamed over `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut data = serde_json::to_string_pretty(self)?;
        data.push('\n');

        let temp = temp_path(path);
        let written = write_private(&temp, data.as_bytes()).and_then(|()| fs::rename(&temp, path));
        if let Err(source) = written {
            let _ = fs::remove_file(&temp);
            return Err(Error::ManifestWrite {
                path: path.to_path_buf(),
                source,
            });
        }

        debug!("Wrote manifest {} for run {}", path.display(), self.run_id);
        Ok(())
    }

    /// Load a manifest; malformed content is [`Error::CorruptManifest`]
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| Error::CorruptManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!("{}{}", MANIFEST_TEMP_SUFFIX, std::process::id()));
    path.with_file_name(name)
}

fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}
