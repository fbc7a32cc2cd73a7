// src/config.rs

//! `.config/confik.json` and the built-in registry
//!
//! The config file is optional. A missing file means defaults; a file that
//! cannot be read or parsed produces a warning and also means defaults, so a
//! typo never blocks the guarded command.

use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the source directory under the project root
pub const SOURCE_DIRNAME: &str = ".config";

/// Reserved file names inside the source directory; never staged
pub const CONFIG_FILENAME: &str = "confik.json";
pub const MANIFEST_FILENAME: &str = ".confik-manifest.json";
pub const LOCK_FILENAME: &str = ".confik.lock";
/// Appended to the manifest name (plus a pid) while it is being written
pub const MANIFEST_TEMP_SUFFIX: &str = ".tmp-";

const EMBEDDED_REGISTRY: &str = include_str!("registry.json");

/// On-disk shape of `confik.json`; absent keys keep their defaults
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    exclude: Option<Vec<String>>,
    registry: Option<bool>,
    registry_override: Option<Vec<String>>,
    gitignore: Option<bool>,
    vscode_exclude: Option<bool>,
}

/// Effective configuration for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfikConfig {
    /// Patterns never staged
    pub exclude: Vec<String>,
    /// Whether the built-in registry skip list applies
    pub registry: bool,
    /// Patterns staged even when the registry lists them
    pub registry_override: Vec<String>,
    /// Whether staged files are hidden via `.git/info/exclude`
    pub gitignore: bool,
    /// Whether staged files are hidden via `.vscode/settings.json`
    pub vscode_exclude: bool,
    /// Where the configuration was (or would have been) loaded from
    pub path: PathBuf,
}

impl ConfikConfig {
    fn defaults(path: PathBuf) -> Self {
        Self {
            exclude: Vec::new(),
            registry: true,
            registry_override: Vec::new(),
            gitignore: true,
            vscode_exclude: false,
            path,
        }
    }

    /// Load `confik.json` from the source directory
    pub fn load(source_dir: &Path) -> Self {
        let path = source_dir.join(CONFIG_FILENAME);
        let mut config = Self::defaults(path.clone());

        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No {} found, using defaults", path.display());
                return config;
            }
            Err(e) => {
                warn!("Failed to read {}; using defaults ({})", path.display(), e);
                return config;
            }
        };

        let parsed: ConfigFile = match serde_json::from_str(&data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Failed to parse {}; using defaults ({})", path.display(), e);
                return config;
            }
        };

        if let Some(exclude) = parsed.exclude {
            config.exclude = exclude;
        }
        if let Some(registry_override) = parsed.registry_override {
            config.registry_override = registry_override;
        }
        if let Some(registry) = parsed.registry {
            config.registry = registry;
        }
        if let Some(gitignore) = parsed.gitignore {
            config.gitignore = gitignore;
        }
        if let Some(vscode_exclude) = parsed.vscode_exclude {
            config.vscode_exclude = vscode_exclude;
        }

        config
    }
}

#[derive(Debug, Deserialize)]
struct RegistryPayload {
    patterns: Vec<String>,
}

/// Built-in patterns for files their tools already read from `.config`
pub fn registry_patterns() -> Vec<String> {
    match serde_json::from_str::<RegistryPayload>(EMBEDDED_REGISTRY) {
        Ok(payload) => payload.patterns,
        Err(e) => {
            warn!("Embedded registry is invalid: {}", e);
            Vec::new()
        }
    }
}

/// Whether `rel` is one of the reserved files in the source directory
///
/// Temp files left by an interrupted manifest write count as reserved too.
pub fn is_reserved(rel: &str) -> bool {
    matches!(rel, CONFIG_FILENAME | MANIFEST_FILENAME | LOCK_FILENAME)
        || rel
            .strip_prefix(MANIFEST_FILENAME)
            .is_some_and(|rest| rest.starts_with(MANIFEST_TEMP_SUFFIX))
}
