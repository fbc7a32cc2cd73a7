// src/vscode.rs

//! `files.exclude` entries in `.vscode/settings.json`
//!
//! Staged files are hidden from the editor's explorer by adding one
//! `"<path>": true` entry per file. The settings document is edited through
//! [`crate::jsonc`], so comments and formatting a human put there survive
//! both the patch and its reversal.

use crate::error::{Error, Result};
use crate::fsutil::{self, DirCache, DirStatus};
use crate::jsonc::{Document, Kind, Member, Object, Value};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SETTINGS_DIRNAME: &str = ".vscode";
pub const SETTINGS_FILENAME: &str = "settings.json";
pub const FILES_EXCLUDE_KEY: &str = "files.exclude";

/// What one run changed in the settings document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VsCodeContext {
    pub settings_path: String,
    pub added_keys: Vec<String>,
    pub files_exclude_created: bool,
    pub settings_created: bool,
}

impl VsCodeContext {
    pub fn settings_path(&self) -> PathBuf {
        PathBuf::from(&self.settings_path)
    }
}

/// Path of the settings document under a project root
pub fn settings_path(root: &Path) -> PathBuf {
    root.join(SETTINGS_DIRNAME).join(SETTINGS_FILENAME)
}

/// Add a `files.exclude` entry for every staged path under `root`
///
/// A settings file created from scratch is appended to `created_files` and
/// its directory (if new) to `created_dirs`. Returns `Ok(None)` when there
/// is nothing to add or the existing document cannot be patched safely.
pub fn apply_excludes(
    root: &Path,
    staged: &[PathBuf],
    created_files: &mut Vec<PathBuf>,
    created_dirs: &mut Vec<PathBuf>,
) -> Result<Option<VsCodeContext>> {
    let keys: Vec<String> = fsutil::unique(
        &staged
            .iter()
            .filter_map(|path| fsutil::relative_key(root, path))
            .collect::<Vec<_>>(),
    );
    if keys.is_empty() {
        return Ok(None);
    }

    let path = settings_path(root);
    if !fsutil::exists(&path) {
        return create_settings(&path, keys, created_files, created_dirs);
    }

    let content = fs::read_to_string(&path)?;
    let mut doc = match Document::parse(&content) {
        Ok(doc) if doc.root().as_object().is_some() => doc,
        Ok(_) => {
            warn!("{} is not a JSON object; skipping VS Code excludes", path.display());
            return Ok(None);
        }
        Err(e) => {
            warn!(
                "Unable to parse {} (must be valid JSON/JSONC): {}",
                path.display(),
                e
            );
            return Ok(None);
        }
    };

    let minified = !content.contains('\n');
    let Some(root_object) = doc.root_mut().as_object_mut() else {
        return Ok(None);
    };
    let unit = root_object.indent_unit();
    let root_indent = root_object
        .member_indent()
        .map(str::to_string)
        .unwrap_or_else(|| unit.clone());

    let Some((exclude, created)) = ensure_exclude_object(root_object, minified, &root_indent) else {
        warn!(
            "{} {} is not an object; skipping VS Code excludes",
            path.display(),
            FILES_EXCLUDE_KEY
        );
        return Ok(None);
    };

    let key_indent = exclude
        .member_indent()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{root_indent}{unit}"));
    let (name_before, value_before) = if minified {
        (String::new(), "")
    } else {
        (format!("\n{key_indent}"), " ")
    };

    let mut added_keys = Vec::new();
    for key in keys {
        if exclude.contains_key(&key) {
            debug!("{} already excluded in {}", key, path.display());
            continue;
        }
        exclude.push(Member::new(
            &key,
            Value::boolean(true),
            &name_before,
            value_before,
        ));
        added_keys.push(key);
    }

    if added_keys.is_empty() && !created {
        return Ok(None);
    }

    write_settings(&path, &doc.to_string())?;
    debug!("Added {} exclude(s) to {}", added_keys.len(), path.display());

    Ok(Some(VsCodeContext {
        settings_path: path.to_string_lossy().into_owned(),
        added_keys,
        files_exclude_created: created,
        settings_created: false,
    }))
}

fn create_settings(
    path: &Path,
    keys: Vec<String>,
    created_files: &mut Vec<PathBuf>,
    created_dirs: &mut Vec<PathBuf>,
) -> Result<Option<VsCodeContext>> {
    let Some(dir) = path.parent() else {
        return Ok(None);
    };
    let mut cache = DirCache::new();
    if fsutil::ensure_dir(dir, false, &mut cache, created_dirs)? == DirStatus::Blocked {
        warn!("Cannot create {}; skipping VS Code excludes", dir.display());
        return Ok(None);
    }

    let map: serde_json::Map<String, serde_json::Value> = keys
        .iter()
        .map(|key| (key.clone(), serde_json::Value::Bool(true)))
        .collect();
    let mut settings = serde_json::Map::new();
    settings.insert(FILES_EXCLUDE_KEY.to_string(), serde_json::Value::Object(map));

    let mut data = serde_json::to_string_pretty(&settings)?;
    data.push('\n');
    write_settings(path, &data)?;
    created_files.push(path.to_path_buf());
    debug!("Created {}", path.display());

    Ok(Some(VsCodeContext {
        settings_path: path.to_string_lossy().into_owned(),
        added_keys: keys,
        files_exclude_created: true,
        settings_created: true,
    }))
}

/// Find `files.exclude`, creating an empty object member if absent
///
/// Returns `None` when the member exists with a non-object value.
fn ensure_exclude_object<'a>(
    root: &'a mut Object,
    minified: bool,
    root_indent: &str,
) -> Option<(&'a mut Object, bool)> {
    let created = match root.position(FILES_EXCLUDE_KEY) {
        Some(index) => {
            root.members[index].value.as_object()?;
            false
        }
        None => {
            let mut object = Object::default();
            let (name_before, value_before) = if minified {
                (String::new(), "")
            } else {
                object.close_trivia = format!("\n{root_indent}");
                (format!("\n{root_indent}"), " ")
            };
            root.push(Member::new(
                FILES_EXCLUDE_KEY,
                Value::new(Kind::Object(object)),
                &name_before,
                value_before,
            ));
            true
        }
    };

    let exclude = root.get_mut(FILES_EXCLUDE_KEY)?.as_object_mut()?;
    Some((exclude, created))
}

/// Reverse the entries recorded in `ctx`
///
/// Only keys this run added are removed. The `files.exclude` member goes if
/// this run created it and it is now empty; the whole file goes if this run
/// created it, nothing else remains, and no comment was added since. A
/// missing or unparsable document means there is nothing to do.
pub fn remove_excludes(ctx: &VsCodeContext) -> Result<()> {
    if ctx.settings_path.is_empty() {
        return Ok(());
    }
    let path = ctx.settings_path();

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            debug!("Nothing to restore in {}: {}", path.display(), e);
            return Ok(());
        }
    };
    let mut doc = match Document::parse(&content) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Leaving unparsable {} untouched: {}", path.display(), e);
            return Ok(());
        }
    };
    let commented = doc.has_comments();

    let Some(root) = doc.root_mut().as_object_mut() else {
        return Ok(());
    };
    let Some(index) = root.position(FILES_EXCLUDE_KEY) else {
        return Ok(());
    };
    let Some(exclude) = root.members[index].value.as_object_mut() else {
        return Ok(());
    };

    let mut changed = false;
    for key in &ctx.added_keys {
        if exclude.remove(key).is_some() {
            changed = true;
        }
    }
    if ctx.files_exclude_created && exclude.is_empty() {
        root.members.remove(index);
        changed = true;
    }
    let now_empty = root.is_empty();

    if changed {
        write_settings(&path, &doc.to_string())?;
        debug!("Removed excludes from {}", path.display());
    }

    if ctx.settings_created && now_empty && !commented {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(Error::Settings { path, source }),
        }
        debug!("Removed {}", path.display());
        if let Some(dir) = path.parent()
            && let Err(e) = fsutil::remove_dir_if_empty(dir)
        {
            debug!("Failed to remove {}: {}", dir.display(), e);
        }
    }

    Ok(())
}

fn write_settings(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|source| Error::Settings {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(initial: Option<&str>) -> (tempfile::TempDir, PathBuf) {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = settings_path(temp_dir.path());
        if let Some(initial) = initial {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, initial).unwrap();
        }
        (temp_dir, path)
    }

    fn apply(root: &Path, names: &[&str]) -> (Option<VsCodeContext>, Vec<PathBuf>, Vec<PathBuf>) {
        let staged: Vec<PathBuf> = names.iter().map(|n| root.join(n)).collect();
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let ctx = apply_excludes(root, &staged, &mut files, &mut dirs).unwrap();
        (ctx, files, dirs)
    }

    #[test]
    fn test_apply_preserves_comments() {
        let initial = "{\n  // note\n  \"files.exclude\": {\n    \"keep.txt\": true\n  }\n}\n";
        let (temp_dir, path) = setup(Some(initial));

        let (ctx, files, dirs) = apply(temp_dir.path(), &["example.txt"]);
        let ctx = ctx.unwrap();
        assert_eq!(ctx.added_keys, vec!["example.txt"]);
        assert!(!ctx.files_exclude_created);
        assert!(!ctx.settings_created);
        assert!(files.is_empty());
        assert!(dirs.is_empty());

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "{\n  // note\n  \"files.exclude\": {\n    \"keep.txt\": true,\n    \"example.txt\": true\n  }\n}\n"
        );

        remove_excludes(&ctx).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), initial);
    }

    #[test]
    fn test_apply_creates_exclude_member() {
        let initial = "{\n\t\"editor.tabSize\": 4\n}\n";
        let (temp_dir, path) = setup(Some(initial));

        let (ctx, _, _) = apply(temp_dir.path(), &["a.txt", "nested/b.txt"]);
        let ctx = ctx.unwrap();
        assert!(ctx.files_exclude_created);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "{\n\t\"editor.tabSize\": 4,\n\t\"files.exclude\": {\n\t\t\"a.txt\": true,\n\t\t\"nested/b.txt\": true\n\t}\n}\n"
        );

        remove_excludes(&ctx).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), initial);
    }

    #[test]
    fn test_apply_skips_non_object_exclude() {
        let initial = r#"{"files.exclude": true}"#;
        let (temp_dir, path) = setup(Some(initial));

        let (ctx, _, _) = apply(temp_dir.path(), &["example.txt"]);
        assert!(ctx.is_none());
        assert_eq!(fs::read_to_string(&path).unwrap(), initial);
    }

    #[test]
    fn test_apply_skips_unparsable_settings() {
        let initial = "{ this is not json";
        let (temp_dir, path) = setup(Some(initial));

        let (ctx, _, _) = apply(temp_dir.path(), &["example.txt"]);
        assert!(ctx.is_none());
        assert_eq!(fs::read_to_string(&path).unwrap(), initial);
    }

    #[test]
    fn test_apply_keeps_minified_format() {
        let (temp_dir, path) = setup(Some(r#"{"files.exclude":{"keep.txt":true}}"#));

        let (ctx, _, _) = apply(temp_dir.path(), &["example.txt"]);
        assert!(ctx.is_some());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            r#"{"files.exclude":{"keep.txt":true,"example.txt":true}}"#
        );
    }

    #[test]
    fn test_apply_skips_existing_keys_and_outside_paths() {
        let (temp_dir, _) = setup(Some(r#"{"files.exclude":{"a.txt":true}}"#));
        let outside = temp_dir.path().parent().unwrap().join("elsewhere.txt");

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let ctx = apply_excludes(
            temp_dir.path(),
            &[temp_dir.path().join("a.txt"), outside],
            &mut files,
            &mut dirs,
        )
        .unwrap();
        assert!(ctx.is_none());
    }

    #[test]
    fn test_created_settings_removed_when_empty() {
        let (temp_dir, path) = setup(None);

        let (ctx, files, dirs) = apply(temp_dir.path(), &["example.txt"]);
        let ctx = ctx.unwrap();
        assert!(ctx.settings_created);
        assert_eq!(files, vec![path.clone()]);
        assert_eq!(dirs, vec![temp_dir.path().join(SETTINGS_DIRNAME)]);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\n  \"files.exclude\": {\n    \"example.txt\": true\n  }\n}\n"
        );

        remove_excludes(&ctx).unwrap();
        assert!(!path.exists());
        assert!(!temp_dir.path().join(SETTINGS_DIRNAME).exists());
    }

    #[test]
    fn test_created_settings_keeps_user_edits() {
        let (temp_dir, path) = setup(None);
        let (ctx, _, _) = apply(temp_dir.path(), &["example.txt"]);
        let ctx = ctx.unwrap();

        let mut settings: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        settings["editor.tabSize"] = serde_json::json!(2);
        fs::write(&path, serde_json::to_string_pretty(&settings).unwrap() + "\n").unwrap();

        remove_excludes(&ctx).unwrap();

        let after: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(after["editor.tabSize"], 2);
        assert!(after.get(FILES_EXCLUDE_KEY).is_none());
    }

    #[test]
    fn test_created_settings_kept_when_commented() {
        let (temp_dir, path) = setup(None);
        let (ctx, _, _) = apply(temp_dir.path(), &["example.txt"]);
        let ctx = ctx.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, format!("// user note\n{content}")).unwrap();

        remove_excludes(&ctx).unwrap();

        let after = fs::read_to_string(&path).unwrap();
        assert!(after.contains("// user note"));
        assert!(!after.contains(FILES_EXCLUDE_KEY));
    }

    #[test]
    fn test_remove_tolerates_missing_and_broken_files() {
        let (temp_dir, path) = setup(None);
        let ctx = VsCodeContext {
            settings_path: path.to_string_lossy().into_owned(),
            added_keys: vec!["a.txt".to_string()],
            files_exclude_created: true,
            settings_created: true,
        };

        assert!(remove_excludes(&ctx).is_ok());

        fs::create_dir_all(temp_dir.path().join(SETTINGS_DIRNAME)).unwrap();
        fs::write(&path, "{ broken").unwrap();
        assert!(remove_excludes(&ctx).is_ok());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ broken");
    }
}
