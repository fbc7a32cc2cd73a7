// src/patterns.rs

//! Glob matching for exclude, registry and override lists

use globset::GlobBuilder;
use tracing::warn;

/// Returns true if `target` matches any pattern in `patterns`
///
/// `*` stays within one path segment and `**` spans segments. With
/// `match_base`, patterns without a `/` are also tried against the basename
/// of `target`, so `vite.config.*` matches `configs/vite.config.ts`.
pub fn matches_pattern_list(target: &str, patterns: &[String], match_base: bool) -> bool {
    if patterns.is_empty() {
        return false;
    }

    let target = target.replace('\\', "/");
    let base = target.rsplit('/').next().unwrap_or(&target);

    patterns
        .iter()
        .filter(|pattern| !pattern.is_empty())
        .any(|pattern| {
            let normalized = pattern.replace('\\', "/");
            let glob = match GlobBuilder::new(&normalized).literal_separator(true).build() {
                Ok(glob) => glob.compile_matcher(),
                Err(e) => {
                    warn!("Ignoring invalid pattern '{}': {}", pattern, e);
                    return false;
                }
            };
            if match_base && !normalized.contains('/') && glob.is_match(base) {
                return true;
            }
            glob.is_match(&target)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_matches_pattern_list() {
        let list = patterns(&["**/*.local", "private/**", "vite.config.*"]);

        assert!(matches_pattern_list("foo.local", &list, true));
        assert!(matches_pattern_list("config/foo.local", &list, true));
        assert!(matches_pattern_list("private/secret.txt", &list, true));
        assert!(matches_pattern_list("configs/vite.config.ts", &list, true));
        assert!(!matches_pattern_list("config/other.ts", &list, true));
    }

    #[test]
    fn test_basename_matching_is_optional() {
        let list = patterns(&["vite.config.*"]);
        assert!(!matches_pattern_list("configs/vite.config.ts", &list, false));
        assert!(matches_pattern_list("vite.config.ts", &list, false));
    }

    #[test]
    fn test_single_star_does_not_cross_separator() {
        let list = patterns(&["private/*"]);
        assert!(matches_pattern_list("private/a.txt", &list, true));
        assert!(!matches_pattern_list("private/nested/a.txt", &list, true));
    }

    #[test]
    fn test_empty_and_invalid_patterns_never_match() {
        assert!(!matches_pattern_list("a.txt", &[], true));
        assert!(!matches_pattern_list("a.txt", &patterns(&[""]), true));
        assert!(!matches_pattern_list("a.txt", &patterns(&["a[.txt"]), true));
    }
}
