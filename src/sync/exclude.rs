//! Exclusion patterns for the mirror.
//!
//! A pattern is a plain string, not a glob. A path is excluded when any
//! pattern is a substring of the path, equals its final segment, or is a
//! suffix of it. The same rules apply to local paths (native form) and to
//! remote paths (forward-slash form).

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::remote::remote_file_name;

/// Patterns excluded when the caller does not supply its own list.
pub const DEFAULT_EXCLUDES: &[&str] = &[".venv", ".git", ".ruff_cache", "__pycache__"];

/// Unordered set of exclusion patterns, fixed for one synchronization call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ExclusionSet {
    patterns: BTreeSet<String>,
}

impl ExclusionSet {
    /// Empty set; nothing is excluded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set holding [`DEFAULT_EXCLUDES`].
    pub fn with_defaults() -> Self {
        DEFAULT_EXCLUDES.iter().copied().collect()
    }

    /// Add a pattern. Empty patterns are ignored, since an empty substring
    /// would exclude every path. The CLI rejects them before they get here;
    /// config lists drop them.
    pub fn insert(&mut self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        if !pattern.is_empty() {
            self.patterns.insert(pattern);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }

    /// Check a local path.
    pub fn excludes_local(&self, path: &Path) -> bool {
        let full = path.to_string_lossy();
        let name = path.file_name().map(|n| n.to_string_lossy());
        is_excluded(&full, name.as_deref(), self.iter())
    }

    /// Check a remote path given in forward-slash form.
    pub fn excludes_remote(&self, path: &str) -> bool {
        let name = Some(remote_file_name(path)).filter(|n| !n.is_empty());
        is_excluded(path, name, self.iter())
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for pattern in iter {
            set.insert(pattern);
        }
        set
    }
}

impl<S: Into<String>> Extend<S> for ExclusionSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for pattern in iter {
            self.insert(pattern);
        }
    }
}

impl From<Vec<String>> for ExclusionSet {
    fn from(patterns: Vec<String>) -> Self {
        patterns.into_iter().collect()
    }
}

impl From<ExclusionSet> for Vec<String> {
    fn from(set: ExclusionSet) -> Self {
        set.patterns.into_iter().collect()
    }
}

/// Core classifier: true on the first pattern that is contained in `path`,
/// equals `base_name`, or ends `path`.
pub fn is_excluded<'a>(
    path: &str,
    base_name: Option<&str>,
    patterns: impl IntoIterator<Item = &'a str>,
) -> bool {
    patterns.into_iter().any(|pattern| {
        path.contains(pattern) || base_name == Some(pattern) || path.ends_with(pattern)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_empty_set_excludes_nothing() {
        let set = ExclusionSet::new();
        assert!(!set.excludes_remote("app/.git/HEAD"));
        assert!(!set.excludes_local(Path::new("/tmp/app/.git")));
    }

    #[test]
    fn test_substring_match() {
        let set: ExclusionSet = [".git"].into_iter().collect();
        assert!(set.excludes_remote("/home/pi/app/.git/HEAD"));
        assert!(set.excludes_remote("app/.github"));
        assert!(!set.excludes_remote("app/main.sh"));
    }

    #[test]
    fn test_base_name_match_on_both_sides() {
        let set: ExclusionSet = ["__pycache__"].into_iter().collect();
        let local = PathBuf::from("/work/project/app/__pycache__");
        assert!(set.excludes_local(&local));
        assert!(set.excludes_remote("app/__pycache__"));
        assert!(set.excludes_remote("app/__pycache__/"));
    }

    #[test]
    fn test_suffix_match() {
        assert!(is_excluded("logs/run.log", Some("run.log"), [".log"]));
        assert!(!is_excluded("logs/run.txt", Some("run.txt"), [".log"]));
    }

    #[test]
    fn test_empty_pattern_ignored() {
        let mut set = ExclusionSet::new();
        set.insert("");
        assert!(set.is_empty());
        assert!(!set.excludes_remote("anything"));
    }

    #[test]
    fn test_defaults() {
        let set = ExclusionSet::with_defaults();
        assert_eq!(set.len(), DEFAULT_EXCLUDES.len());
        assert!(set.excludes_remote("app/.venv/bin/python"));
        assert!(set.excludes_remote("app/.ruff_cache"));
    }

    #[test]
    fn test_serde_as_list() {
        let set: ExclusionSet = serde_json::from_str(r#"[".git", ".venv", ".git"]"#).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"[".git",".venv"]"#);
        let with_blank: ExclusionSet = serde_json::from_str(r#"["", "target"]"#).unwrap();
        assert_eq!(with_blank.len(), 1);
    }
}
