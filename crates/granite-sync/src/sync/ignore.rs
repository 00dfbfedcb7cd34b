//! Ignore-pattern matching for change detection and staging.

use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Compiled `ignore_patterns`.
///
/// A path is ignored when a pattern matches the whole relative path, its
/// file name, or any single directory component. So `__pycache__` hides
/// everything below any `__pycache__` directory and `*.pyc` hides those
/// files at any depth.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    patterns: Vec<Pattern>,
}

impl IgnoreSet {
    /// Compiles the patterns, skipping (and logging) any that are invalid.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Pattern::new(p.as_ref()) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    log::warn!("Skipping invalid ignore pattern '{}': {}", p.as_ref(), e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Checks a repository-relative path (forward slashes, as git prints them).
    pub fn is_ignored(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        self.patterns.iter().any(|pattern| {
            pattern.matches_with(path, MATCH_OPTIONS)
                || path
                    .split('/')
                    .any(|component| pattern.matches_with(component, MATCH_OPTIONS))
        })
    }
}
