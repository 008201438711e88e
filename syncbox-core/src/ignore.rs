//! Path ignore rules shared by the snapshot walk and live events.
//!
//! Rules are regular expressions matched from the start of `/<relative path>`.
//! They are not anchored at the end, so a rule that matches a directory also
//! matches everything beneath it.

use std::path::Path;

use regex::Regex;

use crate::error::CoreError;
use crate::paths::relative_path;

/// Office-suite lock files, editor backups, hidden segments.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[r".*\.[a-zA-Z]+?#", r".*\.[a-zA-Z]+?~", r".*/(\..*)"];

#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    rules: Vec<(String, Regex)>,
}

impl IgnoreFilter {
    /// Compile `patterns` in order.
    pub fn new<I, S>(patterns: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rules = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|source| {
                CoreError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                }
            })?;
            rules.push((pattern.to_string(), regex));
        }
        Ok(Self { rules })
    }

    /// Default rules followed by `extra`.
    pub fn with_defaults<S: AsRef<str>>(extra: &[S]) -> Result<Self, CoreError> {
        let extra = extra.iter().map(|s| s.as_ref());
        Self::new(DEFAULT_IGNORE_PATTERNS.iter().copied().chain(extra))
    }

    /// The first rule matching `relative`, if any.
    pub fn matching_rule(&self, relative: &str) -> Option<&str> {
        let subject = format!("/{relative}");
        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(&subject))
            .map(|(pattern, _)| pattern.as_str())
    }

    pub fn is_ignored(&self, relative: &str) -> bool {
        self.matching_rule(relative).is_some()
    }

    /// Absolute-path variant; anything outside `root` counts as ignored.
    pub fn is_ignored_path(&self, root: &Path, path: &Path) -> bool {
        match relative_path(root, path) {
            Some(relative) => self.is_ignored(&relative),
            None => true,
        }
    }
}
