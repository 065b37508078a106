//! Pipe-delimited extension sets such as `html|css|js`.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;

/// A set of file extensions, compared case-insensitively.
///
/// An empty set matches every path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuffixFilter(BTreeSet<String>);

impl SuffixFilter {
    /// Parse `html|css|js`. Leading dots and blank segments are ignored.
    pub fn parse(spec: &str) -> Self {
        Self(
            spec.split('|')
                .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Filter that lets every file through
    pub fn all() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `ext` (without the dot) is in the set
    pub fn contains(&self, ext: &str) -> bool {
        self.0.contains(&ext.to_ascii_lowercase())
    }

    /// Whether `path` passes the filter
    pub fn matches(&self, path: &Path) -> bool {
        if self.is_empty() {
            return true;
        }
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| self.contains(ext))
    }
}

impl fmt::Display for SuffixFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(String::as_str).collect();
        write!(f, "{}", joined.join("|"))
    }
}
