//! In-place token substitution for text assets.
//!
//! Only the first match in a file is replaced. Content is handled as bytes so
//! anything around the match survives untouched, whatever its encoding.

use std::fs;
use std::path::Path;

use regex::bytes::Regex;

use crate::error::MirrorError;
use crate::suffix::SuffixFilter;

/// What to look for in a file
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact byte sequence, searched with an escaped regex
    Literal { token: String, matcher: Regex },
    /// Single regular expression
    Regex(Regex),
}

impl Pattern {
    pub fn literal(token: impl Into<String>) -> Result<Self, regex::Error> {
        let token = token.into();
        let matcher = Regex::new(&regex::escape(&token))?;
        Ok(Pattern::Literal { token, matcher })
    }

    pub fn regex(expr: &str) -> Result<Self, regex::Error> {
        Regex::new(expr).map(Pattern::Regex)
    }

    /// Source text of the pattern
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Literal { token, .. } => token,
            Pattern::Regex(re) => re.as_str(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }

    /// Replace the first match in `content`, `None` when nothing matched
    pub fn replace_first(&self, content: &[u8], replacement: &[u8]) -> Option<Vec<u8>> {
        if self.is_empty() {
            return None;
        }
        let re = match self {
            Pattern::Literal { matcher, .. } => matcher,
            Pattern::Regex(re) => re,
        };
        let m = re.find(content)?;
        let (start, end) = (m.start(), m.end());

        // Spliced by hand so `$name` in the replacement stays literal
        let mut out = Vec::with_capacity(content.len() - (end - start) + replacement.len());
        out.extend_from_slice(&content[..start]);
        out.extend_from_slice(replacement);
        out.extend_from_slice(&content[end..]);
        Some(out)
    }
}

/// Token substitution applied to files that pass `filter`
#[derive(Debug, Clone)]
pub struct Rewrite {
    pub pattern: Pattern,
    pub replacement: String,
    pub filter: SuffixFilter,
}

impl Rewrite {
    pub fn new(pattern: Pattern, replacement: impl Into<String>, filter: SuffixFilter) -> Self {
        Self {
            pattern,
            replacement: replacement.into(),
            filter,
        }
    }

    /// An empty token or replacement turns rewriting off
    pub fn is_active(&self) -> bool {
        !self.pattern.is_empty() && !self.replacement.is_empty()
    }

    pub fn applies_to(&self, path: &Path) -> bool {
        self.is_active() && self.filter.matches(path)
    }

    fn apply(&self, content: Vec<u8>) -> (Vec<u8>, bool) {
        match self
            .pattern
            .replace_first(&content, self.replacement.as_bytes())
        {
            Some(replaced) => (replaced, true),
            None => (content, false),
        }
    }
}

/// Rewrite `path` in place. Returns whether a match was replaced.
///
/// Files the rule does not apply to are not opened. Files without a match are
/// written back unchanged.
pub fn rewrite_file(path: &Path, rule: &Rewrite) -> Result<bool, MirrorError> {
    if !rule.applies_to(path) {
        return Ok(false);
    }

    let content = fs::read(path).map_err(|e| MirrorError::Rewrite {
        path: path.to_path_buf(),
        source: e,
    })?;
    let (content, replaced) = rule.apply(content);
    fs::write(path, content).map_err(|e| {
        MirrorError::io(path, e, |path, source| MirrorError::Rewrite { path, source })
    })?;

    if replaced {
        tracing::debug!(path = %path.display(), token = rule.pattern.as_str(), "token replaced");
    }
    Ok(replaced)
}

/// Async counterpart of [`rewrite_file`]
pub async fn rewrite_file_async(path: &Path, rule: &Rewrite) -> Result<bool, MirrorError> {
    if !rule.applies_to(path) {
        return Ok(false);
    }

    let content = tokio::fs::read(path)
        .await
        .map_err(|e| MirrorError::Rewrite {
            path: path.to_path_buf(),
            source: e,
        })?;
    let (content, replaced) = rule.apply(content);
    tokio::fs::write(path, content).await.map_err(|e| {
        MirrorError::io(path, e, |path, source| MirrorError::Rewrite { path, source })
    })?;

    if replaced {
        tracing::debug!(path = %path.display(), token = rule.pattern.as_str(), "token replaced");
    }
    Ok(replaced)
}
