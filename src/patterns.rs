use anyhow::{Context, Result};
use regex::Regex;

/// A caller-supplied path rule, compiled once per request.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    re: Regex,
}

impl PathPattern {
    pub fn new(source: &str) -> Result<Self> {
        let re = Regex::new(source).with_context(|| format!("invalid pattern `{source}`"))?;
        Ok(Self {
            source: source.to_string(),
            re,
        })
    }

    /// Unanchored search: `src` matches `lib/src/a.rs`; use `^src/` to anchor.
    pub fn matches(&self, path: &str) -> bool {
        self.re.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Ordered list of patterns; a path matches the set if any member matches.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<PathPattern>,
}

impl PatternSet {
    /// Compile every pattern. The first invalid one fails the whole set.
    pub fn compile<S: AsRef<str>>(sources: &[S]) -> Result<Self> {
        let patterns = sources
            .iter()
            .map(|s| PathPattern::new(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }

    /// First pattern that matches, for diagnostics.
    pub fn first_match(&self, path: &str) -> Option<&PathPattern> {
        self.patterns.iter().find(|p| p.matches(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_is_unanchored() {
        let p = PathPattern::new("node_modules").unwrap();
        assert!(p.matches("node_modules/x.js"));
        assert!(p.matches("web/node_modules/y/z.js"));
        assert!(!p.matches("src/modules.rs"));
    }

    #[test]
    fn anchored_pattern_only_matches_prefix() {
        let set = PatternSet::compile(&["^src/"]).unwrap();
        assert!(set.matches("src/a.ts"));
        assert!(!set.matches("lib/src/b.ts"));
        assert!(!set.matches("lib/b.ts"));
    }

    #[test]
    fn invalid_pattern_is_reported_with_source() {
        let err = PatternSet::compile(&["ok", "(unclosed"]).unwrap_err();
        assert!(format!("{err:#}").contains("(unclosed"), "got: {err:#}");
    }

    #[test]
    fn empty_set_matches_nothing() {
        let set = PatternSet::compile::<&str>(&[]).unwrap();
        assert!(set.is_empty());
        assert!(!set.matches("anything"));
    }

    #[test]
    fn first_match_reports_pattern() {
        let set = PatternSet::compile(&["dist", r"\.cache"]).unwrap();
        assert_eq!(set.first_match("a/.cache/b").map(|p| p.as_str()), Some(r"\.cache"));
        assert!(set.first_match("src/main.rs").is_none());
    }
}
