//! Ordered glob matching anchored at a base directory.

use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};

use crate::error::FsError;

/// One compiled pattern with its negation flag.
#[derive(Debug, Clone)]
struct Rule {
    matcher: GlobMatcher,
    negated: bool,
}

/// A compiled set of glob patterns evaluated against paths below a
/// base directory.
///
/// Patterns follow shell glob syntax, evaluated in order with the last
/// match winning. A leading `!` negates a pattern. A pattern without a
/// path separator matches base names at any depth; a leading `/`
/// anchors the pattern at the base directory. When the first pattern
/// is a negation, paths start out matching everything.
#[derive(Debug, Clone)]
pub struct Matcher {
    base: PathBuf,
    rules: Vec<Rule>,
    initial: bool,
}

impl Matcher {
    /// Compile a pattern list anchored at `base`.
    ///
    /// `base` should be absolute; [`matches`](Self::matches) only sees
    /// absolute paths.
    pub fn compile<S: AsRef<str>>(
        base: impl Into<PathBuf>,
        patterns: &[S],
    ) -> Result<Self, FsError> {
        let base = base.into();
        let mut rules = Vec::with_capacity(patterns.len());
        let mut initial = false;
        for (index, pattern) in patterns.iter().enumerate() {
            let raw = pattern.as_ref();
            let (negated, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            if index == 0 && negated {
                initial = true;
            }
            let anchored = if let Some(rooted) = body.strip_prefix('/') {
                rooted.to_string()
            } else if body.contains('/') {
                body.to_string()
            } else {
                format!("**/{body}")
            };
            let glob = GlobBuilder::new(&anchored)
                .literal_separator(true)
                .build()
                .map_err(|e| FsError::invalid_input(format!("bad pattern {raw:?}: {e}")))?;
            rules.push(Rule {
                matcher: glob.compile_matcher(),
                negated,
            });
        }
        Ok(Self {
            base,
            rules,
            initial,
        })
    }

    /// Test an absolute path against the pattern set.
    ///
    /// Paths outside the base directory never match.
    pub fn matches(&self, absolute: &Path) -> bool {
        let Ok(relative) = absolute.strip_prefix(&self.base) else {
            return false;
        };
        let mut decision = self.initial;
        for rule in &self.rules {
            if rule.matcher.is_match(relative) {
                decision = !rule.negated;
            }
        }
        decision
    }

    /// The base directory patterns are anchored at.
    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> Matcher {
        Matcher::compile("/base", patterns).unwrap()
    }

    #[test]
    fn test_bare_pattern_matches_at_any_depth() {
        let m = matcher(&["*.txt"]);
        assert!(m.matches(Path::new("/base/a.txt")));
        assert!(m.matches(Path::new("/base/deep/nested/b.txt")));
        assert!(!m.matches(Path::new("/base/a.png")));
    }

    #[test]
    fn test_rooted_pattern_is_anchored() {
        let m = matcher(&["/a.txt"]);
        assert!(m.matches(Path::new("/base/a.txt")));
        assert!(!m.matches(Path::new("/base/sub/a.txt")));
    }

    #[test]
    fn test_pattern_with_separator_is_relative_to_base() {
        let m = matcher(&["sub/*.txt"]);
        assert!(m.matches(Path::new("/base/sub/a.txt")));
        assert!(!m.matches(Path::new("/base/a.txt")));
        assert!(!m.matches(Path::new("/base/sub/deeper/a.txt")));
    }

    #[test]
    fn test_last_match_wins() {
        let m = matcher(&["*.txt", "!draft.txt"]);
        assert!(m.matches(Path::new("/base/notes.txt")));
        assert!(!m.matches(Path::new("/base/draft.txt")));

        let m = matcher(&["!draft.txt", "*.txt"]);
        assert!(m.matches(Path::new("/base/draft.txt")));
    }

    #[test]
    fn test_leading_negation_starts_from_match_everything() {
        let m = matcher(&["!*.log"]);
        assert!(m.matches(Path::new("/base/readme.md")));
        assert!(!m.matches(Path::new("/base/debug.log")));
    }

    #[test]
    fn test_negation_is_exact_complement() {
        let plain = matcher(&["*.txt"]);
        let negated = matcher(&["!*.txt"]);
        for path in [
            "/base/a.txt",
            "/base/b.png",
            "/base/sub/c.txt",
            "/base/sub/d",
        ] {
            let p = Path::new(path);
            assert_ne!(plain.matches(p), negated.matches(p), "disagree on {path}");
        }
    }

    #[test]
    fn test_paths_outside_base_never_match() {
        let m = matcher(&["*"]);
        assert!(!m.matches(Path::new("/elsewhere/a.txt")));
    }

    #[test]
    fn test_star_does_not_cross_separators() {
        let m = matcher(&["/sub/*"]);
        assert!(m.matches(Path::new("/base/sub/a.txt")));
        assert!(!m.matches(Path::new("/base/sub/deeper/b.txt")));
    }

    #[test]
    fn test_bad_pattern_is_invalid_input() {
        let err = Matcher::compile("/base", &["a[unterminated"]).unwrap_err();
        assert!(matches!(err, FsError::InvalidInput { .. }));
    }
}
