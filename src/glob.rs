//! Path-matching predicate shared by every migration stage: a set of include
//! patterns minus a set of exclude patterns, evaluated against paths relative
//! to a tree root. `**` crosses directory separators, `*` does not.

use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::errors::RelayError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Include ∪ exclude pattern set with root enumeration.
#[derive(Debug, Clone)]
pub struct Glob {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl Glob {
    /// Build a glob from include and exclude pattern strings. Duplicate
    /// patterns are normalized out; patterns that escape their root via `..`
    /// are rejected.
    pub fn new(include: &[&str], exclude: &[&str]) -> Result<Glob, RelayError> {
        Ok(Glob {
            include: Self::compile(include)?,
            exclude: Self::compile(exclude)?,
        })
    }

    /// Convenience constructor over owned strings (as found in config files).
    pub fn from_strings(include: &[String], exclude: &[String]) -> Result<Glob, RelayError> {
        let inc: Vec<&str> = include.iter().map(|s| s.as_str()).collect();
        let exc: Vec<&str> = exclude.iter().map(|s| s.as_str()).collect();
        Glob::new(&inc, &exc)
    }

    /// Glob matching every path.
    pub fn all() -> Glob {
        Glob::new(&["**"], &[]).expect("the universal pattern always compiles")
    }

    fn compile(patterns: &[&str]) -> Result<Vec<Pattern>, RelayError> {
        let mut compiled: Vec<Pattern> = Vec::with_capacity(patterns.len());
        let mut seen = std::collections::BTreeSet::new();
        for raw in patterns {
            if !seen.insert(*raw) {
                continue;
            }
            for component in Path::new(raw).components() {
                if matches!(component, Component::ParentDir) {
                    return Err(RelayError::Config(format!(
                        "Glob pattern '{raw}' must not escape its root via '..'"
                    )));
                }
            }
            let pattern = Pattern::new(raw)
                .map_err(|e| RelayError::Config(format!("Invalid glob pattern '{raw}': {e}")))?;
            compiled.push(pattern);
        }
        Ok(compiled)
    }

    /// Whether `path` (relative to the tree root) matches some include
    /// pattern and no exclude pattern.
    pub fn matches(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let included = self
            .include
            .iter()
            .any(|p| p.matches_path_with(path, MATCH_OPTIONS));
        if !included {
            return false;
        }
        !self
            .exclude
            .iter()
            .any(|p| p.matches_path_with(path, MATCH_OPTIONS))
    }

    /// The shallowest literal prefixes of the include patterns. Used to skip
    /// whole subtrees that cannot contain matches. The empty path stands for
    /// the tree root.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = vec![];
        for pattern in &self.include {
            roots.push(literal_prefix(pattern.as_str()));
        }
        roots.sort();
        roots.dedup();
        // Drop roots that live under another collected root.
        let mut shallowest: Vec<PathBuf> = vec![];
        for root in roots {
            if !shallowest.iter().any(|r| root.starts_with(r)) {
                shallowest.push(root);
            }
        }
        shallowest
    }

    /// True when no path can match (empty include set).
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    /// Raw include patterns, for diagnostics.
    pub fn include_patterns(&self) -> Vec<String> {
        self.include.iter().map(|p| p.as_str().to_string()).collect()
    }
}

/// Longest leading run of pattern components free of glob metacharacters.
fn literal_prefix(pattern: &str) -> PathBuf {
    let mut prefix = PathBuf::new();
    for segment in pattern.split('/') {
        if segment.contains(['*', '?', '[', ']']) {
            break;
        }
        prefix.push(segment);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_and_exclude_compose() {
        let g = Glob::new(&["**"], &["exclude/me.txt"]).unwrap();
        assert!(g.matches("anything/else.txt"));
        assert!(!g.matches("exclude/me.txt"));
    }

    #[test]
    fn star_does_not_cross_separators() {
        let g = Glob::new(&["src/*.rs"], &[]).unwrap();
        assert!(g.matches("src/lib.rs"));
        assert!(!g.matches("src/nested/mod.rs"));
        let deep = Glob::new(&["src/**"], &[]).unwrap();
        assert!(deep.matches("src/nested/mod.rs"));
    }

    #[test]
    fn roots_are_shallowest_literal_prefixes() {
        let g = Glob::new(&["foo/bar/**", "foo/**", "baz/file.txt"], &[]).unwrap();
        let roots = g.roots();
        assert!(roots.contains(&PathBuf::from("foo")));
        assert!(roots.contains(&PathBuf::from("baz/file.txt")));
        // "foo/bar" collapses into "foo".
        assert!(!roots.iter().any(|r| r == &PathBuf::from("foo/bar")));
        // A pattern with no literal prefix pins the root to the whole tree.
        let all = Glob::new(&["**/any", "foo/**"], &[]).unwrap();
        assert_eq!(all.roots(), vec![PathBuf::new()]);
    }

    #[test]
    fn parent_dir_components_are_rejected() {
        assert!(Glob::new(&["../escape/**"], &[]).is_err());
        assert!(Glob::new(&["ok/**"], &["../bad"]).is_err());
    }

    #[test]
    fn duplicate_patterns_are_normalized() {
        let g = Glob::new(&["a/**", "a/**", "b"], &[]).unwrap();
        assert_eq!(g.include_patterns(), vec!["a/**", "b"]);
    }
}
