//! Revision and change data produced by origins. Revisions are opaque
//! identifiers compared by canonical form; changes carry the metadata a
//! migration needs to build the destination commit.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;

use crate::author::Author;
use crate::glob::Glob;

/// Ordered multimap of label name to values, preserving insertion order.
pub type LabelMap = IndexMap<String, Vec<String>>;

/// An opaque revision identifier produced by an origin.
///
/// - `canonical` is the stable string form; two revisions with equal
///   canonical form are equal.
/// - `context_ref` is the name the user typed (a branch, a tag, a PR).
/// - `fixed_ref` is an immutable pointer form (a commit hash) used for
///   equality pinning and `--expected-fixed-ref` checks.
#[derive(Debug, Clone, Eq)]
pub struct Revision {
    canonical: String,
    context_ref: Option<String>,
    fixed_ref: Option<String>,
    labels: LabelMap,
    timestamp: Option<DateTime<FixedOffset>>,
    url: Option<String>,
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl std::hash::Hash for Revision {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl Revision {
    pub fn new(canonical: impl Into<String>) -> Revision {
        Revision {
            canonical: canonical.into(),
            context_ref: None,
            fixed_ref: None,
            labels: LabelMap::new(),
            timestamp: None,
            url: None,
        }
    }

    pub fn with_context_ref(mut self, context_ref: impl Into<String>) -> Revision {
        self.context_ref = Some(context_ref.into());
        self
    }

    pub fn with_fixed_ref(mut self, fixed_ref: impl Into<String>) -> Revision {
        self.fixed_ref = Some(fixed_ref.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Revision {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Revision {
        self.url = Some(url.into());
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Revision {
        self.labels.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn context_ref(&self) -> Option<&str> {
        self.context_ref.as_deref()
    }

    pub fn fixed_ref(&self) -> Option<&str> {
        self.fixed_ref.as_deref()
    }

    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// First value of a revision label, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).and_then(|v| v.first()).map(|s| s.as_str())
    }
}

/// A change enumerated from an origin: one revision plus the metadata needed
/// to reproduce it in the destination. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Change {
    pub revision: Revision,
    pub author: Author,
    pub message: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub labels: LabelMap,
    pub parents: Vec<Revision>,
    pub merge: bool,
    /// Paths touched by this change; `None` when the origin cannot tell.
    pub files: Option<BTreeSet<PathBuf>>,
}

impl Change {
    /// First line of the change message.
    pub fn first_line(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Whether this change touches at least one path matching `files_glob`.
    /// Changes with unknown affected files always match.
    pub fn touches(&self, files_glob: &Glob) -> bool {
        match &self.files {
            None => true,
            Some(files) => files.iter().any(|p| files_glob.matches(p)),
        }
    }

    /// First value of a change label, falling back to the revision labels.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .get(name)
            .and_then(|v| v.first())
            .map(|s| s.as_str())
            .or_else(|| self.revision.label(name))
    }
}

/// The change batches visible to transformations: the current batch being
/// migrated (oldest to newest) and the changes migrated earlier in this run.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    pub current: Vec<Change>,
    pub migrated: Vec<Change>,
}

/// Result of enumerating origin changes between two revisions.
///
/// `conditional` maps a child revision to the parent it can only be migrated
/// together with (the origin could not split them).
#[derive(Debug, Clone, Default)]
pub struct ChangesResponse {
    pub changes: Vec<Change>,
    pub conditional: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(rev: &str, files: &[&str]) -> Change {
        Change {
            revision: Revision::new(rev),
            author: Author::new("Dev", "dev@example.com"),
            message: format!("change {rev}\n"),
            timestamp: None,
            labels: LabelMap::new(),
            parents: vec![],
            merge: false,
            files: Some(files.iter().map(PathBuf::from).collect()),
        }
    }

    #[test]
    fn revisions_equal_by_canonical_form() {
        let a = Revision::new("abc").with_context_ref("main");
        let b = Revision::new("abc").with_fixed_ref("deadbeef");
        assert_eq!(a, b);
        assert_ne!(a, Revision::new("abd"));
    }

    #[test]
    fn change_touches_respects_glob() {
        let g = Glob::new(&["src/**"], &[]).unwrap();
        assert!(change("1", &["src/lib.rs"]).touches(&g));
        assert!(!change("2", &["docs/readme.md"]).touches(&g));
        // Unknown affected files are conservatively included.
        let mut unknown = change("3", &[]);
        unknown.files = None;
        assert!(unknown.touches(&g));
    }

    #[test]
    fn labels_fall_back_to_revision() {
        let mut c = change("1", &[]);
        c.revision = Revision::new("1").with_label("PR", "42");
        assert_eq!(c.label("PR"), Some("42"));
        c.labels.insert("PR".to_string(), vec!["43".to_string()]);
        assert_eq!(c.label("PR"), Some("43"));
    }
}
