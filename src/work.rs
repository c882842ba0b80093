//! The mutable carrier threaded through one change migration: the checkout
//! directory, the evolving commit message and author, and the label store
//! (including hidden labels that never reach the destination message).
//!
//! All file access goes through the checkout-confined path API; an escape via
//! `..` or a symlink chain is an error, not a silent read outside the tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::author::Author;
use crate::console::Console;
use crate::errors::RelayError;
use crate::message::ChangeMessage;
use crate::pathutil;
use crate::revision::{Changes, LabelMap, Revision};

/// Pipeline-wide progress counters, kept on the context so nested and
/// dynamic transformations share one numbering.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub index: usize,
    pub total: usize,
}

/// The working state of one change migration.
#[derive(Debug)]
pub struct TransformWork {
    checkout_dir: PathBuf,
    message: ChangeMessage,
    author: Author,
    current_rev: Revision,
    resolved_rev: Revision,
    requested_ref: Option<String>,
    changes: Changes,
    console: Console,
    hidden_labels: LabelMap,
    cli_labels: BTreeMap<String, String>,
    /// Global `--ignore-noop` policy, consulted by sequences.
    pub ignore_noop: bool,
    pub progress: Progress,
    workflow_name: String,
}

impl TransformWork {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        checkout_dir: PathBuf,
        message: impl Into<String>,
        author: Author,
        current_rev: Revision,
        resolved_rev: Revision,
        requested_ref: Option<String>,
        changes: Changes,
        console: Console,
        workflow_name: impl Into<String>,
    ) -> TransformWork {
        TransformWork {
            checkout_dir,
            message: ChangeMessage::parse(&message.into()),
            author,
            current_rev,
            resolved_rev,
            requested_ref,
            changes,
            console,
            hidden_labels: LabelMap::new(),
            cli_labels: BTreeMap::new(),
            ignore_noop: false,
            progress: Progress::default(),
            workflow_name: workflow_name.into(),
        }
    }

    pub fn with_cli_labels(mut self, labels: BTreeMap<String, String>) -> TransformWork {
        self.cli_labels = labels;
        self
    }

    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn current_rev(&self) -> &Revision {
        &self.current_rev
    }

    pub fn resolved_rev(&self) -> &Revision {
        &self.resolved_rev
    }

    pub fn requested_ref(&self) -> Option<&str> {
        self.requested_ref.as_deref()
    }

    pub fn changes(&self) -> &Changes {
        &self.changes
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn set_author(&mut self, author: Author) {
        self.author = author;
    }

    pub fn message(&self) -> &ChangeMessage {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut ChangeMessage {
        &mut self.message
    }

    pub fn set_message(&mut self, text: &str) {
        self.message.set_text(text);
    }

    pub fn cli_labels(&self) -> &BTreeMap<String, String> {
        &self.cli_labels
    }

    /// Look up a label visible to transformations: message labels first, then
    /// hidden labels, then the revision's own labels, then CLI `--labels`.
    pub fn label(&self, name: &str) -> Option<String> {
        self.message
            .get_label(name)
            .or_else(|| {
                self.hidden_labels
                    .get(name)
                    .and_then(|v| v.last())
                    .cloned()
            })
            .or_else(|| self.current_rev.label(name).map(|s| s.to_string()))
            .or_else(|| self.cli_labels.get(name).cloned())
    }

    /// Record a label visible to later transformations but absent from the
    /// destination message.
    pub fn add_hidden_label(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.hidden_labels
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    pub fn hidden_label(&self, name: &str) -> Option<&str> {
        self.hidden_labels
            .get(name)
            .and_then(|v| v.last())
            .map(|s| s.as_str())
    }

    /// All values of a hidden label, oldest first.
    pub fn hidden_label_values(&self, name: &str) -> &[String] {
        self.hidden_labels
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    // ---- checkout-confined file API ----

    /// Resolve a path inside the checkout, rejecting escapes via `..` or
    /// symlink chains.
    pub fn full_path(&self, rel: impl AsRef<Path>) -> Result<PathBuf, RelayError> {
        let full = pathutil::resolve_within_root(&self.checkout_dir, rel.as_ref())?;
        pathutil::ensure_no_symlink_escape(&self.checkout_dir, &full)?;
        Ok(full)
    }

    pub fn read_file(&self, rel: impl AsRef<Path>) -> Result<String, RelayError> {
        let full = self.full_path(&rel)?;
        let bytes = fs::read(&full)?;
        String::from_utf8(bytes).map_err(|_| {
            RelayError::validation(format!(
                "File '{}' is not valid UTF-8",
                rel.as_ref().display()
            ))
        })
    }

    pub fn write_file(&self, rel: impl AsRef<Path>, content: &str) -> Result<(), RelayError> {
        let full = self.full_path(&rel)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(full, content)?;
        Ok(())
    }

    pub fn delete_file(&self, rel: impl AsRef<Path>) -> Result<(), RelayError> {
        let full = self.full_path(&rel)?;
        fs::remove_file(&full)?;
        pathutil::prune_empty_dirs(&self.checkout_dir, &full)?;
        Ok(())
    }

    pub fn exists(&self, rel: impl AsRef<Path>) -> bool {
        self.full_path(rel)
            .map(|p| p.symlink_metadata().is_ok())
            .unwrap_or(false)
    }

    /// All files currently in the checkout, relative and sorted.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, RelayError> {
        pathutil::list_files(&self.checkout_dir)
    }

    /// Create a symlink inside the checkout. The target must also resolve
    /// inside the checkout.
    pub fn create_symlink(
        &self,
        link: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> Result<(), RelayError> {
        let link_full = pathutil::resolve_within_root(&self.checkout_dir, link.as_ref())?;
        // The target is interpreted relative to the link's directory.
        let target_rel = target.as_ref();
        let target_full = if target_rel.is_absolute() {
            pathutil::resolve_within_root(&self.checkout_dir, target_rel)?
        } else {
            let base = link_full
                .parent()
                .unwrap_or(&self.checkout_dir)
                .join(target_rel);
            pathutil::resolve_within_root(&self.checkout_dir, base.strip_prefix(&self.checkout_dir).unwrap_or(&base))?
        };
        if !target_full.starts_with(&self.checkout_dir) {
            return Err(RelayError::PathEscapesRoot {
                path: target_rel.to_path_buf(),
                root: self.checkout_dir.clone(),
            });
        }
        if let Some(parent) = link_full.parent() {
            fs::create_dir_all(parent)?;
        }
        pathutil::make_symlink(target_rel, &link_full)
    }

    pub fn set_executable(&self, rel: impl AsRef<Path>, executable: bool) -> Result<bool, RelayError> {
        let full = self.full_path(rel)?;
        pathutil::set_executable(&full, executable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revision::Revision;

    fn work(dir: &Path) -> TransformWork {
        TransformWork::new(
            dir.to_path_buf(),
            "A message\n",
            Author::new("Dev", "dev@example.com"),
            Revision::new("5"),
            Revision::new("5"),
            None,
            Changes::default(),
            Console::default(),
            "default",
        )
    }

    #[test]
    fn file_api_is_confined_to_the_checkout() {
        let tmp = tempfile::tempdir().unwrap();
        let w = work(tmp.path());
        w.write_file("dir/a.txt", "hello\n").unwrap();
        assert_eq!(w.read_file("dir/a.txt").unwrap(), "hello\n");
        assert!(w.read_file("../outside.txt").is_err());
        assert!(w.write_file("../../etc/passwd", "nope").is_err());
        w.delete_file("dir/a.txt").unwrap();
        assert!(!w.exists("dir/a.txt"));
        // The now-empty parent directory is pruned.
        assert!(!tmp.path().join("dir").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_targets_must_stay_inside() {
        let tmp = tempfile::tempdir().unwrap();
        let w = work(tmp.path());
        w.write_file("real.txt", "content\n").unwrap();
        w.create_symlink("alias.txt", "real.txt").unwrap();
        assert_eq!(w.read_file("alias.txt").unwrap(), "content\n");
        assert!(w.create_symlink("evil.txt", "../../outside").is_err());
    }

    #[test]
    fn label_lookup_order() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = TransformWork::new(
            tmp.path().to_path_buf(),
            "Summary\n\nIN_MESSAGE=msg\n",
            Author::new("Dev", "dev@example.com"),
            Revision::new("5").with_label("FROM_REV", "rev"),
            Revision::new("5"),
            None,
            Changes::default(),
            Console::default(),
            "default",
        )
        .with_cli_labels(BTreeMap::from([(
            "FROM_CLI".to_string(),
            "cli".to_string(),
        )]));
        w.add_hidden_label("SECRET", "hidden");

        assert_eq!(w.label("IN_MESSAGE").as_deref(), Some("msg"));
        assert_eq!(w.label("SECRET").as_deref(), Some("hidden"));
        assert_eq!(w.label("FROM_REV").as_deref(), Some("rev"));
        assert_eq!(w.label("FROM_CLI").as_deref(), Some("cli"));
        assert_eq!(w.label("MISSING"), None);
        // Hidden labels never surface in the rendered message.
        assert!(!w.message().to_string().contains("hidden"));
    }
}
