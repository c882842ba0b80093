//! The destination capability: what a target repository driver must provide
//! to receive migrated trees, report baselines, and optionally regenerate
//! patch artifacts after destination-side edits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};

use crate::author::Author;
use crate::console::Console;
use crate::effects::Effect;
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::revision::{Change, Revision};

/// Per-invocation context a destination uses to build a writer.
#[derive(Debug, Clone, Default)]
pub struct WriterContext {
    pub workflow_name: String,
    /// Identity override from `--workflow-identity-user`.
    pub workflow_identity_user: Option<String>,
    /// Dry runs must not persist destination mutations; in-memory state must
    /// survive across writer calls within the invocation.
    pub dry_run: bool,
}

/// The last-imported state the destination reports for a rev-id label.
#[derive(Debug, Clone)]
pub struct DestinationStatus {
    /// Value of the rev-id label in the most recent matching change.
    pub baseline: String,
    /// Destination-native identifiers of changes still pending review.
    pub pending_changes: Vec<String>,
}

/// Everything the runner needs to know to write one destination change.
#[derive(Debug, Clone)]
pub struct TransformResult {
    /// The transformed (and possibly merged) tree to write.
    pub workdir: PathBuf,
    pub author: Author,
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// The final commit message, labels included.
    pub summary: String,
    /// Origin revision this change imports.
    pub current: Revision,
    /// Destination baseline to diff against, when the mode computed one.
    pub baseline: Option<String>,
    /// The origin changes covered by this write, oldest first.
    pub changes: Vec<Change>,
    /// Label name under which `current` is recorded in the message.
    pub rev_id_label: String,
    /// Whether the rev-id label was stamped into the summary.
    pub set_rev_id: bool,
}

/// Capability supplied by destination drivers.
pub trait Destination: std::fmt::Debug {
    /// The label name this destination writes into origin-facing messages,
    /// used by change-request baselines (for example `Relay-Target`).
    fn label_name(&self) -> String;

    /// Build a writer for one migration invocation. The runner finishes the
    /// writer on every exit path.
    fn new_writer(&self, ctx: &WriterContext) -> Result<Box<dyn DestinationWriter>, RelayError>;

    /// Key→value description of this destination for `info` output.
    fn describe(&self) -> BTreeMap<String, String>;
}

/// Writer for a single invocation. Implementations own atomicity: a failed
/// `write` must not leave a partial change behind.
pub trait DestinationWriter {
    /// Find the most recent change whose message carries `label`, restricted
    /// to changes touching `files`. `None` when the destination has no such
    /// change (fresh history).
    fn destination_status(
        &self,
        files: &Glob,
        label: &str,
    ) -> Result<Option<DestinationStatus>, RelayError>;

    /// Read access to the destination tree at `baseline` (or the current
    /// head when `None`). `workdir` may be used for scratch space.
    fn destination_reader(
        &self,
        baseline: Option<&str>,
        workdir: &Path,
    ) -> Result<Box<dyn DestinationReader>, RelayError>;

    /// Write one change. May return an empty effect list when the tree is
    /// identical to the destination's current state; the mode decides whether
    /// that is tolerable.
    fn write(
        &mut self,
        result: &TransformResult,
        files: &Glob,
        console: &Console,
    ) -> Result<Vec<Effect>, RelayError>;

    /// Deliver a side-channel note to the destination endpoint (a review
    /// comment, a status line). Default: dropped.
    fn send_message(&mut self, _msg: &str) -> Result<(), RelayError> {
        Ok(())
    }

    /// Patch-regeneration support, when the destination can infer regen
    /// targets and update existing changes in place.
    fn patch_regenerator(&mut self) -> Option<&mut dyn PatchRegenerator> {
        None
    }

    /// Called once on every exit path, success or failure.
    fn finish(&mut self) -> Result<(), RelayError> {
        Ok(())
    }
}

/// Read access to a destination tree.
pub trait DestinationReader {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, RelayError>;

    /// Copy the files matching `files` into `dir`, preserving layout.
    fn copy_destination_files(&self, files: &Glob, dir: &Path) -> Result<(), RelayError>;

    fn exists(&self, path: &Path) -> bool;
}

/// Regeneration capability for destinations that track in-flight changes.
pub trait PatchRegenerator {
    /// The destination ref whose tree is the new truth, when inferable.
    fn infer_regen_target(&self) -> Result<Option<String>, RelayError>;

    /// The destination ref to reverse back to the pristine import, when
    /// inferable.
    fn infer_regen_baseline(&self) -> Result<Option<String>, RelayError>;

    /// The origin reference the current patches were imported from, when
    /// recorded.
    fn infer_import_baseline(&self) -> Result<Option<String>, RelayError>;

    /// Replace the tree of the change `target` with the contents of
    /// `workdir` restricted to `files`.
    fn update_change(
        &mut self,
        original: Option<&str>,
        workdir: &Path,
        files: &Glob,
        target: &str,
    ) -> Result<Vec<Effect>, RelayError>;
}
