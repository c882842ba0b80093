//! The origin capability: what a source repository driver must provide for
//! the workflow runner to enumerate and check out changes. The core never
//! downcasts an origin; everything it needs is behind this trait plus the
//! descriptor bag.

use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::RelayError;
use crate::glob::Glob;
use crate::revision::{Change, ChangesResponse, Revision};

/// Capability supplied by origin drivers.
pub trait Origin: std::fmt::Debug {
    /// The label name under which this origin's revisions are recorded in
    /// destination commit messages (for example `FolderOrigin-RevId`).
    fn label_name(&self) -> String;

    /// Map a user reference to a revision. `None` means the origin's head.
    fn resolve(&self, reference: Option<&str>) -> Result<Revision, RelayError>;

    /// Enumerate changes after `from` up to and including `to`, oldest
    /// first. `from == None` enumerates from the beginning of history.
    fn changes(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> Result<ChangesResponse, RelayError>;

    /// The change metadata for a single revision.
    fn change(&self, revision: &Revision) -> Result<Change, RelayError>;

    /// Materialize the tree at `revision` into `dir`, restricted to `files`.
    /// Paths outside the glob must not appear in the checkout.
    fn checkout(&self, revision: &Revision, dir: &Path, files: &Glob) -> Result<(), RelayError>;

    /// Whether this origin can enumerate ancestor changes at all. Origins
    /// without history (a plain folder) always migrate as a single change.
    fn supports_history(&self) -> bool {
        true
    }

    /// Whether [`Origin::diff_in_origin`] is available.
    fn supports_diff_in_origin(&self) -> bool {
        false
    }

    /// Render the origin-side diff between two revisions, for review flows
    /// that want to show the change before transformation.
    fn diff_in_origin(&self, _from: &Revision, _to: &Revision) -> Result<String, RelayError> {
        Err(RelayError::validation(
            "this origin does not support diff_in_origin",
        ))
    }

    /// Key→value description of this origin for `info` output.
    fn describe(&self) -> BTreeMap<String, String>;
}
