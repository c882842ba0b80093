//! Apply a unified diff to the checkout. Hunks touching excluded paths are
//! skipped; a diff that does not apply cleanly aborts the change.

use crate::errors::RelayError;
use crate::glob::Glob;
use crate::patch;
use crate::transform::{TransformStatus, Transformation};
use crate::work::TransformWork;

/// Patch application transform. Reversing applies the negated diff.
#[derive(Debug)]
pub struct PatchApply {
    patch_text: String,
    excluded_paths: Option<Glob>,
    reverse: bool,
}

impl PatchApply {
    pub fn new(patch_text: impl Into<String>, excluded_paths: Option<Glob>) -> Result<PatchApply, RelayError> {
        let patch_text = patch_text.into();
        // Parse eagerly so configuration errors surface before any checkout.
        patch::parse(&patch_text)?;
        Ok(PatchApply {
            patch_text,
            excluded_paths,
            reverse: false,
        })
    }

    fn patches(&self) -> Vec<patch::FilePatch> {
        patch::parse(&self.patch_text).expect("validated at construction")
    }
}

impl Transformation for PatchApply {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let patches = self.patches();
        let applied = patch::apply_to_tree(
            &patches,
            work.checkout_dir(),
            self.excluded_paths.as_ref(),
            self.reverse,
        )?;
        if applied == 0 {
            Ok(TransformStatus::noop("every file in the patch was excluded"))
        } else {
            Ok(TransformStatus::Changed)
        }
    }

    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        Ok(Box::new(PatchApply {
            patch_text: self.patch_text.clone(),
            excluded_paths: self.excluded_paths.clone(),
            reverse: !self.reverse,
        }))
    }

    fn describe(&self) -> String {
        if self.reverse {
            "patch (reversed)".to_string()
        } else {
            "patch".to_string()
        }
    }
}
