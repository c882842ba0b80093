//! The transformation pipeline: an ordered tree of transformations applied to
//! a checkout. Every leaf reports whether it changed anything; sequences
//! number their leaves for progress output and enforce the no-op policy.

pub mod dynamic;
pub mod filesystem;
pub mod message;
pub mod move_copy;
pub mod patch_apply;
pub mod replace;
pub mod verify;

use crate::errors::RelayError;
use crate::work::TransformWork;

pub use dynamic::{DynamicTransform, FnTransform};
pub use filesystem::{CreateSymlink, SetExecutable};
pub use message::{
    AddLabel, AddOrReplaceLabel, AddTextBeforeLabels, ExposeLabel, RemoveLabel, ReplaceLabel,
    SetMessage, SquashNotes, UseLastChange,
};
pub use move_copy::{CopyFiles, MoveFiles, RemoveFiles};
pub use patch_apply::PatchApply;
pub use replace::Replace;
pub use verify::{FailWithNoop, VerifyMatch};

/// What a transformation did when it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformStatus {
    Changed,
    /// Nothing changed; the payload says why.
    Noop(String),
}

impl TransformStatus {
    pub fn noop(reason: impl Into<String>) -> TransformStatus {
        TransformStatus::Noop(reason.into())
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, TransformStatus::Noop(_))
    }
}

/// A single step of the migration pipeline.
pub trait Transformation: std::fmt::Debug {
    /// Apply this transformation to the work in progress.
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError>;

    /// The transformation that undoes this one, when one exists.
    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        Err(RelayError::validation(format!(
            "{} is not reversible",
            self.describe()
        )))
    }

    /// Short human-readable description for progress lines and errors.
    fn describe(&self) -> String;

    /// How many progress slots this transformation occupies. Sequences are
    /// flattened: their children count, they themselves do not.
    fn leaf_count(&self) -> usize {
        1
    }

    /// Compound transformations get no `[i/N]` line of their own.
    fn is_compound(&self) -> bool {
        false
    }
}

/// An ordered list of transformations run as one unit.
///
/// `ignore_noop == Some(true)` downgrades a child no-op to a warning;
/// `None` defers to the global `--ignore-noop` policy on the work context.
#[derive(Debug, Default)]
pub struct Sequence {
    children: Vec<Box<dyn Transformation>>,
    ignore_noop: Option<bool>,
}

impl Sequence {
    pub fn new(children: Vec<Box<dyn Transformation>>) -> Sequence {
        Sequence {
            children,
            ignore_noop: None,
        }
    }

    pub fn with_ignore_noop(mut self, ignore_noop: bool) -> Sequence {
        self.ignore_noop = Some(ignore_noop);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Run as the top of a pipeline: resets the progress counters so leaves
    /// report `[i/N]` over the whole flattened tree.
    pub fn run_pipeline(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        work.progress.index = 0;
        work.progress.total = self.leaf_count();
        self.transform(work)
    }
}

impl Transformation for Sequence {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let ignore_noop = self.ignore_noop.unwrap_or(work.ignore_noop);
        let mut any_change = false;

        for child in &self.children {
            if !child.is_compound() {
                work.progress.index += 1;
                let index = work.progress.index;
                let total = work.progress.total.max(index);
                work.console().progress(index, total, &child.describe());
            }
            match child.transform(work)? {
                TransformStatus::Changed => any_change = true,
                TransformStatus::Noop(reason) => {
                    if ignore_noop {
                        work.console()
                            .warn(&format!("Ignoring no-op: {}: {reason}", child.describe()));
                    } else {
                        return Err(RelayError::VoidOperation(child.describe()));
                    }
                }
            }
        }

        if any_change || self.children.is_empty() {
            Ok(TransformStatus::Changed)
        } else {
            Ok(TransformStatus::noop("no child transformation made changes"))
        }
    }

    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        let mut reversed: Vec<Box<dyn Transformation>> = vec![];
        for child in self.children.iter().rev() {
            reversed.push(child.reverse()?);
        }
        Ok(Box::new(Sequence {
            children: reversed,
            ignore_noop: self.ignore_noop,
        }))
    }

    fn describe(&self) -> String {
        "sequence".to_string()
    }

    fn leaf_count(&self) -> usize {
        self.children.iter().map(|c| c.leaf_count()).sum()
    }

    fn is_compound(&self) -> bool {
        true
    }
}


#[cfg(test)]
mod tests {
    use super::testsupport::work_in;
    use super::*;

    #[derive(Debug)]
    struct Touch(&'static str);

    impl Transformation for Touch {
        fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
            work.write_file(self.0, "touched\n")?;
            Ok(TransformStatus::Changed)
        }

        fn describe(&self) -> String {
            format!("touch {}", self.0)
        }
    }

    #[derive(Debug)]
    struct AlwaysNoop;

    impl Transformation for AlwaysNoop {
        fn transform(&self, _work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
            Ok(TransformStatus::noop("nothing to do"))
        }

        fn describe(&self) -> String {
            "always-noop".to_string()
        }
    }

    #[test]
    fn sequence_counts_nested_leaves_flat() {
        let inner = Sequence::new(vec![Box::new(Touch("a")), Box::new(Touch("b"))]);
        let outer = Sequence::new(vec![Box::new(inner), Box::new(Touch("c"))]);
        assert_eq!(outer.leaf_count(), 3);
    }

    #[test]
    fn noop_child_is_fatal_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let mut work = work_in(tmp.path(), "msg\n");
        let seq = Sequence::new(vec![Box::new(AlwaysNoop)]);
        match seq.run_pipeline(&mut work) {
            Err(RelayError::VoidOperation(name)) => assert_eq!(name, "always-noop"),
            other => panic!("expected VoidOperation, got {other:?}"),
        }
    }

    #[test]
    fn ignore_noop_downgrades_to_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let mut work = work_in(tmp.path(), "msg\n");
        let seq =
            Sequence::new(vec![Box::new(AlwaysNoop), Box::new(Touch("x"))]).with_ignore_noop(true);
        assert_eq!(seq.run_pipeline(&mut work).unwrap(), TransformStatus::Changed);
        assert!(work.exists("x"));
    }

    #[test]
    fn global_ignore_noop_applies_when_unset_locally() {
        let tmp = tempfile::tempdir().unwrap();
        let mut work = work_in(tmp.path(), "msg\n");
        work.ignore_noop = true;
        let seq = Sequence::new(vec![Box::new(AlwaysNoop)]);
        assert!(seq.run_pipeline(&mut work).unwrap().is_noop());
    }
}
