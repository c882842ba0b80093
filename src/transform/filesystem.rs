//! Filesystem-shape transformations: symlink creation (confined to the
//! checkout) and executable-bit management.

use std::path::PathBuf;

use crate::errors::RelayError;
use crate::glob::Glob;
use crate::transform::{TransformStatus, Transformation};
use crate::work::TransformWork;

/// Create a symlink inside the checkout. Targets resolving outside the
/// checkout are rejected.
#[derive(Debug)]
pub struct CreateSymlink {
    link: PathBuf,
    target: PathBuf,
}

impl CreateSymlink {
    pub fn new(link: impl Into<PathBuf>, target: impl Into<PathBuf>) -> CreateSymlink {
        CreateSymlink {
            link: link.into(),
            target: target.into(),
        }
    }
}

impl Transformation for CreateSymlink {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        if work.exists(&self.link) {
            return Ok(TransformStatus::noop(format!(
                "'{}' already exists",
                self.link.display()
            )));
        }
        work.create_symlink(&self.link, &self.target)?;
        Ok(TransformStatus::Changed)
    }

    fn describe(&self) -> String {
        format!(
            "create symlink {} -> {}",
            self.link.display(),
            self.target.display()
        )
    }
}

/// Set (or clear) the executable bits on every file matching a glob.
#[derive(Debug)]
pub struct SetExecutable {
    paths: Glob,
    executable: bool,
}

impl SetExecutable {
    pub fn new(paths: Glob, executable: bool) -> SetExecutable {
        SetExecutable { paths, executable }
    }
}

impl Transformation for SetExecutable {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let mut changed = 0usize;
        for rel in work.list_files()? {
            if !self.paths.matches(&rel) {
                continue;
            }
            if work.set_executable(&rel, self.executable)? {
                changed += 1;
            }
        }
        if changed == 0 {
            Ok(TransformStatus::noop("no file needed a permission change"))
        } else {
            Ok(TransformStatus::Changed)
        }
    }

    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        Ok(Box::new(SetExecutable {
            paths: self.paths.clone(),
            executable: !self.executable,
        }))
    }

    fn describe(&self) -> String {
        format!(
            "set executable={} [{}]",
            self.executable,
            self.paths.include_patterns().join(", ")
        )
    }
}
