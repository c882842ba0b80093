//! Path rename, duplication and removal inside the checkout. Move is its own
//! inverse with the path mapping swapped; the reverse of a copy removes what
//! the copy produced.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::RelayError;
use crate::glob::Glob;
use crate::pathutil;
use crate::transform::{TransformStatus, Transformation};
use crate::work::TransformWork;

/// Rename `before` to `after`. Both are paths relative to the checkout; a
/// directory (or the empty string for the whole tree) moves all files under
/// it, optionally narrowed by `paths`.
#[derive(Debug)]
pub struct MoveFiles {
    before: PathBuf,
    after: PathBuf,
    paths: Glob,
    overwrite: bool,
}

impl MoveFiles {
    pub fn new(
        before: impl Into<PathBuf>,
        after: impl Into<PathBuf>,
        paths: Glob,
        overwrite: bool,
    ) -> MoveFiles {
        MoveFiles {
            before: before.into(),
            after: after.into(),
            paths,
            overwrite,
        }
    }

    pub fn simple(before: impl Into<PathBuf>, after: impl Into<PathBuf>) -> MoveFiles {
        MoveFiles::new(before, after, Glob::all(), false)
    }
}

impl Transformation for MoveFiles {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let moved = relocate(work, &self.before, &self.after, &self.paths, self.overwrite, true)?;
        if moved == 0 {
            Ok(TransformStatus::noop(format!(
                "Nothing to move under '{}'",
                self.before.display()
            )))
        } else {
            Ok(TransformStatus::Changed)
        }
    }

    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        Ok(Box::new(MoveFiles {
            before: self.after.clone(),
            after: self.before.clone(),
            paths: self.paths.clone(),
            overwrite: self.overwrite,
        }))
    }

    fn describe(&self) -> String {
        format!("move {} -> {}", self.before.display(), self.after.display())
    }
}

/// Duplicate `before` as `after`, keeping the original.
#[derive(Debug)]
pub struct CopyFiles {
    before: PathBuf,
    after: PathBuf,
    paths: Glob,
    overwrite: bool,
}

impl CopyFiles {
    pub fn new(
        before: impl Into<PathBuf>,
        after: impl Into<PathBuf>,
        paths: Glob,
        overwrite: bool,
    ) -> CopyFiles {
        CopyFiles {
            before: before.into(),
            after: after.into(),
            paths,
            overwrite,
        }
    }
}

impl Transformation for CopyFiles {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let copied = relocate(work, &self.before, &self.after, &self.paths, self.overwrite, false)?;
        if copied == 0 {
            Ok(TransformStatus::noop(format!(
                "Nothing to copy under '{}'",
                self.before.display()
            )))
        } else {
            Ok(TransformStatus::Changed)
        }
    }

    fn reverse(&self) -> Result<Box<dyn Transformation>, RelayError> {
        // Undoing a copy deletes what the copy created.
        let pattern = if self.after.as_os_str().is_empty() {
            "**".to_string()
        } else {
            format!("{}/**", self.after.display())
        };
        let target_file = self.after.display().to_string();
        let glob = Glob::new(&[pattern.as_str(), target_file.as_str()], &[])?;
        Ok(Box::new(RemoveFiles::new(glob)))
    }

    fn describe(&self) -> String {
        format!("copy {} -> {}", self.before.display(), self.after.display())
    }
}

/// Delete the files matching a glob. Mostly useful as the reversal of a copy
/// inside reversible workflows.
#[derive(Debug)]
pub struct RemoveFiles {
    paths: Glob,
}

impl RemoveFiles {
    pub fn new(paths: Glob) -> RemoveFiles {
        RemoveFiles { paths }
    }
}

impl Transformation for RemoveFiles {
    fn transform(&self, work: &mut TransformWork) -> Result<TransformStatus, RelayError> {
        let mut removed = 0usize;
        for rel in work.list_files()? {
            if self.paths.matches(&rel) {
                work.delete_file(&rel)?;
                removed += 1;
            }
        }
        if removed == 0 {
            Ok(TransformStatus::noop("Nothing matched the removal glob"))
        } else {
            Ok(TransformStatus::Changed)
        }
    }

    fn describe(&self) -> String {
        format!("remove [{}]", self.paths.include_patterns().join(", "))
    }
}

/// Move or copy every file under `before` to the corresponding path under
/// `after`. Returns how many files were relocated.
fn relocate(
    work: &mut TransformWork,
    before: &Path,
    after: &Path,
    paths: &Glob,
    overwrite: bool,
    remove_source: bool,
) -> Result<usize, RelayError> {
    let root = work.checkout_dir().to_path_buf();
    // The empty path names the checkout root itself.
    let src_base = if before.as_os_str().is_empty() {
        root.clone()
    } else {
        pathutil::resolve_within_root(&root, before)?
    };
    let dst_base = if after.as_os_str().is_empty() {
        root.clone()
    } else {
        pathutil::resolve_within_root(&root, after)?
    };

    // A plain file move/copy does not consult the glob.
    if src_base.is_file() || src_base.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false) {
        let rel = before.to_path_buf();
        move_one(&root, &rel, after, overwrite, remove_source)?;
        return Ok(1);
    }
    if !src_base.is_dir() {
        return Ok(0);
    }

    // Collect first so we never walk a tree we are mutating. When moving the
    // whole root into a subdirectory, files already under the destination
    // stay put.
    let mut to_move: Vec<PathBuf> = vec![];
    for rel in work.list_files()? {
        let Ok(under) = root.join(&rel).strip_prefix(&src_base).map(Path::to_path_buf) else {
            continue;
        };
        if root.join(&rel).starts_with(&dst_base) && dst_base != src_base {
            continue;
        }
        if !paths.matches(&under) {
            continue;
        }
        to_move.push(rel);
    }

    let mut count = 0usize;
    for rel in to_move {
        let under = root
            .join(&rel)
            .strip_prefix(&src_base)
            .expect("collected under src_base")
            .to_path_buf();
        let target_rel = after.join(&under);
        move_one(&root, &rel, &target_rel, overwrite, remove_source)?;
        count += 1;
    }
    Ok(count)
}

fn move_one(
    root: &Path,
    src_rel: &Path,
    dst_rel: &Path,
    overwrite: bool,
    remove_source: bool,
) -> Result<(), RelayError> {
    let src = pathutil::resolve_within_root(root, src_rel)?;
    let dst = pathutil::resolve_within_root(root, dst_rel)?;
    if src == dst {
        return Ok(());
    }
    if dst.exists() && !overwrite {
        return Err(RelayError::validation(format!(
            "Cannot move '{}' because '{}' already exists",
            src_rel.display(),
            dst_rel.display()
        )));
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if remove_source {
        fs::rename(&src, &dst)?;
        pathutil::prune_empty_dirs(root, &src)?;
    } else {
        fs::copy(&src, &dst)?;
    }
    Ok(())
}
