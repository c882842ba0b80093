//! Path safety and tree helpers. Every file API in the crate resolves
//! user-supplied paths through [`resolve_within_root`]; a normalized path or
//! symlink chain that exits the root is an error, never a silent escape.

use std::fs;
use std::path::{Path, PathBuf};

use path_absolutize::Absolutize;

use crate::errors::RelayError;
use crate::glob::Glob;

/// Resolve `user_path` against `root`, rejecting any result outside `root`.
/// `..` segments are normalized before the containment check; the path does
/// not need to exist.
pub fn resolve_within_root(root: &Path, user_path: &Path) -> Result<PathBuf, RelayError> {
    let resolved = user_path
        .absolutize_virtually(root)
        .map_err(|_| RelayError::PathEscapesRoot {
            path: user_path.to_path_buf(),
            root: root.to_path_buf(),
        })?;
    Ok(resolved.into_owned())
}

/// Verify that no symlink under `path` (which must be inside `root`) resolves
/// outside `root`. Checks the deepest existing ancestor so dangling targets
/// and partially created paths are handled.
pub fn ensure_no_symlink_escape(root: &Path, path: &Path) -> Result<(), RelayError> {
    let canonical_root = fs::canonicalize(root)?;
    let mut probe = path.to_path_buf();
    while !probe.exists() {
        if !probe.pop() || !probe.starts_with(root) {
            return Ok(());
        }
    }
    let canonical = fs::canonicalize(&probe)?;
    if canonical.starts_with(&canonical_root) {
        Ok(())
    } else {
        Err(RelayError::PathEscapesRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })
    }
}

/// Recursively list the files (and symlinks) under `root` as sorted paths
/// relative to `root`. Directories themselves are not listed.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>, RelayError> {
    let mut files = vec![];
    if root.exists() {
        walk(root, root, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), RelayError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("walk stays under root")
                .to_path_buf();
            out.push(rel);
        }
    }
    Ok(())
}

/// Copy the files under `src_root` matching `files` into `dst_root`,
/// preserving executable bits and recreating symlinks verbatim. Returns the
/// number of entries copied.
pub fn copy_tree(src_root: &Path, dst_root: &Path, files: &Glob) -> Result<usize, RelayError> {
    let mut copied = 0;
    for rel in list_files(src_root)? {
        if !files.matches(&rel) {
            continue;
        }
        let src = src_root.join(&rel);
        let dst = dst_root.join(&rel);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        if src.symlink_metadata()?.file_type().is_symlink() {
            let target = fs::read_link(&src)?;
            if dst.symlink_metadata().is_ok() {
                fs::remove_file(&dst)?;
            }
            make_symlink(&target, &dst)?;
        } else {
            fs::copy(&src, &dst)?;
        }
        copied += 1;
    }
    Ok(copied)
}

/// Create `dir` empty: removed first when it already exists.
pub fn ensure_clean_dir(dir: &Path) -> Result<(), RelayError> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Delete empty parent directories of `path` up to (excluding) `root`.
pub fn prune_empty_dirs(root: &Path, path: &Path) -> Result<(), RelayError> {
    let mut current = path.parent().map(|p| p.to_path_buf());
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        match fs::read_dir(&dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
                fs::remove_dir(&dir)?;
            }
            Err(_) => break,
        }
        current = dir.parent().map(|p| p.to_path_buf());
    }
    Ok(())
}

#[cfg(unix)]
pub fn make_symlink(target: &Path, link: &Path) -> Result<(), RelayError> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn make_symlink(_target: &Path, _link: &Path) -> Result<(), RelayError> {
    Err(RelayError::validation(
        "symlinks are not supported on this platform",
    ))
}

/// Set or clear the executable bits of a file. No-op on platforms without a
/// POSIX permission model.
#[cfg(unix)]
pub fn set_executable(path: &Path, executable: bool) -> Result<bool, RelayError> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(path)?;
    let mut perms = meta.permissions();
    let mode = perms.mode();
    let new_mode = if executable { mode | 0o111 } else { mode & !0o111 };
    if new_mode == mode {
        return Ok(false);
    }
    perms.set_mode(new_mode);
    fs::set_permissions(path, perms)?;
    Ok(true)
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path, _executable: bool) -> Result<bool, RelayError> {
    Ok(false)
}
