//! Autopatch generation: one reviewable unified-diff file per origin path
//! that differs between the pure origin tree and the merged tree, stored
//! under a configured directory inside the destination.

use std::fs;
use std::path::{Path, PathBuf};

use crate::diff::Diff;
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::pathutil;

/// Where and how autopatch files are written.
#[derive(Debug, Clone)]
pub struct AutoPatchConfig {
    /// Tree prefix the patch directory lives under.
    pub directory_prefix: PathBuf,
    /// Directory name for the patch files, relative to the prefix.
    pub directory: PathBuf,
    /// File name suffix, `.patch` by default.
    pub suffix: String,
    /// Text prepended to every emitted patch file.
    pub header: Option<String>,
    /// Replace hunk locations with bare `@@` headers and drop file name
    /// lines, so unrelated line drift does not churn the patch files.
    pub strip_file_names_and_line_numbers: bool,
    /// Restrict which origin paths get patch files.
    pub paths: Option<Glob>,
}

impl Default for AutoPatchConfig {
    fn default() -> AutoPatchConfig {
        AutoPatchConfig {
            directory_prefix: PathBuf::new(),
            directory: PathBuf::from("PATCHES"),
            suffix: ".patch".to_string(),
            header: None,
            strip_file_names_and_line_numbers: false,
            paths: None,
        }
    }
}

impl AutoPatchConfig {
    /// The directory the patch files live in, relative to the tree root.
    pub fn patch_dir(&self) -> PathBuf {
        self.directory_prefix.join(&self.directory)
    }

    fn patch_path_for(&self, origin_path: &Path) -> PathBuf {
        let mut name = origin_path.as_os_str().to_os_string();
        name.push(&self.suffix);
        self.patch_dir().join(name)
    }
}

/// Write one patch file per origin path that differs between the pristine
/// and merged trees; delete stale patch files for paths that no longer
/// differ. Returns the written patch paths.
pub fn write_patch_files(
    pristine_root: &Path,
    merged_root: &Path,
    cfg: &AutoPatchConfig,
) -> Result<Vec<PathBuf>, RelayError> {
    let patch_dir = cfg.patch_dir();
    let mut written: Vec<PathBuf> = vec![];

    for rel in Diff::changed_paths(pristine_root, merged_root, cfg.paths.as_ref())? {
        if rel.starts_with(&patch_dir) {
            continue;
        }
        let old = read_opt(&pristine_root.join(&rel))?;
        let new = read_opt(&merged_root.join(&rel))?;
        let mut diff_text = Diff::file(&rel, old.as_deref(), new.as_deref());
        if diff_text.is_empty() {
            continue;
        }
        if cfg.strip_file_names_and_line_numbers {
            diff_text = strip_locations(&diff_text);
        }
        if let Some(header) = &cfg.header {
            let mut with_header = header.clone();
            if !with_header.ends_with('\n') {
                with_header.push('\n');
            }
            with_header.push_str(&diff_text);
            diff_text = with_header;
        }

        let patch_rel = cfg.patch_path_for(&rel);
        let full = pathutil::resolve_within_root(merged_root, &patch_rel)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, &diff_text)?;
        written.push(patch_rel);
    }

    // Drop patch files whose origin path no longer differs.
    let patch_dir_abs = merged_root.join(&patch_dir);
    for rel in pathutil::list_files(&patch_dir_abs)? {
        let patch_rel = patch_dir.join(&rel);
        if written.contains(&patch_rel) {
            continue;
        }
        let full = patch_dir_abs.join(&rel);
        fs::remove_file(&full)?;
        pathutil::prune_empty_dirs(merged_root, &full)?;
    }

    written.sort();
    Ok(written)
}

/// Drop `---`/`+++` lines and reduce hunk headers to a location-free `@@`.
fn strip_locations(diff_text: &str) -> String {
    let mut out = String::with_capacity(diff_text.len());
    for line in diff_text.split_inclusive('\n') {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if line.starts_with("@@") {
            out.push_str("@@\n");
            continue;
        }
        out.push_str(line);
    }
    out
}

fn read_opt(path: &Path) -> Result<Option<Vec<u8>>, RelayError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
