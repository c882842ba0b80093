//! Merge import: reconciles destination-only edits with a fresh origin
//! import by merging three trees per file: the baseline (what the origin
//! was last time, post-transform), the fresh transformed origin, and the
//! current destination.

pub mod autopatch;
pub mod consistency;
pub mod diff3;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::console::Console;
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::patch;
use crate::pathutil;

/// How destination-side edits are reapplied to the fresh import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStrategy {
    /// Classical three-way merge per file.
    #[default]
    Diff3,
    /// Compute patch(baseline→destination) and apply it to the fresh origin
    /// tree; falls back to a marked-up three-way merge on conflict.
    PatchMerge,
}

/// Merge-import configuration for one workflow.
#[derive(Debug, Clone, Default)]
pub struct MergeImportConfig {
    /// Subtree the merge operates on; paths outside pass through untouched.
    /// The empty path covers the whole tree.
    pub package_path: PathBuf,
    /// Optional narrowing filter; non-matching paths take the origin value
    /// unconditionally.
    pub paths: Option<Glob>,
    /// Reconstruct the baseline from the consistency file instead of a
    /// re-import.
    pub use_consistency_file: bool,
    pub strategy: MergeStrategy,
}

/// What the merge did, for effects and endpoint messages.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Paths whose destination-side edits were carried over.
    pub merged: Vec<PathBuf>,
    /// Paths left with conflict markers or unresolvable binary divergence.
    pub conflict_paths: Vec<PathBuf>,
}

impl MergeReport {
    /// The destination-side message for conflicting merges.
    pub fn error_summary(&self) -> Option<String> {
        if self.conflict_paths.is_empty() {
            return None;
        }
        let paths: Vec<String> = self
            .conflict_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        Some(format!("Found merge errors for paths: [{}]", paths.join(", ")))
    }
}

/// Reconcile `workdir` (the fresh transformed origin tree, mutated in place)
/// with the destination edits, using `baseline_dir` as the common ancestor.
pub fn merge_import(
    workdir: &Path,
    baseline_dir: &Path,
    destination_dir: &Path,
    cfg: &MergeImportConfig,
    console: &Console,
) -> Result<MergeReport, RelayError> {
    let mut report = MergeReport::default();

    let union: BTreeSet<PathBuf> = pathutil::list_files(baseline_dir)?
        .into_iter()
        .chain(pathutil::list_files(workdir)?)
        .chain(pathutil::list_files(destination_dir)?)
        .collect();

    for rel in union {
        if !rel.starts_with(&cfg.package_path) {
            continue;
        }
        if let Some(glob) = &cfg.paths
            && !glob.matches(&rel)
        {
            continue;
        }

        let base = read_opt(&baseline_dir.join(&rel))?;
        let origin = read_opt(&workdir.join(&rel))?;
        let dest = read_opt(&destination_dir.join(&rel))?;

        if origin == dest || base == dest {
            // Destination agrees with the import or never diverged.
            continue;
        }
        if base == origin {
            // Only the destination changed; its edit wins.
            write_opt(workdir, &rel, dest.as_deref())?;
            report.merged.push(rel);
            continue;
        }

        // All three sides differ. Binary contents cannot be line-merged.
        let (Some(base_text), Some(origin_text), Some(dest_text)) = (
            as_text(base.as_deref()),
            as_text(origin.as_deref()),
            as_text(dest.as_deref()),
        ) else {
            console.warn(&format!(
                "Cannot merge binary file '{}'; keeping the origin version",
                rel.display()
            ));
            report.conflict_paths.push(rel);
            continue;
        };

        let merged = match cfg.strategy {
            MergeStrategy::Diff3 => diff3::merge(&base_text, &origin_text, &dest_text),
            MergeStrategy::PatchMerge => {
                patch_merge(&rel, &base_text, &origin_text, &dest_text)
            }
        };

        let deleted_side = origin.is_none() || dest.is_none();
        if merged.text().is_empty() && deleted_side {
            write_opt(workdir, &rel, None)?;
        } else {
            write_opt(workdir, &rel, Some(merged.text().as_bytes()))?;
        }
        if merged.is_conflicted() {
            report.conflict_paths.push(rel.clone());
        }
        report.merged.push(rel);
    }

    if let Some(summary) = report.error_summary() {
        console.warn(&summary);
    }
    Ok(report)
}

/// Patch-merge strategy for one file: apply patch(base→destination) onto the
/// origin text; a hunk that does not apply falls back to the marked-up
/// three-way merge.
fn patch_merge(rel: &Path, base: &str, origin: &str, dest: &str) -> diff3::Merged {
    let diff_text = crate::diff::Diff::file(
        rel,
        Some(base.as_bytes()),
        Some(dest.as_bytes()),
    );
    let patches = match patch::parse(&diff_text) {
        Ok(p) => p,
        Err(_) => return diff3::merge(base, origin, dest),
    };
    let mut current = origin.to_string();
    for file_patch in &patches {
        match file_patch.apply(Some(&current)) {
            Ok(Some(next)) => current = next,
            Ok(None) => current = String::new(),
            Err(_) => return diff3::merge(base, origin, dest),
        }
    }
    diff3::Merged::Clean(current)
}

fn read_opt(path: &Path) -> Result<Option<Vec<u8>>, RelayError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn as_text(bytes: Option<&[u8]>) -> Option<String> {
    match bytes {
        None => Some(String::new()),
        Some(b) => std::str::from_utf8(b).ok().map(|s| s.to_string()),
    }
}

fn write_opt(root: &Path, rel: &Path, content: Option<&[u8]>) -> Result<(), RelayError> {
    let full = pathutil::resolve_within_root(root, rel)?;
    match content {
        Some(bytes) => {
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(full, bytes)?;
        }
        None => {
            if full.exists() {
                fs::remove_file(&full)?;
                pathutil::prune_empty_dirs(root, &full)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Trees {
        baseline: tempfile::TempDir,
        workdir: tempfile::TempDir,
        destination: tempfile::TempDir,
    }

    fn trees() -> Trees {
        Trees {
            baseline: tempfile::tempdir().unwrap(),
            workdir: tempfile::tempdir().unwrap(),
            destination: tempfile::tempdir().unwrap(),
        }
    }

    fn put(dir: &Path, rel: &str, content: &str) {
        let full = dir.join(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    #[test]
    fn destination_edit_survives_a_fresh_import() {
        let t = trees();
        put(t.baseline.path(), "dir/foo.txt", "a\nb\nc\n");
        put(t.workdir.path(), "dir/foo.txt", "a\nb\nc\n");
        put(t.destination.path(), "dir/foo.txt", "a\nb\nfoo\nc\n");

        let report = merge_import(
            t.workdir.path(),
            t.baseline.path(),
            t.destination.path(),
            &MergeImportConfig::default(),
            &Console::default(),
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(t.workdir.path().join("dir/foo.txt")).unwrap(),
            "a\nb\nfoo\nc\n"
        );
        assert!(report.conflict_paths.is_empty());
    }

    #[test]
    fn both_sides_changed_distinct_regions() {
        let t = trees();
        put(t.baseline.path(), "f.txt", "1\n2\n3\n4\n5\n6\n7\n8\n");
        put(t.workdir.path(), "f.txt", "ONE\n2\n3\n4\n5\n6\n7\n8\n");
        put(t.destination.path(), "f.txt", "1\n2\n3\n4\n5\n6\n7\nEIGHT\n");

        merge_import(
            t.workdir.path(),
            t.baseline.path(),
            t.destination.path(),
            &MergeImportConfig::default(),
            &Console::default(),
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(t.workdir.path().join("f.txt")).unwrap(),
            "ONE\n2\n3\n4\n5\n6\n7\nEIGHT\n"
        );
    }

    #[test]
    fn diverging_edits_leave_conflict_markers() {
        let t = trees();
        put(t.baseline.path(), "foo.txt", "a\nb\nc\n");
        put(t.workdir.path(), "foo.txt", "origin\nb\nc\n");
        put(t.destination.path(), "foo.txt", "destination\nb\nc\n");

        let report = merge_import(
            t.workdir.path(),
            t.baseline.path(),
            t.destination.path(),
            &MergeImportConfig::default(),
            &Console::default(),
        )
        .unwrap();

        let merged = fs::read_to_string(t.workdir.path().join("foo.txt")).unwrap();
        assert!(merged.contains(">>>>>>>"));
        assert_eq!(report.conflict_paths, vec![PathBuf::from("foo.txt")]);
        assert!(report
            .error_summary()
            .unwrap()
            .contains("Found merge errors for paths"));
    }

    #[test]
    fn paths_outside_package_path_pass_through() {
        let t = trees();
        put(t.baseline.path(), "pkg/in.txt", "x\n");
        put(t.workdir.path(), "pkg/in.txt", "x\n");
        put(t.destination.path(), "pkg/in.txt", "dest-edit\n");
        put(t.baseline.path(), "other/out.txt", "x\n");
        put(t.workdir.path(), "other/out.txt", "x\n");
        put(t.destination.path(), "other/out.txt", "dest-edit\n");

        let cfg = MergeImportConfig {
            package_path: PathBuf::from("pkg"),
            ..MergeImportConfig::default()
        };
        merge_import(
            t.workdir.path(),
            t.baseline.path(),
            t.destination.path(),
            &cfg,
            &Console::default(),
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(t.workdir.path().join("pkg/in.txt")).unwrap(),
            "dest-edit\n"
        );
        // Outside the package path the origin value stands.
        assert_eq!(
            fs::read_to_string(t.workdir.path().join("other/out.txt")).unwrap(),
            "x\n"
        );
    }

    #[test]
    fn patch_merge_applies_clean_destination_edits() {
        let t = trees();
        put(t.baseline.path(), "f.txt", "a\nb\nc\nd\ne\n");
        put(t.workdir.path(), "f.txt", "a\nb\nc\nd\ne\nf\n");
        put(t.destination.path(), "f.txt", "a\nB\nc\nd\ne\n");

        let cfg = MergeImportConfig {
            strategy: MergeStrategy::PatchMerge,
            ..MergeImportConfig::default()
        };
        let report = merge_import(
            t.workdir.path(),
            t.baseline.path(),
            t.destination.path(),
            &cfg,
            &Console::default(),
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(t.workdir.path().join("f.txt")).unwrap(),
            "a\nB\nc\nd\ne\nf\n"
        );
        assert!(report.conflict_paths.is_empty());
    }

    #[test]
    fn new_destination_only_file_is_kept() {
        let t = trees();
        put(t.workdir.path(), "imported.txt", "from origin\n");
        put(t.destination.path(), "local-patch.md", "destination only\n");

        merge_import(
            t.workdir.path(),
            t.baseline.path(),
            t.destination.path(),
            &MergeImportConfig::default(),
            &Console::default(),
        )
        .unwrap();

        assert!(t.workdir.path().join("imported.txt").exists());
        assert_eq!(
            fs::read_to_string(t.workdir.path().join("local-patch.md")).unwrap(),
            "destination only\n"
        );
    }
}
