//! Folder drivers: an origin that treats a directory snapshot as a single
//! synthetic revision, and a destination that writes the migrated tree to a
//! directory, keeping the last import's message in a sidecar so baselines
//! survive across runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use path_absolutize::Absolutize;

use crate::author::Author;
use crate::console::Console;
use crate::destination::{
    Destination, DestinationReader, DestinationStatus, DestinationWriter, TransformResult,
    WriterContext,
};
use crate::effects::{DestinationRef, Effect, EffectKind};
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::message::ChangeMessage;
use crate::origin::Origin;
use crate::pathutil;
use crate::revision::{Change, ChangesResponse, LabelMap, Revision};

/// Sidecar file recording the last imported change's message (labels
/// included), relative to the destination root.
const SIDECAR: &str = ".relay/last-import";

/// Directory-snapshot origin. No history: every resolve yields one synthetic
/// revision naming the directory.
#[derive(Debug)]
pub struct FolderOrigin {
    root: PathBuf,
}

impl FolderOrigin {
    pub fn new(root: impl Into<PathBuf>) -> FolderOrigin {
        FolderOrigin { root: root.into() }
    }

    fn revision_for(&self, path: &Path) -> Result<Revision, RelayError> {
        let absolute = path
            .absolutize()
            .map_err(|e| RelayError::CannotResolveRevision(format!("'{}': {e}", path.display())))?;
        if !absolute.is_dir() {
            return Err(RelayError::CannotResolveRevision(format!(
                "'{}' is not a directory",
                absolute.display()
            )));
        }
        Ok(Revision::new(absolute.display().to_string())
            .with_timestamp(Utc::now().fixed_offset()))
    }

    fn synthetic_change(&self, revision: &Revision) -> Change {
        Change {
            revision: revision.clone(),
            author: Author::new("Folder Import", "folder-import@localhost"),
            message: format!("Import of {}\n", revision.canonical()),
            timestamp: revision.timestamp(),
            labels: LabelMap::new(),
            parents: vec![],
            merge: false,
            files: None,
        }
    }
}

impl Origin for FolderOrigin {
    fn label_name(&self) -> String {
        "FolderOrigin-RevId".to_string()
    }

    fn resolve(&self, reference: Option<&str>) -> Result<Revision, RelayError> {
        match reference {
            None => self.revision_for(&self.root),
            Some(path) => self.revision_for(Path::new(path)),
        }
    }

    fn changes(
        &self,
        _from: Option<&Revision>,
        to: &Revision,
    ) -> Result<ChangesResponse, RelayError> {
        Ok(ChangesResponse {
            changes: vec![self.synthetic_change(to)],
            conditional: BTreeMap::new(),
        })
    }

    fn change(&self, revision: &Revision) -> Result<Change, RelayError> {
        Ok(self.synthetic_change(revision))
    }

    fn checkout(&self, revision: &Revision, dir: &Path, files: &Glob) -> Result<(), RelayError> {
        let source = PathBuf::from(revision.canonical());
        pathutil::copy_tree(&source, dir, files)?;
        Ok(())
    }

    fn supports_history(&self) -> bool {
        false
    }

    fn describe(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_string(), "folder-origin".to_string()),
            ("root".to_string(), self.root.display().to_string()),
        ])
    }
}

/// Directory destination. Writing replaces the files matching the
/// destination glob and refreshes the sidecar.
#[derive(Debug)]
pub struct FolderDestination {
    root: PathBuf,
}

impl FolderDestination {
    pub fn new(root: impl Into<PathBuf>) -> FolderDestination {
        FolderDestination { root: root.into() }
    }
}

impl Destination for FolderDestination {
    fn label_name(&self) -> String {
        "FolderDestination-Ref".to_string()
    }

    fn new_writer(&self, ctx: &WriterContext) -> Result<Box<dyn DestinationWriter>, RelayError> {
        fs::create_dir_all(&self.root)?;
        Ok(Box::new(FolderWriter {
            root: self.root.clone(),
            dry_run: ctx.dry_run,
            dry_run_message: None,
        }))
    }

    fn describe(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_string(), "folder-destination".to_string()),
            ("root".to_string(), self.root.display().to_string()),
        ])
    }
}

struct FolderWriter {
    root: PathBuf,
    dry_run: bool,
    /// In a dry run the sidecar is not written; later status queries in the
    /// same invocation still see this message.
    dry_run_message: Option<String>,
}

impl FolderWriter {
    fn last_message(&self) -> Option<String> {
        if let Some(msg) = &self.dry_run_message {
            return Some(msg.clone());
        }
        fs::read_to_string(self.root.join(SIDECAR)).ok()
    }
}

impl DestinationWriter for FolderWriter {
    fn destination_status(
        &self,
        _files: &Glob,
        label: &str,
    ) -> Result<Option<DestinationStatus>, RelayError> {
        let Some(message) = self.last_message() else {
            return Ok(None);
        };
        Ok(ChangeMessage::parse(&message)
            .get_label(label)
            .map(|baseline| DestinationStatus {
                baseline,
                pending_changes: vec![],
            }))
    }

    fn destination_reader(
        &self,
        _baseline: Option<&str>,
        _workdir: &Path,
    ) -> Result<Box<dyn DestinationReader>, RelayError> {
        Ok(Box::new(FolderReader {
            root: self.root.clone(),
        }))
    }

    fn write(
        &mut self,
        result: &TransformResult,
        files: &Glob,
        console: &Console,
    ) -> Result<Vec<Effect>, RelayError> {
        // Identical content and message: nothing to do. The sidecar is
        // bookkeeping, not content.
        let changed = crate::diff::Diff::changed_paths(&self.root, &result.workdir, Some(files))?
            .into_iter()
            .filter(|p| p != Path::new(SIDECAR))
            .count();
        if changed == 0 && self.last_message().as_deref() == Some(result.summary.as_str()) {
            return Ok(vec![]);
        }

        if self.dry_run {
            console.info(&format!(
                "Dry run: would write {} to {}",
                result.current,
                self.root.display()
            ));
            self.dry_run_message = Some(result.summary.clone());
            return Ok(vec![Effect::new(EffectKind::Created, "dry run")
                .with_origin_ref(result.current.canonical())]);
        }

        // Replace the matching tree: delete what the glob covers, then copy.
        for rel in pathutil::list_files(&self.root)? {
            if rel == Path::new(SIDECAR) || !files.matches(&rel) {
                continue;
            }
            let full = self.root.join(&rel);
            fs::remove_file(&full)?;
            pathutil::prune_empty_dirs(&self.root, &full)?;
        }
        pathutil::copy_tree(&result.workdir, &self.root, files)?;

        let sidecar = self.root.join(SIDECAR);
        fs::create_dir_all(sidecar.parent().expect("sidecar has a parent"))?;
        fs::write(&sidecar, &result.summary)?;

        Ok(vec![Effect::new(
            EffectKind::Created,
            result.summary.lines().next().unwrap_or("").to_string(),
        )
        .with_origin_ref(result.current.canonical())
        .with_destination_ref(DestinationRef {
            id: self.root.display().to_string(),
            kind: "folder".to_string(),
            url: None,
        })])
    }
}

struct FolderReader {
    root: PathBuf,
}

impl DestinationReader for FolderReader {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, RelayError> {
        let full = pathutil::resolve_within_root(&self.root, path)?;
        Ok(fs::read(full)?)
    }

    fn copy_destination_files(&self, files: &Glob, dir: &Path) -> Result<(), RelayError> {
        if !self.root.exists() {
            return Ok(());
        }
        pathutil::copy_tree(&self.root, dir, files)?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        pathutil::resolve_within_root(&self.root, path)
            .map(|p| p.exists())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_origin_resolves_and_checks_out() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("keep.txt"), "data\n").unwrap();
        fs::write(src.path().join("skip.md"), "doc\n").unwrap();

        let origin = FolderOrigin::new(src.path());
        let rev = origin.resolve(None).unwrap();
        assert!(rev.canonical().contains(
            src.path().file_name().unwrap().to_str().unwrap()
        ));

        let out = tempfile::tempdir().unwrap();
        origin
            .checkout(&rev, out.path(), &Glob::new(&["**/*.txt", "*.txt"], &[]).unwrap())
            .unwrap();
        assert!(out.path().join("keep.txt").exists());
        assert!(!out.path().join("skip.md").exists());
    }

    #[test]
    fn folder_destination_writes_and_reports_status() {
        let work = tempfile::tempdir().unwrap();
        fs::write(work.path().join("f.txt"), "migrated\n").unwrap();
        let dest_dir = tempfile::tempdir().unwrap();

        let destination = FolderDestination::new(dest_dir.path());
        let mut writer = destination
            .new_writer(&WriterContext::default())
            .unwrap();

        let result = TransformResult {
            workdir: work.path().to_path_buf(),
            author: Author::new("Dev", "dev@example.com"),
            timestamp: None,
            summary: "Imported\n\nFolderOrigin-RevId: /src/tree\n".to_string(),
            current: Revision::new("/src/tree"),
            baseline: None,
            changes: vec![],
            rev_id_label: "FolderOrigin-RevId".to_string(),
            set_rev_id: true,
        };
        let effects = writer
            .write(&result, &Glob::all(), &Console::default())
            .unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].kind, EffectKind::Created);
        assert_eq!(
            fs::read_to_string(dest_dir.path().join("f.txt")).unwrap(),
            "migrated\n"
        );

        let status = writer
            .destination_status(&Glob::all(), "FolderOrigin-RevId")
            .unwrap()
            .unwrap();
        assert_eq!(status.baseline, "/src/tree");

        // Writing the identical tree again produces no effects.
        let effects = writer
            .write(&result, &Glob::all(), &Console::default())
            .unwrap();
        assert!(effects.is_empty());
    }
}
