//! In-memory origin and destination drivers. The origin replays a scripted
//! linear history; the destination records every processed change so tests
//! can assert on exactly what a workflow wrote. Both stand behind the same
//! capability traits the real drivers implement.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

use crate::author::Author;
use crate::console::Console;
use crate::destination::{
    Destination, DestinationReader, DestinationStatus, DestinationWriter, PatchRegenerator,
    TransformResult, WriterContext,
};
use crate::effects::{DestinationRef, Effect, EffectKind};
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::message::ChangeMessage;
use crate::origin::Origin;
use crate::pathutil;
use crate::revision::{Change, ChangesResponse, LabelMap, Revision};

/// One revision of the scripted history: a full tree snapshot plus change
/// metadata.
#[derive(Debug, Clone)]
pub struct ScriptedChange {
    pub revision: Revision,
    pub author: Author,
    pub message: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub files: BTreeMap<PathBuf, Vec<u8>>,
}

/// Origin replaying a scripted linear history, oldest change first.
#[derive(Debug, Default)]
pub struct RecordingOrigin {
    history: Vec<ScriptedChange>,
}

impl RecordingOrigin {
    pub fn new() -> RecordingOrigin {
        RecordingOrigin::default()
    }

    /// Append a change whose tree is the given full snapshot.
    pub fn add_change(
        &mut self,
        canonical: &str,
        message: &str,
        files: &[(&str, &str)],
    ) -> &mut ScriptedChange {
        let seconds = 1_600_000_000 + 60 * self.history.len() as i64;
        let timestamp = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .expect("fixed test timestamps are valid")
            .fixed_offset();
        self.history.push(ScriptedChange {
            revision: Revision::new(canonical).with_timestamp(timestamp),
            author: Author::new("Origin Author", "origin-author@example.com"),
            message: message.to_string(),
            timestamp: Some(timestamp),
            files: files
                .iter()
                .map(|(p, c)| (PathBuf::from(p), c.as_bytes().to_vec()))
                .collect(),
        });
        self.history.last_mut().expect("just pushed")
    }

    /// Append a change reusing the previous snapshot with some files
    /// overridden.
    pub fn add_change_on_top(
        &mut self,
        canonical: &str,
        message: &str,
        files: &[(&str, &str)],
    ) -> &mut ScriptedChange {
        let mut tree = self
            .history
            .last()
            .map(|c| c.files.clone())
            .unwrap_or_default();
        for (p, c) in files {
            tree.insert(PathBuf::from(p), c.as_bytes().to_vec());
        }
        let seconds = 1_600_000_000 + 60 * self.history.len() as i64;
        let timestamp = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .expect("fixed test timestamps are valid")
            .fixed_offset();
        self.history.push(ScriptedChange {
            revision: Revision::new(canonical).with_timestamp(timestamp),
            author: Author::new("Origin Author", "origin-author@example.com"),
            message: message.to_string(),
            timestamp: Some(timestamp),
            files: tree,
        });
        self.history.last_mut().expect("just pushed")
    }

    fn index_of(&self, canonical: &str) -> Option<usize> {
        self.history
            .iter()
            .position(|c| c.revision.canonical() == canonical)
    }

    fn change_at(&self, index: usize) -> Change {
        let scripted = &self.history[index];
        let previous = index.checked_sub(1).map(|i| &self.history[i].files);
        let affected = affected_files(previous, &scripted.files);
        Change {
            revision: scripted.revision.clone(),
            author: scripted.author.clone(),
            message: scripted.message.clone(),
            timestamp: scripted.timestamp,
            labels: LabelMap::new(),
            parents: index
                .checked_sub(1)
                .map(|i| vec![self.history[i].revision.clone()])
                .unwrap_or_default(),
            merge: false,
            files: Some(affected),
        }
    }
}

fn affected_files(
    previous: Option<&BTreeMap<PathBuf, Vec<u8>>>,
    current: &BTreeMap<PathBuf, Vec<u8>>,
) -> std::collections::BTreeSet<PathBuf> {
    match previous {
        None => current.keys().cloned().collect(),
        Some(prev) => {
            let mut affected = std::collections::BTreeSet::new();
            for (path, content) in current {
                if prev.get(path) != Some(content) {
                    affected.insert(path.clone());
                }
            }
            for path in prev.keys() {
                if !current.contains_key(path) {
                    affected.insert(path.clone());
                }
            }
            affected
        }
    }
}

impl Origin for RecordingOrigin {
    fn label_name(&self) -> String {
        "RecordingOrigin-RevId".to_string()
    }

    fn resolve(&self, reference: Option<&str>) -> Result<Revision, RelayError> {
        match reference {
            None => self
                .history
                .last()
                .map(|c| c.revision.clone())
                .ok_or_else(|| {
                    RelayError::CannotResolveRevision("the origin has no changes".to_string())
                }),
            Some(r) => self
                .index_of(r)
                .map(|i| self.history[i].revision.clone())
                .ok_or_else(|| {
                    RelayError::CannotResolveRevision(format!("reference '{r}' not found"))
                }),
        }
    }

    fn changes(
        &self,
        from: Option<&Revision>,
        to: &Revision,
    ) -> Result<ChangesResponse, RelayError> {
        let to_idx = self.index_of(to.canonical()).ok_or_else(|| {
            RelayError::CannotResolveRevision(format!("revision '{to}' not found"))
        })?;
        let start = match from {
            None => 0,
            Some(rev) => match self.index_of(rev.canonical()) {
                Some(i) => i + 1,
                // An unknown baseline enumerates everything.
                None => 0,
            },
        };
        let changes = (start..=to_idx).map(|i| self.change_at(i)).collect();
        Ok(ChangesResponse {
            changes,
            conditional: BTreeMap::new(),
        })
    }

    fn change(&self, revision: &Revision) -> Result<Change, RelayError> {
        let idx = self.index_of(revision.canonical()).ok_or_else(|| {
            RelayError::CannotResolveRevision(format!("revision '{revision}' not found"))
        })?;
        Ok(self.change_at(idx))
    }

    fn checkout(&self, revision: &Revision, dir: &Path, files: &Glob) -> Result<(), RelayError> {
        let idx = self.index_of(revision.canonical()).ok_or_else(|| {
            RelayError::CannotResolveRevision(format!("revision '{revision}' not found"))
        })?;
        for (rel, content) in &self.history[idx].files {
            if !files.matches(rel) {
                continue;
            }
            let full = pathutil::resolve_within_root(dir, rel)?;
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(full, content)?;
        }
        Ok(())
    }

    fn describe(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("type".to_string(), "recording-origin".to_string()),
            ("changes".to_string(), self.history.len().to_string()),
        ])
    }
}

/// One change the destination received.
#[derive(Debug, Clone)]
pub struct ProcessedChange {
    pub id: String,
    pub author: Author,
    pub message: String,
    pub origin_ref: String,
    pub baseline: Option<String>,
    pub files: BTreeMap<PathBuf, Vec<u8>>,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
struct DestinationState {
    processed: Vec<ProcessedChange>,
    endpoint_messages: Vec<String>,
    pending_changes: Vec<String>,
    regen: RegenState,
    next_id: usize,
    /// Queue of write errors to inject, drained one per `write` call.
    write_errors: Vec<String>,
    /// Number of `destination_status` calls answered with `None` before the
    /// real answer, for retry-schedule tests.
    status_delay: usize,
}

#[derive(Debug, Default)]
struct RegenState {
    target: Option<String>,
    baseline: Option<String>,
    import_baseline: Option<String>,
    updated: Vec<(String, BTreeMap<PathBuf, Vec<u8>>)>,
}

/// Destination recording everything a workflow writes. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RecordingDestination {
    label: Option<String>,
    state: Rc<RefCell<DestinationState>>,
}

impl RecordingDestination {
    pub fn new() -> RecordingDestination {
        RecordingDestination::default()
    }

    /// Override the destination label used for change-request baselines.
    pub fn with_label(mut self, label: impl Into<String>) -> RecordingDestination {
        self.label = Some(label.into());
        self
    }

    pub fn processed(&self) -> Vec<ProcessedChange> {
        self.state.borrow().processed.clone()
    }

    /// Non-dry-run changes only.
    pub fn committed(&self) -> Vec<ProcessedChange> {
        self.state
            .borrow()
            .processed
            .iter()
            .filter(|c| !c.dry_run)
            .cloned()
            .collect()
    }

    pub fn endpoint_messages(&self) -> Vec<String> {
        self.state.borrow().endpoint_messages.clone()
    }

    /// Simulate a destination-side hand edit of the latest change's tree.
    pub fn edit_file(&self, path: &str, content: &str) {
        let mut state = self.state.borrow_mut();
        let last = state
            .processed
            .last_mut()
            .expect("cannot edit an empty destination");
        last.files
            .insert(PathBuf::from(path), content.as_bytes().to_vec());
    }

    /// Read a file from the latest change's tree.
    pub fn latest_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .processed
            .last()
            .and_then(|c| c.files.get(Path::new(path)).cloned())
    }

    pub fn add_pending_change(&self, id: impl Into<String>) {
        self.state.borrow_mut().pending_changes.push(id.into());
    }

    /// Inject an error for the next `write` call.
    pub fn fail_next_write(&self, msg: impl Into<String>) {
        self.state.borrow_mut().write_errors.push(msg.into());
    }

    /// Answer the next `n` status queries with `None` (baseline not yet
    /// visible), for backoff tests.
    pub fn delay_status(&self, n: usize) {
        self.state.borrow_mut().status_delay = n;
    }

    pub fn with_regen_target(self, target: impl Into<String>) -> RecordingDestination {
        self.state.borrow_mut().regen.target = Some(target.into());
        self
    }

    pub fn with_regen_baseline(self, baseline: impl Into<String>) -> RecordingDestination {
        self.state.borrow_mut().regen.baseline = Some(baseline.into());
        self
    }

    pub fn regen_updates(&self) -> Vec<(String, BTreeMap<PathBuf, Vec<u8>>)> {
        self.state.borrow().regen.updated.clone()
    }
}

impl Destination for RecordingDestination {
    fn label_name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| "Relay-Target".to_string())
    }

    fn new_writer(&self, ctx: &WriterContext) -> Result<Box<dyn DestinationWriter>, RelayError> {
        Ok(Box::new(RecordingWriter {
            state: Rc::clone(&self.state),
            dry_run: ctx.dry_run,
        }))
    }

    fn describe(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("type".to_string(), "recording-destination".to_string())])
    }
}

struct RecordingWriter {
    state: Rc<RefCell<DestinationState>>,
    dry_run: bool,
}

impl DestinationWriter for RecordingWriter {
    fn destination_status(
        &self,
        _files: &Glob,
        label: &str,
    ) -> Result<Option<DestinationStatus>, RelayError> {
        let mut state = self.state.borrow_mut();
        if state.status_delay > 0 {
            state.status_delay -= 1;
            return Ok(None);
        }
        let pending = state.pending_changes.clone();
        for change in state.processed.iter().rev() {
            if let Some(value) = ChangeMessage::parse(&change.message).get_label(label) {
                return Ok(Some(DestinationStatus {
                    baseline: value,
                    pending_changes: pending,
                }));
            }
        }
        Ok(None)
    }

    fn destination_reader(
        &self,
        baseline: Option<&str>,
        _workdir: &Path,
    ) -> Result<Box<dyn DestinationReader>, RelayError> {
        let state = self.state.borrow();
        let files = match baseline {
            Some(id) => state
                .processed
                .iter()
                .rev()
                .find(|c| c.id == id)
                .map(|c| c.files.clone())
                .ok_or_else(|| {
                    RelayError::repo(format!("destination change '{id}' not found"))
                })?,
            None => state
                .processed
                .last()
                .map(|c| c.files.clone())
                .unwrap_or_default(),
        };
        Ok(Box::new(RecordingReader { files }))
    }

    fn write(
        &mut self,
        result: &TransformResult,
        files: &Glob,
        _console: &Console,
    ) -> Result<Vec<Effect>, RelayError> {
        let mut state = self.state.borrow_mut();
        if let Some(msg) = state.write_errors.pop() {
            return Err(RelayError::repo(msg));
        }

        let mut tree: BTreeMap<PathBuf, Vec<u8>> = BTreeMap::new();
        for rel in pathutil::list_files(&result.workdir)? {
            if !files.matches(&rel) {
                continue;
            }
            tree.insert(rel.clone(), fs::read(result.workdir.join(&rel))?);
        }

        // An identical tree with an identical message is an empty change.
        if let Some(last) = state.processed.iter().rev().find(|c| !c.dry_run)
            && last.files == tree
            && last.message == result.summary
        {
            return Ok(vec![]);
        }

        state.next_id += 1;
        let id = format!("dest-{}", state.next_id);
        state.processed.push(ProcessedChange {
            id: id.clone(),
            author: result.author.clone(),
            message: result.summary.clone(),
            origin_ref: result.current.canonical().to_string(),
            baseline: result.baseline.clone(),
            files: tree,
            dry_run: self.dry_run,
        });

        Ok(vec![Effect::new(EffectKind::Created, result.summary.lines().next().unwrap_or("").to_string())
            .with_origin_ref(result.current.canonical())
            .with_destination_ref(DestinationRef {
                id,
                kind: "commit".to_string(),
                url: None,
            })])
    }

    fn send_message(&mut self, msg: &str) -> Result<(), RelayError> {
        self.state
            .borrow_mut()
            .endpoint_messages
            .push(msg.to_string());
        Ok(())
    }

    fn patch_regenerator(&mut self) -> Option<&mut dyn PatchRegenerator> {
        Some(self)
    }

    fn finish(&mut self) -> Result<(), RelayError> {
        // Dry-run state lives only within one invocation.
        if self.dry_run {
            self.state.borrow_mut().processed.retain(|c| !c.dry_run);
        }
        Ok(())
    }
}

impl PatchRegenerator for RecordingWriter {
    fn infer_regen_target(&self) -> Result<Option<String>, RelayError> {
        Ok(self.state.borrow().regen.target.clone())
    }

    fn infer_regen_baseline(&self) -> Result<Option<String>, RelayError> {
        Ok(self.state.borrow().regen.baseline.clone())
    }

    fn infer_import_baseline(&self) -> Result<Option<String>, RelayError> {
        Ok(self.state.borrow().regen.import_baseline.clone())
    }

    fn update_change(
        &mut self,
        _original: Option<&str>,
        workdir: &Path,
        files: &Glob,
        target: &str,
    ) -> Result<Vec<Effect>, RelayError> {
        let mut tree: BTreeMap<PathBuf, Vec<u8>> = BTreeMap::new();
        for rel in pathutil::list_files(workdir)? {
            if files.matches(&rel) {
                tree.insert(rel.clone(), fs::read(workdir.join(&rel))?);
            }
        }
        self.state
            .borrow_mut()
            .regen
            .updated
            .push((target.to_string(), tree));
        Ok(vec![Effect::new(
            EffectKind::Updated,
            format!("regenerated {target}"),
        )])
    }
}

struct RecordingReader {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl DestinationReader for RecordingReader {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, RelayError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RelayError::repo(format!("'{}' not in destination", path.display())))
    }

    fn copy_destination_files(&self, files: &Glob, dir: &Path) -> Result<(), RelayError> {
        for (rel, content) in &self.files {
            if !files.matches(rel) {
                continue;
            }
            let full = pathutil::resolve_within_root(dir, rel)?;
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(full, content)?;
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}
