//! The workflow runner: drives one migration invocation end-to-end, from
//! revision resolution and per-mode change selection through the
//! transformation pipeline with its guards, merge import and artifact
//! generation, the destination write, and effect recording.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::console::Console;
use crate::destination::{DestinationWriter, TransformResult, WriterContext};
use crate::diff::Diff;
use crate::effects::{Action, ActionResult, ActionContext, Effect, EffectKind};
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::merge::consistency::ConsistencyFile;
use crate::merge::{autopatch, merge_import};
use crate::message::Label;
use crate::pathutil;
use crate::revision::{Change, Changes, LabelMap, Revision};
use crate::transform::Transformation;
use crate::work::TransformWork;
use crate::workflow::{Workflow, WorkflowMode, WorkflowOptions};

/// Aggregate outcome of one invocation.
#[derive(Debug)]
pub struct RunResult {
    pub effects: Vec<Effect>,
}

/// Per-change outcome consumed by the mode drivers.
#[derive(Debug)]
enum MigrationOutcome {
    Created,
    Noop(String),
}

/// Everything `migrate_change` needs to process one batch.
struct ChangeMigration {
    batch: Vec<Change>,
    migrated: Vec<Change>,
    import_rev: Revision,
    resolved: Revision,
    initial_message: String,
    author: crate::author::Author,
    /// Destination baseline handed to the writer (change-request modes).
    destination_baseline: Option<String>,
    /// Origin revision the previous import was taken from, for merge import
    /// and the last-revision state check.
    merge_baseline_rev: Option<String>,
    /// Origin baseline for smart pruning.
    prune_baseline_rev: Option<Revision>,
    index: usize,
}

pub struct WorkflowRunner<'a> {
    workflow: &'a Workflow,
    options: WorkflowOptions,
    console: Console,
    workdir: PathBuf,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(
        workflow: &'a Workflow,
        options: WorkflowOptions,
        console: Console,
        workdir: PathBuf,
    ) -> WorkflowRunner<'a> {
        WorkflowRunner {
            workflow,
            options,
            console,
            workdir,
        }
    }

    /// Run the migration for the given source ref (the origin head when
    /// `None`). The destination writer is finished on every exit path.
    pub fn run(&self, source_ref: Option<&str>) -> Result<RunResult, RelayError> {
        let ctx = WriterContext {
            workflow_name: self.workflow.name.clone(),
            workflow_identity_user: self.options.workflow_identity_user.clone(),
            dry_run: self.options.dry_run,
        };
        let mut writer = self.workflow.destination.new_writer(&ctx)?;
        let outcome = self.run_with_writer(writer.as_mut(), source_ref);
        let finished = writer.finish();
        let result = outcome?;
        finished?;
        Ok(result)
    }

    fn run_with_writer(
        &self,
        writer: &mut dyn DestinationWriter,
        source_ref: Option<&str>,
    ) -> Result<RunResult, RelayError> {
        let mut effects: Vec<Effect> = vec![];
        let run = self.select_and_migrate(writer, source_ref, &mut effects);

        if let Err(e) = &run {
            let kind = match e {
                RelayError::EmptyChange(_) => EffectKind::Noop,
                e if e.is_temporary() => EffectKind::TemporaryError,
                _ => EffectKind::Error,
            };
            effects.push(Effect::new(kind, e.to_string()));
            self.console.error(&format!(
                "Migration '{}' failed: {e}",
                self.workflow.name
            ));
        }

        // After-workflow actions observe the union of effects, on success
        // and on failure alike.
        let action_result =
            self.run_actions(&self.workflow.after_workflow, writer, &mut effects, LabelMap::new());

        run?;
        action_result?;
        Ok(RunResult { effects })
    }

    fn select_and_migrate(
        &self,
        writer: &mut dyn DestinationWriter,
        source_ref: Option<&str>,
        effects: &mut Vec<Effect>,
    ) -> Result<(), RelayError> {
        let resolved = self.workflow.origin.resolve(source_ref)?;
        debug!(workflow = %self.workflow.name, revision = %resolved, "resolved source ref");

        // A defined fixed ref that differs from the expectation blocks the
        // migration; an absent fixed ref never does.
        let expected = self
            .options
            .expected_fixed_ref
            .as_deref()
            .or(self.workflow.expected_fixed_ref.as_deref());
        if let Some(expected) = expected
            && let Some(fixed) = resolved.fixed_ref()
            && fixed != expected
        {
            return Err(RelayError::EmptyChange(format!(
                "Not migrating '{resolved}': its fixed ref {fixed} did not match the expected fixed ref {expected}"
            )));
        }

        let resolved = self.apply_pin(resolved)?;

        let rev_id_label = self.workflow.rev_id_label();
        let last_rev: Option<String> = match &self.options.last_revision {
            Some(last) => Some(last.clone()),
            None => writer
                .destination_status(&self.workflow.destination_files, &rev_id_label)?
                .map(|s| s.baseline),
        };

        match self.workflow.mode {
            WorkflowMode::Squash => self.run_squash(writer, resolved, last_rev, effects),
            WorkflowMode::Iterative => self.run_iterative(writer, resolved, last_rev, effects),
            WorkflowMode::ChangeRequest => {
                self.run_change_request(writer, resolved, last_rev, None, effects)
            }
            WorkflowMode::ChangeRequestFromSot => {
                let baseline = self.find_sot_baseline(writer, &resolved, &rev_id_label)?;
                self.run_change_request(writer, resolved, last_rev, Some(baseline), effects)
            }
        }
    }

    /// Find an ancestor of `resolved` whose fixed ref equals the pin.
    fn apply_pin(&self, resolved: Revision) -> Result<Revision, RelayError> {
        let Some(pin) = self
            .options
            .pinned_fixed_ref
            .as_deref()
            .or(self.workflow.pinned_fixed_ref.as_deref())
        else {
            return Ok(resolved);
        };
        if resolved.fixed_ref() == Some(pin) {
            return Ok(resolved);
        }
        let chain = self.workflow.origin.changes(None, &resolved)?;
        for change in chain.changes.iter().rev() {
            if change.revision.fixed_ref() == Some(pin) {
                return Ok(change.revision.clone());
            }
        }
        Err(RelayError::CannotResolveRevision(format!(
            "no ancestor of '{resolved}' has the pinned fixed ref '{pin}'"
        )))
    }

    fn require_baseline(&self, last_rev: &Option<String>, label: &str) -> Result<(), RelayError> {
        if last_rev.is_none() && !self.options.force && !self.options.init_history {
            return Err(RelayError::validation(format!(
                "Previous revision label {label} could not be found in the destination. \
                 Use --force or --init-history to start a new migration history"
            )));
        }
        Ok(())
    }

    fn run_squash(
        &self,
        writer: &mut dyn DestinationWriter,
        resolved: Revision,
        last_rev: Option<String>,
        effects: &mut Vec<Effect>,
    ) -> Result<(), RelayError> {
        self.require_baseline(&last_rev, &self.workflow.rev_id_label())?;

        if let Some(last) = &last_rev
            && last == resolved.canonical()
            && !self.options.force
            && !self.options.same_version
        {
            return Err(RelayError::EmptyChange(format!(
                "'{resolved}' has been already migrated. Use --force if you really want to run the migration again"
            )));
        }

        let from = last_rev.as_deref().map(Revision::new);
        let response = self.workflow.origin.changes(from.as_ref(), &resolved)?;
        let batch: Vec<Change> = response
            .changes
            .into_iter()
            .filter(|c| c.touches(&self.workflow.origin_files))
            .collect();

        let batch = if batch.is_empty() {
            if !self.options.force && !self.options.same_version {
                return Err(RelayError::EmptyChange(format!(
                    "No new changes to import for resolved ref: {resolved}"
                )));
            }
            vec![self.workflow.origin.change(&resolved)?]
        } else {
            batch
        };

        let last_change = batch.last().expect("batch is never empty here");
        let import_rev = last_change.revision.clone();
        let author = self.workflow.authoring.resolve(&last_change.author);

        let migration = ChangeMigration {
            migrated: vec![],
            import_rev,
            resolved,
            initial_message: "Project import generated by repo-relay.\n".to_string(),
            author,
            destination_baseline: None,
            merge_baseline_rev: last_rev.clone(),
            prune_baseline_rev: None,
            index: 0,
            batch,
        };

        match self.migrate_change(writer, migration, effects)? {
            MigrationOutcome::Created => Ok(()),
            MigrationOutcome::Noop(reason) => {
                if self.options.force || self.options.same_version {
                    effects.push(Effect::new(EffectKind::Noop, reason));
                    Ok(())
                } else {
                    Err(RelayError::EmptyChange(format!(
                        "Migration resulted in an empty change for the destination: {reason}"
                    )))
                }
            }
        }
    }

    fn run_iterative(
        &self,
        writer: &mut dyn DestinationWriter,
        resolved: Revision,
        last_rev: Option<String>,
        effects: &mut Vec<Effect>,
    ) -> Result<(), RelayError> {
        self.require_baseline(&last_rev, &self.workflow.rev_id_label())?;

        let from = last_rev.as_deref().map(Revision::new);
        let response = self.workflow.origin.changes(from.as_ref(), &resolved)?;
        let migrate_noop =
            self.options.migrate_noop_changes || self.workflow.migrate_noop_changes;

        let mut migrated: Vec<Change> = vec![];
        let mut any_created = false;
        let mut previous_rev = last_rev.clone();
        let mut taken = 0usize;

        for (index, change) in response.changes.into_iter().enumerate() {
            if let Some(limit) = self.options.iterative_limit
                && taken >= limit
            {
                self.console
                    .info(&format!("Reached --iterative-limit-changes={limit}, stopping"));
                break;
            }
            if !change.touches(&self.workflow.origin_files) && !migrate_noop {
                self.console.warn(&format!(
                    "Skipping change {}: no files matching origin_files",
                    change.revision
                ));
                effects.push(
                    Effect::new(EffectKind::Noop, format!("Skipped change {}", change.revision))
                        .with_origin_ref(change.revision.canonical()),
                );
                continue;
            }
            taken += 1;

            let author = self.workflow.authoring.resolve(&change.author);
            let migration = ChangeMigration {
                batch: vec![change.clone()],
                migrated: migrated.clone(),
                import_rev: change.revision.clone(),
                resolved: resolved.clone(),
                initial_message: change.message.clone(),
                author,
                destination_baseline: None,
                merge_baseline_rev: previous_rev.clone(),
                prune_baseline_rev: None,
                index,
            };

            match self.migrate_change(writer, migration, effects) {
                Ok(MigrationOutcome::Created) => {
                    any_created = true;
                    previous_rev = Some(change.revision.canonical().to_string());
                    migrated.push(change);
                }
                Ok(MigrationOutcome::Noop(reason)) => {
                    self.console.warn(&format!(
                        "Change {} produced an empty migration: {reason}",
                        change.revision
                    ));
                    effects.push(
                        Effect::new(EffectKind::Noop, reason)
                            .with_origin_ref(change.revision.canonical()),
                    );
                    previous_rev = Some(change.revision.canonical().to_string());
                }
                Err(RelayError::EmptyChange(reason)) => {
                    self.console.warn(&format!(
                        "Skipping change {}: {reason}",
                        change.revision
                    ));
                    effects.push(
                        Effect::new(EffectKind::Noop, reason)
                            .with_origin_ref(change.revision.canonical()),
                    );
                    previous_rev = Some(change.revision.canonical().to_string());
                }
                Err(e) => return Err(e),
            }
        }

        if !any_created {
            return Err(RelayError::EmptyChange(format!(
                "Iterative migration up to {resolved} did not produce any destination change"
            )));
        }
        Ok(())
    }

    fn run_change_request(
        &self,
        writer: &mut dyn DestinationWriter,
        resolved: Revision,
        last_rev: Option<String>,
        sot_baseline: Option<String>,
        effects: &mut Vec<Effect>,
    ) -> Result<(), RelayError> {
        let chain = self.workflow.origin.changes(None, &resolved)?.changes;
        let dest_label = self.workflow.destination.label_name();

        // Baseline priority: destination-log lookup (SOT mode), explicit
        // parent flag, then the labeled ancestor scan.
        let (baseline_value, baseline_rev) = if let Some(value) = sot_baseline {
            let rev = chain
                .iter()
                .find(|c| c.revision.canonical() == value)
                .map(|c| c.revision.clone());
            (value, rev)
        } else if let Some(parent) = &self.options.change_request_parent {
            let rev = chain
                .iter()
                .find(|c| c.revision.canonical() == parent.as_str())
                .map(|c| c.revision.clone());
            (parent.clone(), rev)
        } else {
            let mut found = None;
            for change in chain.iter().rev() {
                if let Some(value) =
                    crate::message::ChangeMessage::parse(&change.message).get_label(&dest_label)
                {
                    found = Some((value, Some(change.revision.clone())));
                    break;
                }
            }
            found.ok_or_else(|| {
                RelayError::validation(format!(
                    "Cannot find a baseline: no ancestor of '{resolved}' carries the label {dest_label}"
                ))
            })?
        };

        // The batch is every ancestor after the baseline, up to the head.
        let batch: Vec<Change> = match &baseline_rev {
            Some(rev) => chain
                .iter()
                .skip_while(|c| c.revision != *rev)
                .skip(1)
                .cloned()
                .collect(),
            None => chain.clone(),
        };
        let head_change = batch
            .last()
            .cloned()
            .or_else(|| chain.last().cloned())
            .ok_or_else(|| {
                RelayError::EmptyChange(format!("No changes found for change request '{resolved}'"))
            })?;

        let smart_prune = self.options.smart_prune.unwrap_or(self.workflow.smart_prune);
        let migration = ChangeMigration {
            migrated: vec![],
            import_rev: head_change.revision.clone(),
            resolved: resolved.clone(),
            initial_message: head_change.message.clone(),
            author: self.workflow.authoring.resolve(&head_change.author),
            destination_baseline: Some(baseline_value),
            merge_baseline_rev: last_rev,
            prune_baseline_rev: if smart_prune { baseline_rev } else { None },
            index: 0,
            batch,
        };

        match self.migrate_change(writer, migration, effects)? {
            MigrationOutcome::Created => Ok(()),
            MigrationOutcome::Noop(reason) => Err(RelayError::EmptyChange(format!(
                "Change request resulted in an empty change: {reason}"
            ))),
        }
    }

    /// Walk the destination log (with the configured backoff schedule) until
    /// an ancestor of the change request shows up as imported.
    fn find_sot_baseline(
        &self,
        writer: &mut dyn DestinationWriter,
        resolved: &Revision,
        rev_id_label: &str,
    ) -> Result<String, RelayError> {
        let chain = self.workflow.origin.changes(None, resolved)?.changes;
        let mut ancestors: Vec<String> = chain
            .iter()
            .filter(|c| c.revision != *resolved)
            .map(|c| c.revision.canonical().to_string())
            .collect();
        if let Some(limit) = self.options.from_sot_limit {
            let skip = ancestors.len().saturating_sub(limit);
            ancestors.drain(..skip);
        }

        let mut attempt = 0usize;
        loop {
            if let Some(status) =
                writer.destination_status(&self.workflow.destination_files, rev_id_label)?
                && ancestors.contains(&status.baseline)
            {
                return Ok(status.baseline);
            }
            let Some(delay) = self.options.from_sot_retry.delays().get(attempt) else {
                return Err(RelayError::repo(format!(
                    "Baseline of '{resolved}' not found in the destination after {} attempts",
                    attempt + 1
                )));
            };
            self.console.warn(&format!(
                "Baseline not present in the destination yet, retrying in {delay:?}"
            ));
            std::thread::sleep(*delay);
            attempt += 1;
        }
    }

    // ---- one change end-to-end ----

    fn migrate_change(
        &self,
        writer: &mut dyn DestinationWriter,
        m: ChangeMigration,
        effects: &mut Vec<Effect>,
    ) -> Result<MigrationOutcome, RelayError> {
        let scratch = self.workdir.join(format!("run-{}", m.index));
        let mut result = self.migrate_in_scratch(writer, &m, &scratch, effects);

        // Record failures on the ledger before the hooks observe it.
        if let Err(e) = &result
            && !matches!(e, RelayError::EmptyChange(_))
        {
            let kind = if e.is_temporary() {
                EffectKind::TemporaryError
            } else {
                EffectKind::Error
            };
            effects.push(
                Effect::new(kind, e.to_string()).with_origin_ref(m.import_rev.canonical()),
            );
        }

        // The after-migration hooks run exactly once per change, on success
        // and on failure alike; an intentional empty change skips them.
        if !matches!(result, Err(RelayError::EmptyChange(_))) {
            let labels = m.batch.last().map(|c| c.labels.clone()).unwrap_or_default();
            if let Err(action_err) =
                self.run_actions(&self.workflow.after_migration, writer, effects, labels)
            {
                if result.is_ok() {
                    result = Err(action_err);
                } else {
                    self.console.error(&format!(
                        "After-migration action failed while handling an earlier error: {action_err}"
                    ));
                }
            }
        }

        if !self.options.keep_workdir && scratch.exists() {
            let _ = std::fs::remove_dir_all(&scratch);
        }
        result
    }

    fn migrate_in_scratch(
        &self,
        writer: &mut dyn DestinationWriter,
        m: &ChangeMigration,
        scratch: &Path,
        effects: &mut Vec<Effect>,
    ) -> Result<MigrationOutcome, RelayError> {
        let checkout = scratch.join("checkout");
        pathutil::ensure_clean_dir(&checkout)?;
        if self.workflow.checkout {
            self.workflow
                .origin
                .checkout(&m.import_rev, &checkout, &self.workflow.origin_files)?;
        }

        effects.push(
            Effect::new(
                EffectKind::Started,
                format!("Migration of {} started", m.import_rev),
            )
            .with_origin_ref(m.import_rev.canonical()),
        );

        if self.options.check_last_rev_state || self.workflow.check_last_rev_state {
            if let Some(last) = &m.merge_baseline_rev {
                self.check_last_rev_state(writer, last, &m.resolved, scratch)?;
            }
        }

        let mut work = TransformWork::new(
            checkout.clone(),
            m.initial_message.clone(),
            m.author.clone(),
            m.import_rev.clone(),
            m.resolved.clone(),
            None,
            Changes {
                current: m.batch.clone(),
                migrated: m.migrated.clone(),
            },
            self.console.clone(),
            self.workflow.name.clone(),
        )
        .with_cli_labels(self.options.cli_labels.clone());
        work.ignore_noop = self.options.ignore_noop;

        // Snapshot the pre-transform tree for the reversibility guard.
        let pre_transform = scratch.join("pre-transform");
        if self.workflow.reversible_check {
            self.check_symlinks(&checkout)?;
            pathutil::ensure_clean_dir(&pre_transform)?;
            pathutil::copy_tree(&checkout, &pre_transform, &Glob::all())?;
        }

        self.workflow.transformations.run_pipeline(&mut work)?;

        if let Some(author) = &self.options.force_author {
            work.set_author(author.clone());
        }
        if let Some(message) = &self.options.force_message {
            work.set_message(message);
        }

        if self.workflow.reversible_check {
            self.reversible_check(&work, &pre_transform, scratch)?;
        }

        if let Some(baseline_rev) = &m.prune_baseline_rev {
            self.smart_prune(&work, baseline_rev, &m.resolved, scratch)?;
        }

        // Snapshot the pristine (transformed, pre-merge) tree for merge
        // artifacts.
        let pristine = scratch.join("pristine");
        let needs_pristine = self.workflow.merge_import.is_some()
            || self.workflow.autopatch.is_some()
            || self.workflow.consistency_file_path.is_some();
        if needs_pristine {
            pathutil::ensure_clean_dir(&pristine)?;
            pathutil::copy_tree(&checkout, &pristine, &Glob::all())?;
        }

        if let Some(cfg) = &self.workflow.merge_import {
            if let Some(baseline_rev) = &m.merge_baseline_rev {
                self.run_merge_import(writer, &mut work, cfg, baseline_rev, &m.resolved, scratch, effects)?;
            } else {
                self.console.warn(
                    "Merge import is configured but no previous import was found; skipping merge",
                );
            }
        }

        if let Some(cfg) = &self.workflow.autopatch {
            autopatch::write_patch_files(&pristine, work.checkout_dir(), cfg)?;
        }

        if let Some(cf_path) = &self.workflow.consistency_file_path {
            let cf = ConsistencyFile::generate(
                &pristine,
                work.checkout_dir(),
                self.workflow.consistency_file_hash,
                Some(cf_path),
            )?;
            work.write_file(cf_path, &cf.serialize())?;
        }

        if self.workflow.set_rev_id {
            work.message_mut().add_or_replace_label(Label::with_colon(
                self.workflow.rev_id_label(),
                m.import_rev.canonical(),
            ));
        }

        self.check_destination_files(&work)?;

        if (self.options.diff_in_origin || self.workflow.diff_in_origin)
            && self.workflow.origin.supports_diff_in_origin()
            && let Some(baseline) = &m.merge_baseline_rev
        {
            let diff = self
                .workflow
                .origin
                .diff_in_origin(&Revision::new(baseline.clone()), &m.import_rev)?;
            self.console.info(&diff);
        }

        let result = TransformResult {
            workdir: work.checkout_dir().to_path_buf(),
            author: work.author().clone(),
            timestamp: m.batch.last().and_then(|c| c.timestamp),
            summary: work.message().to_string(),
            current: m.import_rev.clone(),
            baseline: m.destination_baseline.clone(),
            changes: m.batch.clone(),
            rev_id_label: self.workflow.rev_id_label(),
            set_rev_id: self.workflow.set_rev_id,
        };

        let write_effects = writer.write(&result, &self.workflow.destination_files, &self.console)?;
        let created = write_effects
            .iter()
            .any(|e| matches!(e.kind, EffectKind::Created | EffectKind::Updated));
        effects.extend(write_effects);

        if created {
            Ok(MigrationOutcome::Created)
        } else {
            Ok(MigrationOutcome::Noop(format!(
                "the destination already matches '{}'",
                m.import_rev
            )))
        }
    }

    // ---- guards and helpers ----

    fn check_symlinks(&self, root: &Path) -> Result<(), RelayError> {
        for rel in pathutil::list_files(root)? {
            let full = root.join(&rel);
            if full
                .symlink_metadata()
                .map(|meta| meta.file_type().is_symlink())
                .unwrap_or(false)
            {
                pathutil::ensure_no_symlink_escape(root, &full).map_err(|_| {
                    RelayError::validation(format!(
                        "Symlink '{}' points outside the checkout; reversible check cannot proceed",
                        rel.display()
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Run the reverse pipeline on a copy of the transformed tree and demand
    /// it reproduces the pre-transform tree.
    fn reversible_check(
        &self,
        work: &TransformWork,
        pre_transform: &Path,
        scratch: &Path,
    ) -> Result<(), RelayError> {
        let reversed_dir = scratch.join("reversed");
        pathutil::ensure_clean_dir(&reversed_dir)?;
        pathutil::copy_tree(work.checkout_dir(), &reversed_dir, &Glob::all())?;

        let reverse = self.workflow.transformations.reverse()?;
        let mut reverse_work = TransformWork::new(
            reversed_dir.clone(),
            work.message().to_string(),
            work.author().clone(),
            work.current_rev().clone(),
            work.resolved_rev().clone(),
            None,
            Changes::default(),
            self.console.clone(),
            self.workflow.name.clone(),
        );
        reverse_work.ignore_noop = true;
        reverse.transform(&mut reverse_work)?;

        let mut diff_text = String::new();
        for rel in Diff::changed_paths(pre_transform, &reversed_dir, None)? {
            if let Some(ignore) = &self.workflow.reversible_check_ignore
                && ignore.matches(&rel)
            {
                continue;
            }
            let old = std::fs::read(pre_transform.join(&rel)).ok();
            let new = std::fs::read(reversed_dir.join(&rel)).ok();
            diff_text.push_str(&Diff::file(&rel, old.as_deref(), new.as_deref()));
        }

        if diff_text.is_empty() {
            Ok(())
        } else {
            Err(RelayError::validation(format!(
                "Workflow '{}' is not reversible. Undoing the transformations does not restore the original tree:\n{diff_text}",
                self.workflow.name
            )))
        }
    }

    /// Drop files whose transformed content is identical between the origin
    /// baseline and the head, leaving only the change request's real diff.
    fn smart_prune(
        &self,
        work: &TransformWork,
        baseline_rev: &Revision,
        resolved: &Revision,
        scratch: &Path,
    ) -> Result<(), RelayError> {
        let baseline_dir = scratch.join("prune-baseline");
        self.transform_at(baseline_rev, resolved, &baseline_dir)?;

        for rel in pathutil::list_files(work.checkout_dir())? {
            let head = std::fs::read(work.checkout_dir().join(&rel))?;
            let base = match std::fs::read(baseline_dir.join(&rel)) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            if head == base {
                work.delete_file(&rel)?;
            }
        }
        Ok(())
    }

    /// Verify the destination still matches a fresh transform of the last
    /// imported revision.
    fn check_last_rev_state(
        &self,
        writer: &mut dyn DestinationWriter,
        last_rev: &str,
        resolved: &Revision,
        scratch: &Path,
    ) -> Result<(), RelayError> {
        let expected_dir = scratch.join("last-rev-expected");
        self.transform_at(&Revision::new(last_rev), resolved, &expected_dir)?;

        let actual_dir = scratch.join("last-rev-actual");
        pathutil::ensure_clean_dir(&actual_dir)?;
        writer
            .destination_reader(None, scratch)?
            .copy_destination_files(&self.workflow.destination_files, &actual_dir)?;

        let mut diff_text = String::new();
        for rel in Diff::changed_paths(&expected_dir, &actual_dir, None)? {
            if let Some(cf) = &self.workflow.consistency_file_path
                && rel == *cf
            {
                continue;
            }
            if let Some(ap) = &self.workflow.autopatch
                && rel.starts_with(ap.patch_dir())
            {
                continue;
            }
            let old = std::fs::read(expected_dir.join(&rel)).ok();
            let new = std::fs::read(actual_dir.join(&rel)).ok();
            diff_text.push_str(&Diff::file(&rel, old.as_deref(), new.as_deref()));
        }

        if diff_text.is_empty() {
            Ok(())
        } else {
            Err(RelayError::validation(format!(
                "Destination state does not match the expected state for last imported revision {last_rev}:\n{diff_text}"
            )))
        }
    }

    /// Check out `rev` and run the pipeline over it, producing the
    /// transformed tree in `dir`. Used for baselines and state checks.
    fn transform_at(
        &self,
        rev: &Revision,
        resolved: &Revision,
        dir: &Path,
    ) -> Result<(), RelayError> {
        pathutil::ensure_clean_dir(dir)?;
        self.workflow
            .origin
            .checkout(rev, dir, &self.workflow.origin_files)?;
        let change = self.workflow.origin.change(rev)?;
        let mut work = TransformWork::new(
            dir.to_path_buf(),
            change.message.clone(),
            self.workflow.authoring.resolve(&change.author),
            rev.clone(),
            resolved.clone(),
            None,
            Changes {
                current: vec![change],
                migrated: vec![],
            },
            self.console.clone(),
            self.workflow.name.clone(),
        )
        .with_cli_labels(self.options.cli_labels.clone());
        // Baseline reconstruction tolerates transformations that were no-ops
        // at that revision.
        work.ignore_noop = true;
        self.workflow.transformations.run_pipeline(&mut work)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_merge_import(
        &self,
        writer: &mut dyn DestinationWriter,
        work: &mut TransformWork,
        cfg: &crate::merge::MergeImportConfig,
        baseline_rev: &str,
        resolved: &Revision,
        scratch: &Path,
        effects: &mut Vec<Effect>,
    ) -> Result<(), RelayError> {
        // D: the destination tree as it stands.
        let dest_dir = scratch.join("dest-current");
        pathutil::ensure_clean_dir(&dest_dir)?;
        let reader = writer.destination_reader(None, scratch)?;
        reader.copy_destination_files(&self.workflow.destination_files, &dest_dir)?;

        // B: the pristine origin state of the previous import.
        let baseline_dir = scratch.join("merge-baseline");
        pathutil::ensure_clean_dir(&baseline_dir)?;
        let mut baseline_from_consistency = false;
        if cfg.use_consistency_file
            && !self.options.disable_consistency_merge_import
            && let Some(cf_path) = &self.workflow.consistency_file_path
            && reader.exists(cf_path)
        {
            let bytes = reader.read_file(cf_path)?;
            let text = String::from_utf8(bytes)
                .map_err(|_| RelayError::validation("Consistency file is not valid UTF-8"))?;
            let cf = ConsistencyFile::parse(&text)?;
            cf.validate_hashes(&dest_dir)?;
            pathutil::copy_tree(&dest_dir, &baseline_dir, &Glob::all())?;
            cf.reverse_apply(&baseline_dir)?;
            baseline_from_consistency = true;
        }
        if !baseline_from_consistency {
            self.transform_at(&Revision::new(baseline_rev), resolved, &baseline_dir)?;
        }

        // The consistency file is bookkeeping, never merge input.
        if let Some(cf_path) = &self.workflow.consistency_file_path {
            for dir in [&dest_dir, &baseline_dir] {
                let full = dir.join(cf_path);
                if full.exists() {
                    std::fs::remove_file(&full)?;
                    pathutil::prune_empty_dirs(dir, &full)?;
                }
            }
        }

        let report = merge_import(
            work.checkout_dir(),
            &baseline_dir,
            &dest_dir,
            cfg,
            &self.console,
        )?;
        if let Some(summary) = report.error_summary() {
            writer.send_message(&summary)?;
            effects.push(
                Effect::new(EffectKind::Updated, summary)
                    .with_origin_ref(work.current_rev().canonical()),
            );
        }

        if !self.workflow.after_merge_transformations.is_empty() {
            self.workflow.after_merge_transformations.run_pipeline(work)?;
        }
        Ok(())
    }

    fn check_destination_files(&self, work: &TransformWork) -> Result<(), RelayError> {
        let mut offenders = vec![];
        for rel in work.list_files()? {
            if !self.workflow.destination_files.matches(&rel) {
                offenders.push(rel);
            }
        }
        if offenders.is_empty() {
            Ok(())
        } else {
            Err(RelayError::NotADestinationFile(offenders))
        }
    }

    fn run_actions(
        &self,
        actions: &[Box<dyn Action>],
        writer: &mut dyn DestinationWriter,
        effects: &mut Vec<Effect>,
        labels: LabelMap,
    ) -> Result<(), RelayError> {
        for action in actions {
            let mut ctx = ActionContext::new(
                effects.clone(),
                labels.clone(),
                self.options.cli_labels.clone(),
            );
            let outcome = action.run(&mut ctx).map_err(|e| {
                RelayError::validation(format!("Action '{}' failed: {e}", action.name()))
            })?;
            match outcome {
                ActionResult::Success => {}
                ActionResult::Noop(reason) => self
                    .console
                    .warn(&format!("Action '{}' was a no-op: {reason}", action.name())),
                ActionResult::Error(msg) => {
                    return Err(RelayError::validation(format!(
                        "Action '{}' returned an error: {msg}",
                        action.name()
                    )));
                }
            }
            for msg in &ctx.destination_messages {
                writer.send_message(msg)?;
            }
            for msg in &ctx.origin_messages {
                self.console.info(&format!("Message for the origin: {msg}"));
            }
            effects.extend(ctx.recorded.drain(..));
        }
        Ok(())
    }
}
