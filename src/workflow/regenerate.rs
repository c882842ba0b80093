//! Regenerate: rebuild the autopatch and consistency-file artifacts after
//! destination-side edits, without importing anything new.

use std::path::{Path, PathBuf};

use crate::console::Console;
use crate::destination::WriterContext;
use crate::effects::Effect;
use crate::errors::RelayError;
use crate::merge::autopatch;
use crate::merge::consistency::ConsistencyFile;
use crate::pathutil;
use crate::revision::Changes;
use crate::work::TransformWork;
use crate::workflow::Workflow;

/// Selection inputs for a regenerate run.
#[derive(Debug, Clone, Default)]
pub struct RegenOptions {
    /// Destination ref whose tree is the new truth.
    pub regen_target: Option<String>,
    /// Destination ref to reverse back to the pristine import.
    pub regen_baseline: Option<String>,
    /// Rebuild the baseline from a fresh origin import instead of a
    /// destination ref.
    pub regen_import_baseline: bool,
}

/// Re-create the patch artifacts for an in-flight destination change.
pub fn regenerate(
    workflow: &Workflow,
    regen: &RegenOptions,
    source_ref: Option<&str>,
    workdir: &Path,
    console: &Console,
) -> Result<Vec<Effect>, RelayError> {
    let ctx = WriterContext {
        workflow_name: workflow.name.clone(),
        workflow_identity_user: None,
        dry_run: false,
    };
    let mut writer = workflow.destination.new_writer(&ctx)?;

    let outcome = (|| {
        let regenerator = writer.patch_regenerator().ok_or_else(|| {
            RelayError::validation("this destination does not support patch regeneration")
        })?;

        let target = match &regen.regen_target {
            Some(t) => t.clone(),
            None => regenerator.infer_regen_target()?.ok_or_else(|| {
                RelayError::validation(
                    "Could not infer the regen target; pass --regen-target explicitly",
                )
            })?,
        };

        let baseline = match &regen.regen_baseline {
            Some(b) => Some(b.clone()),
            None => regenerator.infer_regen_baseline()?,
        };
        let import_baseline = if baseline.is_none() || regen.regen_import_baseline {
            let reference = match source_ref {
                Some(r) => Some(r.to_string()),
                None => {
                    let inferred = regenerator.infer_import_baseline()?;
                    if inferred.is_none() {
                        console.warn(
                            "No import baseline recorded; regenerating against the origin head",
                        );
                    }
                    inferred
                }
            };
            Some(reference)
        } else {
            None
        };
        drop(regenerator);

        // The target tree is the truth the artifacts must describe.
        let target_dir = workdir.join("regen-target");
        pathutil::ensure_clean_dir(&target_dir)?;
        writer
            .destination_reader(Some(&target), workdir)?
            .copy_destination_files(&workflow.destination_files, &target_dir)?;

        // The pristine tree: reversed from a destination baseline via the
        // consistency file, or freshly imported and transformed.
        let pristine_dir = workdir.join("regen-pristine");
        match (&baseline, &import_baseline) {
            (Some(baseline), None) => {
                reverse_destination_baseline(workflow, writer.as_mut(), baseline, workdir, &pristine_dir)?
            }
            (_, Some(reference)) => {
                import_pristine(workflow, reference.as_deref(), &pristine_dir, console)?
            }
            (None, None) => unreachable!("one baseline source is always chosen"),
        }

        if let Some(cf_path) = &workflow.consistency_file_path {
            let full = target_dir.join(cf_path);
            if full.exists() {
                std::fs::remove_file(&full)?;
                pathutil::prune_empty_dirs(&target_dir, &full)?;
            }
        }

        if let Some(cfg) = &workflow.autopatch {
            autopatch::write_patch_files(&pristine_dir, &target_dir, cfg)?;
        }
        if let Some(cf_path) = &workflow.consistency_file_path {
            let cf = ConsistencyFile::generate(
                &pristine_dir,
                &target_dir,
                workflow.consistency_file_hash,
                Some(cf_path),
            )?;
            let full = pathutil::resolve_within_root(&target_dir, cf_path)?;
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(full, cf.serialize())?;
        }

        let regenerator = writer.patch_regenerator().ok_or_else(|| {
            RelayError::validation("this destination does not support patch regeneration")
        })?;
        regenerator.update_change(
            baseline.as_deref(),
            &target_dir,
            &workflow.destination_files,
            &target,
        )
    })();

    let finished = writer.finish();
    let effects = outcome?;
    finished?;
    Ok(effects)
}

/// Reconstruct the pristine tree by reverse-applying the consistency file
/// found at the destination baseline.
fn reverse_destination_baseline(
    workflow: &Workflow,
    writer: &mut dyn crate::destination::DestinationWriter,
    baseline: &str,
    workdir: &Path,
    pristine_dir: &PathBuf,
) -> Result<(), RelayError> {
    let cf_path = workflow.consistency_file_path.as_ref().ok_or_else(|| {
        RelayError::validation(
            "Regenerating from a destination baseline requires a consistency file path",
        )
    })?;
    let reader = writer.destination_reader(Some(baseline), workdir)?;
    pathutil::ensure_clean_dir(pristine_dir)?;
    reader.copy_destination_files(&workflow.destination_files, pristine_dir)?;

    let text = String::from_utf8(reader.read_file(cf_path)?)
        .map_err(|_| RelayError::validation("Consistency file is not valid UTF-8"))?;
    let cf = ConsistencyFile::parse(&text)?;
    cf.validate_hashes(pristine_dir)?;

    let full = pristine_dir.join(cf_path);
    if full.exists() {
        std::fs::remove_file(&full)?;
        pathutil::prune_empty_dirs(pristine_dir, &full)?;
    }
    cf.reverse_apply(pristine_dir)?;
    Ok(())
}

/// Import the origin at `reference` (head when `None`) and run the pipeline
/// to produce the pristine tree.
fn import_pristine(
    workflow: &Workflow,
    reference: Option<&str>,
    pristine_dir: &Path,
    console: &Console,
) -> Result<(), RelayError> {
    let rev = workflow.origin.resolve(reference)?;
    pathutil::ensure_clean_dir(pristine_dir)?;
    workflow
        .origin
        .checkout(&rev, pristine_dir, &workflow.origin_files)?;
    let change = workflow.origin.change(&rev)?;
    let mut work = TransformWork::new(
        pristine_dir.to_path_buf(),
        change.message.clone(),
        workflow.authoring.resolve(&change.author),
        rev.clone(),
        rev.clone(),
        reference.map(|r| r.to_string()),
        Changes {
            current: vec![change],
            migrated: vec![],
        },
        console.clone(),
        workflow.name.clone(),
    );
    work.ignore_noop = true;
    workflow.transformations.run_pipeline(&mut work)?;
    Ok(())
}
