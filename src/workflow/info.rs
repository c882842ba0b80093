//! Read-only workflow introspection: where the origin head is, what was last
//! migrated, and which changes are still pending.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::destination::WriterContext;
use crate::errors::RelayError;
use crate::revision::Revision;
use crate::workflow::Workflow;

/// Summary of one pending change.
#[derive(Debug, Clone, Serialize)]
pub struct PendingChange {
    pub revision: String,
    pub summary: String,
    pub author: String,
}

/// The result of `info`: no destination mutation, no checkout.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationInfo {
    pub workflow: String,
    pub mode: String,
    pub origin: BTreeMap<String, String>,
    pub destination: BTreeMap<String, String>,
    pub origin_head: Option<String>,
    /// Value of the rev-id label in the newest destination change.
    pub last_migrated: Option<String>,
    /// The most recent path-affecting ancestor of the origin head; the
    /// revision a SQUASH run would import next.
    pub last_available: Option<String>,
    pub pending: Vec<PendingChange>,
    /// Labels of the last available revision (describe output, full refs).
    pub available_labels: BTreeMap<String, String>,
}

/// Collect migration state without mutating anything.
pub fn info(workflow: &Workflow) -> Result<MigrationInfo, RelayError> {
    let head = workflow.origin.resolve(None).ok();

    let writer = workflow.destination.new_writer(&WriterContext {
        workflow_name: workflow.name.clone(),
        workflow_identity_user: None,
        dry_run: true,
    })?;
    let last_migrated = writer
        .destination_status(&workflow.destination_files, &workflow.rev_id_label())?
        .map(|s| s.baseline);

    let mut pending = vec![];
    let mut last_available: Option<Revision> = None;
    if let Some(head) = &head
        && workflow.origin.supports_history()
    {
        let from = last_migrated.as_deref().map(Revision::new);
        for change in workflow.origin.changes(from.as_ref(), head)?.changes {
            if !change.touches(&workflow.origin_files) {
                continue;
            }
            last_available = Some(change.revision.clone());
            pending.push(PendingChange {
                revision: change.revision.canonical().to_string(),
                summary: change.first_line().to_string(),
                author: change.author.to_string(),
            });
        }
    }

    let mut available_labels = BTreeMap::new();
    if let Some(rev) = &last_available {
        for (name, values) in rev.labels() {
            if let Some(value) = values.first() {
                available_labels.insert(name.clone(), value.clone());
            }
        }
        if let Some(context) = rev.context_ref() {
            available_labels.insert("FULL_REF".to_string(), format!("refs/heads/{context}"));
        }
    }

    Ok(MigrationInfo {
        workflow: workflow.name.clone(),
        mode: workflow.mode.to_string(),
        origin: workflow.origin.describe(),
        destination: workflow.destination.describe(),
        origin_head: head.map(|r| r.canonical().to_string()),
        last_migrated,
        last_available: last_available.map(|r| r.canonical().to_string()),
        pending,
        available_labels,
    })
}
