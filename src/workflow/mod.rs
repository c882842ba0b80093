//! Workflow definitions: the migration modes, the per-invocation options
//! carried from the command line, and the retry schedule used by the
//! destination-as-source-of-truth mode.

pub mod info;
pub mod regenerate;
pub mod runner;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::author::{Author, AuthoringPolicy};
use crate::destination::Destination;
use crate::effects::Action;
use crate::errors::RelayError;
use crate::glob::Glob;
use crate::hash::HashKind;
use crate::merge::MergeImportConfig;
use crate::merge::autopatch::AutoPatchConfig;
use crate::origin::Origin;
use crate::transform::Sequence;

/// The four migration modes of the workflow runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowMode {
    /// One destination change representing all origin commits since the last
    /// migrated revision.
    #[default]
    Squash,
    /// One destination change per origin commit, parent first.
    Iterative,
    /// One destination change for a pre-submit review, diffed against a
    /// labeled ancestor.
    ChangeRequest,
    /// Change request against the destination as source of truth; waits for
    /// the referenced baseline to appear in the destination log.
    ChangeRequestFromSot,
}

impl std::fmt::Display for WorkflowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkflowMode::Squash => "SQUASH",
            WorkflowMode::Iterative => "ITERATIVE",
            WorkflowMode::ChangeRequest => "CHANGE_REQUEST",
            WorkflowMode::ChangeRequestFromSot => "CHANGE_REQUEST_FROM_SOT",
        };
        f.write_str(name)
    }
}

/// Delay sequence between baseline-lookup attempts. The first attempt is
/// immediate; each listed delay precedes one retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    /// No retries: a single attempt.
    pub fn none() -> RetrySchedule {
        RetrySchedule { delays: vec![] }
    }

    pub fn per_element(delays: Vec<Duration>) -> RetrySchedule {
        RetrySchedule { delays }
    }

    /// Exponential backoff: `base`, `base*factor`, ... capped at `cap`, for
    /// `retries` retries.
    pub fn exponential(base: Duration, factor: u32, retries: usize, cap: Duration) -> RetrySchedule {
        let mut delays = vec![];
        let mut current = base;
        for _ in 0..retries {
            delays.push(current.min(cap));
            current = current.saturating_mul(factor).min(cap);
        }
        RetrySchedule { delays }
    }

    /// Parse the CLI form: either `exponential:<base>:<retries>` or a
    /// comma-separated delay list such as `1s,5s,30s`.
    pub fn parse(s: &str) -> Result<RetrySchedule, RelayError> {
        if let Some(rest) = s.strip_prefix("exponential:") {
            let mut parts = rest.split(':');
            let base = parts
                .next()
                .map(parse_duration)
                .transpose()?
                .ok_or_else(|| RelayError::CommandLine(format!("Bad retry schedule '{s}'")))?;
            let retries: usize = parts
                .next()
                .and_then(|r| r.parse().ok())
                .ok_or_else(|| RelayError::CommandLine(format!("Bad retry schedule '{s}'")))?;
            return Ok(RetrySchedule::exponential(
                base,
                2,
                retries,
                Duration::from_secs(300),
            ));
        }
        let delays: Result<Vec<Duration>, RelayError> =
            s.split(',').map(|d| parse_duration(d.trim())).collect();
        Ok(RetrySchedule::per_element(delays?))
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Parse `500ms`, `2s`, `3m` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, RelayError> {
    let bad = || RelayError::CommandLine(format!("Cannot parse duration '{s}'"));
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.parse().map(Duration::from_millis).map_err(|_| bad());
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.parse().map(Duration::from_secs).map_err(|_| bad());
    }
    if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| bad())?;
        return Ok(Duration::from_secs(mins * 60));
    }
    s.parse().map(Duration::from_secs).map_err(|_| bad())
}

/// A fully assembled migration workflow.
#[derive(Debug)]
pub struct Workflow {
    pub name: String,
    pub origin: Box<dyn Origin>,
    pub destination: Box<dyn Destination>,
    pub origin_files: Glob,
    pub destination_files: Glob,
    pub authoring: AuthoringPolicy,
    pub transformations: Sequence,
    /// Run on the merged tree, after merge import and before artifacts.
    pub after_merge_transformations: Sequence,
    pub after_migration: Vec<Box<dyn Action>>,
    pub after_workflow: Vec<Box<dyn Action>>,
    pub mode: WorkflowMode,
    /// Stamp the rev-id label into the destination message.
    pub set_rev_id: bool,
    /// Rename the rev-id label away from the origin's default.
    pub custom_rev_id: Option<String>,
    pub smart_prune: bool,
    pub migrate_noop_changes: bool,
    pub merge_import: Option<MergeImportConfig>,
    pub consistency_file_path: Option<PathBuf>,
    pub consistency_file_hash: HashKind,
    pub autopatch: Option<AutoPatchConfig>,
    pub reversible_check: bool,
    pub reversible_check_ignore: Option<Glob>,
    pub check_last_rev_state: bool,
    pub expected_fixed_ref: Option<String>,
    pub pinned_fixed_ref: Option<String>,
    pub diff_in_origin: bool,
    /// `false` skips the origin checkout (message-only migrations).
    pub checkout: bool,
}

impl Workflow {
    /// A workflow with the given endpoints and every option at its default.
    /// The default authoring identity falls back to `$USER`.
    pub fn new(
        name: impl Into<String>,
        origin: Box<dyn Origin>,
        destination: Box<dyn Destination>,
    ) -> Workflow {
        let user = std::env::var("USER").unwrap_or_else(|_| "repo-relay".to_string());
        Workflow {
            name: name.into(),
            origin,
            destination,
            origin_files: Glob::all(),
            destination_files: Glob::all(),
            authoring: AuthoringPolicy::PassThru {
                default: Author::new(user.clone(), format!("{user}@localhost")),
            },
            transformations: Sequence::default(),
            after_merge_transformations: Sequence::default(),
            after_migration: vec![],
            after_workflow: vec![],
            mode: WorkflowMode::Squash,
            set_rev_id: true,
            custom_rev_id: None,
            smart_prune: false,
            migrate_noop_changes: false,
            merge_import: None,
            consistency_file_path: None,
            consistency_file_hash: HashKind::Sha256,
            autopatch: None,
            reversible_check: false,
            reversible_check_ignore: None,
            check_last_rev_state: false,
            expected_fixed_ref: None,
            pinned_fixed_ref: None,
            diff_in_origin: false,
            checkout: true,
        }
    }

    /// The label under which imported origin revisions are recorded in
    /// destination messages.
    pub fn rev_id_label(&self) -> String {
        self.custom_rev_id
            .clone()
            .unwrap_or_else(|| self.origin.label_name())
    }
}

/// Per-invocation options, mostly mapped from command-line flags.
#[derive(Debug, Default)]
pub struct WorkflowOptions {
    pub force: bool,
    pub init_history: bool,
    pub dry_run: bool,
    /// Override the last-imported revision lookup.
    pub last_revision: Option<String>,
    pub iterative_limit: Option<usize>,
    pub ignore_noop: bool,
    pub migrate_noop_changes: bool,
    pub smart_prune: Option<bool>,
    pub change_request_parent: Option<String>,
    pub from_sot_retry: RetrySchedule,
    pub from_sot_limit: Option<usize>,
    pub expected_fixed_ref: Option<String>,
    pub pinned_fixed_ref: Option<String>,
    pub same_version: bool,
    pub force_author: Option<Author>,
    pub force_message: Option<String>,
    pub cli_labels: BTreeMap<String, String>,
    pub workflow_identity_user: Option<String>,
    pub keep_workdir: bool,
    pub check_last_rev_state: bool,
    pub disable_consistency_merge_import: bool,
    pub diff_in_origin: bool,
    pub temporary_features: BTreeMap<String, bool>,
}
