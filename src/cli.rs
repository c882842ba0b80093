//! Command-line surface: subcommands `migrate` (the default), `validate`,
//! `info` and `regenerate`, the flag set the workflow runner consumes, and
//! the process exit codes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::author::Author;
use crate::config::ConfigFile;
use crate::console::{ConfirmMode, Console};
use crate::drivers::folder::FolderDestination;
use crate::errors::RelayError;
use crate::workflow::info::info;
use crate::workflow::regenerate::{RegenOptions, regenerate};
use crate::workflow::runner::WorkflowRunner;
use crate::workflow::{RetrySchedule, WorkflowOptions};

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    CommandLineError = 1,
    ConfigurationError = 2,
    EnvironmentError = 3,
    RepositoryError = 4,
    Interrupted = 5,
    InternalError = 6,
}

impl ExitCode {
    pub fn for_error(error: &RelayError) -> ExitCode {
        match error {
            RelayError::CommandLine(_) => ExitCode::CommandLineError,
            RelayError::Config(_) => ExitCode::ConfigurationError,
            RelayError::Repo(_) | RelayError::CannotResolveRevision(_) => {
                ExitCode::RepositoryError
            }
            RelayError::Cancelled => ExitCode::Interrupted,
            RelayError::IOError(_) => ExitCode::EnvironmentError,
            _ => ExitCode::InternalError,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "repo-relay", version)]
#[command(about = "One-way source-code migration between repositories")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Arguments of the implicit default subcommand (`migrate`).
    #[command(flatten)]
    pub migrate: MigrateArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a migration (the default subcommand).
    Migrate(MigrateArgs),
    /// Load and validate a configuration, running nothing.
    Validate(ValidateArgs),
    /// Show migration state: origin head, last migrated, pending changes.
    Info(InfoArgs),
    /// Rebuild autopatch and consistency-file artifacts after destination
    /// edits.
    Regenerate(RegenerateArgs),
}

#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    /// Path to the configuration file.
    pub config: Option<PathBuf>,

    /// Workflow name within the configuration.
    #[arg(default_value = "default")]
    pub workflow: String,

    /// Source refs to migrate (defaults to the origin head).
    pub source_refs: Vec<String>,

    /// Migrate even when the baseline checks advise against it.
    #[arg(long)]
    pub force: bool,

    /// Override the last imported revision.
    #[arg(long)]
    pub last_revision: Option<String>,

    /// Verify the destination matches a fresh transform of the last
    /// imported revision before migrating.
    #[arg(long)]
    pub check_last_rev_state: bool,

    /// Start a new migration history when no baseline label is found.
    #[arg(long)]
    pub init_history: bool,

    /// Run everything except persistent destination mutations.
    #[arg(long)]
    pub dry_run: bool,

    /// Force SQUASH mode for this run.
    #[arg(long)]
    pub squash: bool,

    /// Cap the number of changes migrated in ITERATIVE mode.
    #[arg(long = "iterative-limit-changes")]
    pub iterative_limit_changes: Option<usize>,

    /// Downgrade no-op transformations to warnings.
    #[arg(long)]
    pub ignore_noop: bool,

    /// Migrate changes that touch no origin file.
    #[arg(long)]
    pub migrate_noop_changes: bool,

    /// Restrict change requests to files that differ from the baseline.
    #[arg(long, overrides_with = "no_smart_prune")]
    pub smart_prune: bool,

    /// Disable smart pruning even when the workflow enables it.
    #[arg(long = "no-smart-prune")]
    pub no_smart_prune: bool,

    /// Baseline for CHANGE_REQUEST mode, overriding the label scan.
    #[arg(long)]
    pub change_request_parent: Option<String>,

    /// How many destination log entries to consider in
    /// CHANGE_REQUEST_FROM_SOT mode.
    #[arg(long = "change-request-from-sot-limit")]
    pub change_request_from_sot_limit: Option<usize>,

    /// Retry schedule while the baseline is missing:
    /// `exponential:<base>:<retries>` or `1s,5s,30s`.
    #[arg(long = "change-request-from-sot-retry")]
    pub change_request_from_sot_retry: Option<String>,

    /// Only migrate when the resolved revision carries this fixed ref.
    #[arg(long)]
    pub expected_fixed_ref: Option<String>,

    /// Migrate the ancestor carrying this fixed ref instead of the resolved
    /// revision.
    #[arg(long)]
    pub pinned_fixed_ref: Option<String>,

    /// Allow re-importing the already-migrated version.
    #[arg(long)]
    pub same_version: bool,

    /// Show the diff computed in the origin before migrating.
    #[arg(long)]
    pub diff_in_origin: bool,

    /// Attribute every written change to this author (`Name <email>`).
    #[arg(long)]
    pub force_author: Option<String>,

    /// Use this message for every written change.
    #[arg(long)]
    pub force_message: Option<String>,

    /// Write to a folder at this path instead of the configured destination.
    #[arg(long)]
    pub to_folder: Option<PathBuf>,

    /// Labels visible to transformations and actions: `K=V,K2=V2`.
    #[arg(long)]
    pub labels: Option<String>,

    /// Feature toggles: `NAME:true,OTHER:false`.
    #[arg(long)]
    pub temporary_features: Option<String>,

    /// Identity recorded by destinations that track who ran the migration.
    #[arg(long)]
    pub workflow_identity_user: Option<String>,

    /// Keep the scratch directories for debugging.
    #[arg(long)]
    pub keep_workdir: bool,

    /// Ignore the consistency file when reconstructing the merge baseline.
    #[arg(long)]
    pub disable_consistency_merge_import: bool,

    /// Answer yes to every confirmation prompt.
    #[arg(long)]
    pub assume_yes: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the configuration file.
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Path to the configuration file.
    pub config: PathBuf,

    /// Workflow name within the configuration.
    #[arg(default_value = "default")]
    pub workflow: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RegenerateArgs {
    /// Path to the configuration file.
    pub config: PathBuf,

    /// Workflow name within the configuration.
    #[arg(default_value = "default")]
    pub workflow: String,

    /// Source ref for `--regen-import-baseline`.
    pub source_ref: Option<String>,

    /// Destination ref whose tree is the new truth.
    #[arg(long)]
    pub regen_target: Option<String>,

    /// Destination ref to reverse back to the pristine import.
    #[arg(long)]
    pub regen_baseline: Option<String>,

    /// Rebuild the baseline from a fresh origin import.
    #[arg(long)]
    pub regen_import_baseline: bool,
}

/// Parse `K=V,K2=V2` flag payloads.
fn parse_kv_list(raw: &str) -> Result<BTreeMap<String, String>, RelayError> {
    let mut map = BTreeMap::new();
    for pair in raw.split(',').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').ok_or_else(|| {
            RelayError::CommandLine(format!("'{pair}' is not in KEY=VALUE form"))
        })?;
        map.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(map)
}

fn parse_feature_list(raw: &str) -> Result<BTreeMap<String, bool>, RelayError> {
    let mut map = BTreeMap::new();
    for pair in raw.split(',').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once(':').ok_or_else(|| {
            RelayError::CommandLine(format!("'{pair}' is not in NAME:bool form"))
        })?;
        let value = v
            .trim()
            .parse()
            .map_err(|_| RelayError::CommandLine(format!("'{v}' is not a boolean")))?;
        map.insert(k.trim().to_string(), value);
    }
    Ok(map)
}

impl MigrateArgs {
    fn options(&self) -> Result<WorkflowOptions, RelayError> {
        let force_author = self
            .force_author
            .as_deref()
            .map(str::parse::<Author>)
            .transpose()
            .map_err(|e| RelayError::CommandLine(e.to_string()))?;
        let from_sot_retry = match &self.change_request_from_sot_retry {
            Some(raw) => RetrySchedule::parse(raw)?,
            None => RetrySchedule::none(),
        };
        Ok(WorkflowOptions {
            force: self.force,
            init_history: self.init_history,
            dry_run: self.dry_run,
            last_revision: self.last_revision.clone(),
            iterative_limit: self.iterative_limit_changes,
            ignore_noop: self.ignore_noop,
            migrate_noop_changes: self.migrate_noop_changes,
            smart_prune: if self.no_smart_prune {
                Some(false)
            } else if self.smart_prune {
                Some(true)
            } else {
                None
            },
            change_request_parent: self.change_request_parent.clone(),
            from_sot_retry,
            from_sot_limit: self.change_request_from_sot_limit,
            expected_fixed_ref: self.expected_fixed_ref.clone(),
            pinned_fixed_ref: self.pinned_fixed_ref.clone(),
            same_version: self.same_version,
            force_author,
            force_message: self.force_message.clone(),
            cli_labels: self
                .labels
                .as_deref()
                .map(parse_kv_list)
                .transpose()?
                .unwrap_or_default(),
            workflow_identity_user: self.workflow_identity_user.clone(),
            keep_workdir: self.keep_workdir,
            check_last_rev_state: self.check_last_rev_state,
            disable_consistency_merge_import: self.disable_consistency_merge_import,
            diff_in_origin: self.diff_in_origin,
            temporary_features: self
                .temporary_features
                .as_deref()
                .map(parse_feature_list)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// Execute a parsed invocation. Returns the process exit code.
pub fn run(cli: Cli) -> ExitCode {
    let result = dispatch(cli);
    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            let console = Console::default();
            console.error(&e.to_string());
            ExitCode::for_error(&e)
        }
    }
}

fn dispatch(cli: Cli) -> Result<(), RelayError> {
    match cli.command {
        Some(Command::Validate(args)) => {
            ConfigFile::load(&args.config)?.validate()?;
            Console::default().info("Configuration is valid");
            Ok(())
        }
        Some(Command::Info(args)) => run_info(args),
        Some(Command::Regenerate(args)) => run_regenerate(args),
        Some(Command::Migrate(args)) => run_migrate(args),
        None => run_migrate(cli.migrate),
    }
}

fn run_migrate(args: MigrateArgs) -> Result<(), RelayError> {
    let config_path = args.config.clone().ok_or_else(|| {
        RelayError::CommandLine("missing required <CONFIG> argument".to_string())
    })?;
    if args.source_refs.len() > 1 {
        return Err(RelayError::CommandLine(
            "at most one source ref is supported per invocation".to_string(),
        ));
    }

    let config = ConfigFile::load(&config_path)?;
    let mut workflow = config.build_workflow(&args.workflow)?;
    if args.squash {
        workflow.mode = crate::workflow::WorkflowMode::Squash;
    }
    if let Some(folder) = &args.to_folder {
        workflow.destination = Box::new(FolderDestination::new(folder.clone()));
    }

    let console = Console::new(
        false,
        if args.assume_yes {
            ConfirmMode::AssumeYes
        } else {
            ConfirmMode::Interactive
        },
    );
    let options = args.options()?;
    let workdir = tempfile::Builder::new()
        .prefix("repo-relay-")
        .tempdir()
        .map_err(RelayError::IOError)?;

    let runner = WorkflowRunner::new(&workflow, options, console.clone(), workdir.path().to_path_buf());
    let result = runner.run(args.source_refs.first().map(|s| s.as_str()))?;

    if args.keep_workdir {
        let kept = workdir.keep();
        console.info(&format!("Workdir kept at {}", kept.display()));
    }
    console.info(&format!(
        "Migration '{}' finished with {} effect(s)",
        args.workflow,
        result.effects.len()
    ));
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<(), RelayError> {
    let config = ConfigFile::load(&args.config)?;
    let workflow = config.build_workflow(&args.workflow)?;
    let info = info(&workflow)?;
    if args.json {
        let rendered = serde_json::to_string_pretty(&info)
            .map_err(|e| RelayError::validation(e.to_string()))?;
        println!("{rendered}");
        return Ok(());
    }
    let console = Console::default();
    console.info(&format!("Workflow: {} ({})", info.workflow, info.mode));
    console.info(&format!(
        "Origin head: {}",
        info.origin_head.as_deref().unwrap_or("<unresolvable>")
    ));
    console.info(&format!(
        "Last migrated: {}",
        info.last_migrated.as_deref().unwrap_or("<none>")
    ));
    console.info(&format!(
        "Last available: {}",
        info.last_available.as_deref().unwrap_or("<none>")
    ));
    for pending in &info.pending {
        console.info(&format!(
            "  pending {} {} ({})",
            pending.revision, pending.summary, pending.author
        ));
    }
    for (name, value) in &info.available_labels {
        console.info(&format!("  label {name}={value}"));
    }
    Ok(())
}

fn run_regenerate(args: RegenerateArgs) -> Result<(), RelayError> {
    let config = ConfigFile::load(&args.config)?;
    let workflow = config.build_workflow(&args.workflow)?;
    let console = Console::default();
    let workdir = tempfile::Builder::new()
        .prefix("repo-relay-regen-")
        .tempdir()
        .map_err(RelayError::IOError)?;
    let regen = RegenOptions {
        regen_target: args.regen_target,
        regen_baseline: args.regen_baseline,
        regen_import_baseline: args.regen_import_baseline,
    };
    let effects = regenerate(
        &workflow,
        &regen,
        args.source_ref.as_deref(),
        workdir.path(),
        &console,
    )?;
    console.info(&format!("Regenerated with {} effect(s)", effects.len()));
    Ok(())
}
