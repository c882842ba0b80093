//! Shared helpers for the workflow integration tests.

use repo_relay::console::Console;
use repo_relay::effects::EffectKind;
use repo_relay::errors::RelayError;
use repo_relay::workflow::runner::{RunResult, WorkflowRunner};
use repo_relay::workflow::{Workflow, WorkflowOptions};

/// Run a workflow in a throwaway workdir.
pub fn run_workflow(
    workflow: &Workflow,
    options: WorkflowOptions,
    source_ref: Option<&str>,
) -> Result<RunResult, RelayError> {
    let workdir = tempfile::tempdir().expect("create workdir");
    let runner = WorkflowRunner::new(
        workflow,
        options,
        Console::default(),
        workdir.path().to_path_buf(),
    );
    runner.run(source_ref)
}

#[allow(dead_code)]
pub fn created_count(result: &RunResult) -> usize {
    result
        .effects
        .iter()
        .filter(|e| e.kind == EffectKind::Created)
        .count()
}
