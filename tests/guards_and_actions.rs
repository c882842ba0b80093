//! Pipeline guards (reversibility, destination-files confinement) and the
//! after-migration action hooks.

mod common;

use common::{created_count, run_workflow};
use repo_relay::effects::{Action, ActionContext, ActionResult, EffectKind};
use repo_relay::errors::RelayError;
use repo_relay::glob::Glob;
use repo_relay::testing::{RecordingDestination, RecordingOrigin};
use repo_relay::transform::{MoveFiles, Replace, Sequence, Transformation};
use repo_relay::workflow::{Workflow, WorkflowOptions};

fn single_change_origin(files: &[(&str, &str)]) -> RecordingOrigin {
    let mut origin = RecordingOrigin::new();
    origin.add_change("1", "one\n", files);
    origin
}

fn init_options() -> WorkflowOptions {
    WorkflowOptions {
        init_history: true,
        ..WorkflowOptions::default()
    }
}

#[test]
fn non_reversible_replace_fails_the_reversible_check() {
    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(single_change_origin(&[("f.txt", "ab")])),
        Box::new(destination.clone()),
    );
    workflow.transformations = Sequence::new(vec![Box::new(
        Replace::literal("a", "b").unwrap(),
    ) as Box<dyn Transformation>]);
    workflow.reversible_check = true;

    let err = run_workflow(&workflow, init_options(), None).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("is not reversible"), "unexpected: {msg}");
    // The failure names the offending path in a unified diff block.
    assert!(msg.contains("f.txt"), "no path in: {msg}");
    assert!(msg.contains("@@"), "no diff hunk in: {msg}");
    assert!(destination.committed().is_empty());
}

#[test]
fn reversible_pipeline_passes_the_check() {
    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(single_change_origin(&[("old/f.txt", "alpha beta\n")])),
        Box::new(destination.clone()),
    );
    workflow.transformations = Sequence::new(vec![
        Box::new(Replace::literal("alpha", "gamma").unwrap()) as Box<dyn Transformation>,
        Box::new(MoveFiles::simple("old", "new")) as Box<dyn Transformation>,
    ]);
    workflow.reversible_check = true;

    let result = run_workflow(&workflow, init_options(), None).unwrap();
    assert_eq!(created_count(&result), 1);
    assert_eq!(
        destination.latest_file("new/f.txt").unwrap(),
        b"gamma beta\n"
    );
}

#[test]
fn files_outside_destination_files_abort_the_change() {
    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(single_change_origin(&[
            ("allowed/ok.txt", "fine\n"),
            ("stray.txt", "not fine\n"),
        ])),
        Box::new(destination.clone()),
    );
    workflow.destination_files = Glob::new(&["allowed/**"], &[]).unwrap();

    let err = run_workflow(&workflow, init_options(), None).unwrap_err();
    match err {
        RelayError::NotADestinationFile(paths) => {
            assert_eq!(paths, vec![std::path::PathBuf::from("stray.txt")]);
        }
        other => panic!("expected NotADestinationFile, got {other:?}"),
    }
    assert!(destination.committed().is_empty());
}

#[derive(Debug)]
struct CommentAction;

impl Action for CommentAction {
    fn run(&self, ctx: &mut ActionContext) -> Result<ActionResult, RelayError> {
        let seen = ctx.effects().len();
        ctx.record_effect(
            format!("observed {seen} effects"),
            vec![],
            None,
            None,
        );
        ctx.destination_message("import processed");
        Ok(ActionResult::Success)
    }

    fn name(&self) -> String {
        "comment".to_string()
    }
}

#[derive(Debug)]
struct FailingAction;

impl Action for FailingAction {
    fn run(&self, _ctx: &mut ActionContext) -> Result<ActionResult, RelayError> {
        Ok(ActionResult::Error("refusing to proceed".to_string()))
    }

    fn name(&self) -> String {
        "gatekeeper".to_string()
    }
}

#[test]
fn after_migration_actions_observe_and_extend_the_ledger() {
    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(single_change_origin(&[("f.txt", "x\n")])),
        Box::new(destination.clone()),
    );
    workflow.after_migration = vec![Box::new(CommentAction)];

    let result = run_workflow(&workflow, init_options(), None).unwrap();

    assert!(result.effects.iter().any(
        |e| e.kind == EffectKind::Updated && e.summary.contains("observed")
    ));
    assert!(destination
        .endpoint_messages()
        .contains(&"import processed".to_string()));
}

#[test]
fn an_action_error_fails_the_change() {
    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(single_change_origin(&[("f.txt", "x\n")])),
        Box::new(destination.clone()),
    );
    workflow.after_migration = vec![Box::new(FailingAction)];

    let err = run_workflow(&workflow, init_options(), None).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("gatekeeper"), "unexpected: {msg}");
    assert!(msg.contains("refusing to proceed"), "unexpected: {msg}");
}

#[test]
fn actions_run_exactly_once_when_a_later_action_fails() {
    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(single_change_origin(&[("f.txt", "x\n")])),
        Box::new(destination.clone()),
    );
    workflow.after_migration = vec![Box::new(CommentAction), Box::new(FailingAction)];

    let err = run_workflow(&workflow, init_options(), None).unwrap_err();
    assert!(err.to_string().contains("gatekeeper"), "unexpected: {err}");
    // The write went through and the first action ran; its endpoint message
    // must not be re-posted while the failure unwinds.
    assert_eq!(destination.committed().len(), 1);
    let posts = destination
        .endpoint_messages()
        .iter()
        .filter(|m| m.as_str() == "import processed")
        .count();
    assert_eq!(
        posts,
        1,
        "messages: {:?}",
        destination.endpoint_messages()
    );
}

#[test]
fn cli_labels_reach_transformations_and_actions() {
    #[derive(Debug)]
    struct TemplateAction;
    impl Action for TemplateAction {
        fn run(&self, ctx: &mut ActionContext) -> Result<ActionResult, RelayError> {
            let filled = ctx.template_fill("ticket=${TICKET}")?;
            ctx.record_effect(filled, vec![], None, None);
            Ok(ActionResult::Success)
        }
    }

    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(single_change_origin(&[("f.txt", "x\n")])),
        Box::new(destination.clone()),
    );
    workflow.after_migration = vec![Box::new(TemplateAction)];

    let options = WorkflowOptions {
        init_history: true,
        cli_labels: [("TICKET".to_string(), "T-123".to_string())]
            .into_iter()
            .collect(),
        ..WorkflowOptions::default()
    };
    let result = run_workflow(&workflow, options, None).unwrap();
    assert!(result
        .effects
        .iter()
        .any(|e| e.summary == "ticket=T-123"));
}

#[test]
fn temporary_destination_errors_still_run_actions() {
    let destination = RecordingDestination::new();
    destination.fail_next_write("destination briefly unavailable");

    let mut workflow = Workflow::new(
        "default",
        Box::new(single_change_origin(&[("f.txt", "x\n")])),
        Box::new(destination.clone()),
    );
    workflow.after_migration = vec![Box::new(CommentAction)];

    let err = run_workflow(&workflow, init_options(), None).unwrap_err();
    assert!(matches!(err, RelayError::Repo(_)));
    // The action still observed the failure and posted its message.
    assert!(destination
        .endpoint_messages()
        .contains(&"import processed".to_string()));
}
