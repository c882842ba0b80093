//! ITERATIVE mode: one destination change per origin change, parent first,
//! with per-change skip semantics.

mod common;

use common::{created_count, run_workflow};
use repo_relay::effects::EffectKind;
use repo_relay::errors::RelayError;
use repo_relay::glob::Glob;
use repo_relay::testing::{RecordingDestination, RecordingOrigin};
use repo_relay::workflow::{Workflow, WorkflowMode, WorkflowOptions};

fn origin_with_base_and_three() -> RecordingOrigin {
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("f.txt", "base\n")]);
    origin.add_change_on_top("1", "one\n", &[("f.txt", "one\n")]);
    origin.add_change_on_top("2", "two\n", &[("f.txt", "two\n")]);
    origin.add_change_on_top("3", "three\n", &[("f.txt", "three\n")]);
    origin
}

#[test]
fn one_destination_change_per_origin_change_in_order() {
    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(origin_with_base_and_three()),
        Box::new(destination.clone()),
    );
    workflow.mode = WorkflowMode::Iterative;

    let options = WorkflowOptions {
        last_revision: Some("0".to_string()),
        ..WorkflowOptions::default()
    };
    let result = run_workflow(&workflow, options, None).unwrap();

    assert_eq!(created_count(&result), 3);
    let committed = destination.committed();
    let summaries: Vec<&str> = committed
        .iter()
        .map(|c| c.message.lines().next().unwrap())
        .collect();
    assert_eq!(summaries, vec!["one", "two", "three"]);
    let refs: Vec<&str> = committed.iter().map(|c| c.origin_ref.as_str()).collect();
    assert_eq!(refs, vec!["1", "2", "3"]);
    // Every created effect names a distinct origin revision.
    let mut effect_refs: Vec<String> = result
        .effects
        .iter()
        .filter(|e| e.kind == EffectKind::Created)
        .flat_map(|e| e.origin_refs.clone())
        .collect();
    effect_refs.dedup();
    assert_eq!(effect_refs.len(), 3);
}

#[test]
fn changes_not_touching_origin_files_are_skipped_with_noop() {
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("src/a.rs", "a\n")]);
    origin.add_change_on_top("1", "docs only\n", &[("docs/x.md", "doc\n")]);
    origin.add_change_on_top("2", "code\n", &[("src/a.rs", "a2\n")]);

    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new("default", Box::new(origin), Box::new(destination.clone()));
    workflow.mode = WorkflowMode::Iterative;
    workflow.origin_files = Glob::new(&["src/**"], &[]).unwrap();

    let options = WorkflowOptions {
        last_revision: Some("0".to_string()),
        ..WorkflowOptions::default()
    };
    let result = run_workflow(&workflow, options, None).unwrap();

    assert_eq!(created_count(&result), 1);
    assert!(result.effects.iter().any(|e| {
        e.kind == EffectKind::Noop && e.origin_refs.contains(&"1".to_string())
    }));
    assert_eq!(destination.committed()[0].origin_ref, "2");
}

#[test]
fn iterative_limit_caps_the_batch() {
    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(origin_with_base_and_three()),
        Box::new(destination.clone()),
    );
    workflow.mode = WorkflowMode::Iterative;

    let options = WorkflowOptions {
        last_revision: Some("0".to_string()),
        iterative_limit: Some(2),
        ..WorkflowOptions::default()
    };
    let result = run_workflow(&workflow, options, None).unwrap();
    assert_eq!(created_count(&result), 2);
    assert_eq!(destination.committed().len(), 2);

    // The next run picks up where the limit stopped.
    let rest = run_workflow(&workflow, WorkflowOptions::default(), None).unwrap();
    assert_eq!(created_count(&rest), 1);
    assert_eq!(destination.committed().last().unwrap().origin_ref, "3");
}

#[test]
fn run_fails_when_the_whole_batch_is_empty() {
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("docs/x.md", "0\n")]);
    origin.add_change_on_top("1", "docs\n", &[("docs/x.md", "1\n")]);

    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new("default", Box::new(origin), Box::new(destination.clone()));
    workflow.mode = WorkflowMode::Iterative;
    workflow.origin_files = Glob::new(&["src/**"], &[]).unwrap();

    let options = WorkflowOptions {
        last_revision: Some("0".to_string()),
        ..WorkflowOptions::default()
    };
    assert!(matches!(
        run_workflow(&workflow, options, None),
        Err(RelayError::EmptyChange(_))
    ));
    assert!(destination.committed().is_empty());
}
