//! Dry runs, read-only info, autopatch artifacts and the regenerate flow.

mod common;

use std::path::Path;

use common::{created_count, run_workflow};
use repo_relay::console::Console;
use repo_relay::glob::Glob;
use repo_relay::merge::autopatch::AutoPatchConfig;
use repo_relay::merge::{MergeImportConfig, MergeStrategy};
use repo_relay::testing::{RecordingDestination, RecordingOrigin};
use repo_relay::workflow::info::info;
use repo_relay::workflow::regenerate::{RegenOptions, regenerate};
use repo_relay::workflow::{Workflow, WorkflowMode, WorkflowOptions};

fn origin_two_changes() -> RecordingOrigin {
    let mut origin = RecordingOrigin::new();
    origin.add_change("1", "first\n", &[("src/f.txt", "one\n")]);
    origin.add_change_on_top("2", "second\n", &[("src/f.txt", "two\n")]);
    origin
}

#[test]
fn dry_run_leaves_no_committed_state() {
    let destination = RecordingDestination::new();
    let workflow = Workflow::new(
        "default",
        Box::new(origin_two_changes()),
        Box::new(destination.clone()),
    );

    let options = WorkflowOptions {
        init_history: true,
        dry_run: true,
        ..WorkflowOptions::default()
    };
    let result = run_workflow(&workflow, options, None).unwrap();

    assert_eq!(created_count(&result), 1);
    assert!(destination.committed().is_empty());
    assert!(destination.processed().is_empty());

    // A real run afterwards imports normally.
    let options = WorkflowOptions {
        init_history: true,
        ..WorkflowOptions::default()
    };
    run_workflow(&workflow, options, None).unwrap();
    assert_eq!(destination.committed().len(), 1);
}

#[test]
fn info_reports_head_last_migrated_and_pending() {
    let destination = RecordingDestination::new();
    let workflow = Workflow::new(
        "default",
        Box::new(origin_two_changes()),
        Box::new(destination.clone()),
    );

    // Nothing migrated yet: both changes pending.
    let before = info(&workflow).unwrap();
    assert_eq!(before.origin_head.as_deref(), Some("2"));
    assert_eq!(before.last_migrated, None);
    assert_eq!(before.pending.len(), 2);
    assert_eq!(before.last_available.as_deref(), Some("2"));

    // Import revision 1, then only revision 2 is pending.
    run_workflow(
        &workflow,
        WorkflowOptions {
            init_history: true,
            ..WorkflowOptions::default()
        },
        Some("1"),
    )
    .unwrap();

    let after = info(&workflow).unwrap();
    assert_eq!(after.last_migrated.as_deref(), Some("1"));
    assert_eq!(after.pending.len(), 1);
    assert_eq!(after.pending[0].revision, "2");

    // Info never wrote anything.
    assert_eq!(destination.committed().len(), 1);
}

#[test]
fn autopatch_files_describe_destination_divergence() {
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("pkg/code.c", "int x;\n")]);
    origin.add_change_on_top("1", "next\n", &[("pkg/other.c", "int y;\n")]);

    let destination = RecordingDestination::new();
    let make_workflow = |origin: RecordingOrigin| {
        let mut workflow =
            Workflow::new("default", Box::new(origin), Box::new(destination.clone()));
        workflow.merge_import = Some(MergeImportConfig {
            package_path: Default::default(),
            paths: None,
            use_consistency_file: false,
            strategy: MergeStrategy::Diff3,
        });
        workflow.autopatch = Some(AutoPatchConfig {
            directory: "PATCHES".into(),
            ..AutoPatchConfig::default()
        });
        workflow
    };

    let seed = {
        let mut o = RecordingOrigin::new();
        o.add_change("0", "base\n", &[("pkg/code.c", "int x;\n")]);
        make_workflow(o)
    };
    run_workflow(
        &seed,
        WorkflowOptions {
            init_history: true,
            ..WorkflowOptions::default()
        },
        Some("0"),
    )
    .unwrap();

    destination.edit_file("pkg/code.c", "int x;\nint local_fix;\n");

    let workflow = make_workflow(origin);
    run_workflow(&workflow, WorkflowOptions::default(), None).unwrap();

    let patch = destination
        .latest_file("PATCHES/pkg/code.c.patch")
        .expect("autopatch written");
    let patch = String::from_utf8(patch).unwrap();
    assert!(patch.contains("+int local_fix;"), "patch: {patch}");
    // The untouched file gets no patch.
    assert!(destination.latest_file("PATCHES/pkg/other.c.patch").is_none());
}

#[test]
fn regenerate_rebuilds_artifacts_for_the_target() {
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("pkg/code.c", "int x;\n")]);

    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new(
        "default",
        Box::new(origin),
        Box::new(destination.clone()),
    );
    workflow.autopatch = Some(AutoPatchConfig {
        directory: "PATCHES".into(),
        ..AutoPatchConfig::default()
    });

    run_workflow(
        &workflow,
        WorkflowOptions {
            init_history: true,
            ..WorkflowOptions::default()
        },
        Some("0"),
    )
    .unwrap();
    let target_id = destination.committed()[0].id.clone();

    // Hand edit, then regenerate against a fresh import baseline.
    destination.edit_file("pkg/code.c", "int x;\nint hand_edit;\n");

    let workdir = tempfile::tempdir().unwrap();
    let regen = RegenOptions {
        regen_target: Some(target_id.clone()),
        regen_baseline: None,
        regen_import_baseline: true,
    };
    let effects = regenerate(
        &workflow,
        &regen,
        Some("0"),
        workdir.path(),
        &Console::default(),
    )
    .unwrap();
    assert!(!effects.is_empty());

    let updates = destination.regen_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, target_id);
    let patch = updates[0]
        .1
        .get(Path::new("PATCHES/pkg/code.c.patch"))
        .expect("regenerated patch");
    assert!(String::from_utf8(patch.clone()).unwrap().contains("+int hand_edit;"));
}

#[test]
fn workflow_mode_round_trips_through_display() {
    assert_eq!(WorkflowMode::Squash.to_string(), "SQUASH");
    assert_eq!(
        WorkflowMode::ChangeRequestFromSot.to_string(),
        "CHANGE_REQUEST_FROM_SOT"
    );
}

#[test]
fn origin_files_narrow_checkout_and_write() {
    let mut origin = RecordingOrigin::new();
    origin.add_change(
        "1",
        "mixed\n",
        &[("src/keep.rs", "keep\n"), ("secret/drop.pem", "drop\n")],
    );

    let destination = RecordingDestination::new();
    let mut workflow = Workflow::new("default", Box::new(origin), Box::new(destination.clone()));
    workflow.origin_files = Glob::new(&["src/**"], &[]).unwrap();

    run_workflow(
        &workflow,
        WorkflowOptions {
            init_history: true,
            ..WorkflowOptions::default()
        },
        None,
    )
    .unwrap();

    let files = destination.committed()[0].files.clone();
    assert!(files.contains_key(Path::new("src/keep.rs")));
    assert!(!files.contains_key(Path::new("secret/drop.pem")));
}
