//! Merge import across workflow runs: destination-only edits surviving a new
//! import, conflict reporting, and the consistency-file round trip.

mod common;

use std::path::Path;

use common::run_workflow;
use repo_relay::hash::HashKind;
use repo_relay::merge::consistency::ConsistencyFile;
use repo_relay::merge::{MergeImportConfig, MergeStrategy};
use repo_relay::testing::{RecordingDestination, RecordingOrigin};
use repo_relay::workflow::{Workflow, WorkflowOptions};

const CONSISTENCY_PATH: &str = ".relay/consistency";

fn init_options() -> WorkflowOptions {
    WorkflowOptions {
        init_history: true,
        ..WorkflowOptions::default()
    }
}

fn merge_workflow(
    origin: RecordingOrigin,
    destination: &RecordingDestination,
    use_consistency_file: bool,
) -> Workflow {
    let mut workflow = Workflow::new("default", Box::new(origin), Box::new(destination.clone()));
    workflow.merge_import = Some(MergeImportConfig {
        package_path: Default::default(),
        paths: None,
        use_consistency_file,
        strategy: MergeStrategy::Diff3,
    });
    if use_consistency_file {
        workflow.consistency_file_path = Some(CONSISTENCY_PATH.into());
    }
    workflow
}

#[test]
fn conflicting_edits_produce_markers_and_an_endpoint_message() {
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("foo.txt", "a\nb\nc\n")]);
    origin.add_change_on_top("1", "origin edit\n", &[("foo.txt", "origin\nb\nc\n")]);

    let destination = RecordingDestination::new();

    // First import at revision 0.
    let seed = {
        let mut o = RecordingOrigin::new();
        o.add_change("0", "base\n", &[("foo.txt", "a\nb\nc\n")]);
        merge_workflow(o, &destination, false)
    };
    run_workflow(&seed, init_options(), Some("0")).unwrap();

    // Hand edit in the destination, diverging from the incoming origin edit.
    destination.edit_file("foo.txt", "destination\nb\nc\n");

    let workflow = merge_workflow(origin, &destination, false);
    run_workflow(&workflow, WorkflowOptions::default(), None).unwrap();

    let merged = String::from_utf8(destination.latest_file("foo.txt").unwrap()).unwrap();
    assert!(merged.contains(">>>>>>>"), "no conflict marker in: {merged}");
    assert!(
        destination
            .endpoint_messages()
            .iter()
            .any(|m| m.contains("Found merge errors for paths")),
        "messages: {:?}",
        destination.endpoint_messages()
    );
}

#[test]
fn destination_edit_survives_the_next_import() {
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("dir/foo.txt", "a\nb\nc\n")]);
    origin.add_change_on_top(
        "1",
        "add bar\n",
        &[("dir/bar.txt", "Another file\n")],
    );

    let destination = RecordingDestination::new();
    let seed = {
        let mut o = RecordingOrigin::new();
        o.add_change("0", "base\n", &[("dir/foo.txt", "a\nb\nc\n")]);
        merge_workflow(o, &destination, false)
    };
    run_workflow(&seed, init_options(), Some("0")).unwrap();

    destination.edit_file("dir/foo.txt", "a\nb\nfoo\nc\n");

    let workflow = merge_workflow(origin, &destination, false);
    run_workflow(&workflow, WorkflowOptions::default(), None).unwrap();

    assert_eq!(
        destination.latest_file("dir/foo.txt").unwrap(),
        b"a\nb\nfoo\nc\n"
    );
    assert_eq!(
        destination.latest_file("dir/bar.txt").unwrap(),
        b"Another file\n"
    );
}

#[test]
fn consistency_file_round_trip_across_imports() {
    // Origin history: v0 has dir/foo.txt, v1 adds dir/bar.txt.
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("dir/foo.txt", "a\nb\nc\n")]);
    origin.add_change_on_top("1", "add bar\n", &[("dir/bar.txt", "Another file\n")]);

    let destination = RecordingDestination::new();
    let seed = {
        let mut o = RecordingOrigin::new();
        o.add_change("0", "base\n", &[("dir/foo.txt", "a\nb\nc\n")]);
        merge_workflow(o, &destination, true)
    };
    run_workflow(&seed, init_options(), Some("0")).unwrap();

    // The first import ships a consistency file with an empty patch stream.
    let initial = destination.latest_file(CONSISTENCY_PATH).unwrap();
    let initial = ConsistencyFile::parse(std::str::from_utf8(&initial).unwrap()).unwrap();
    assert!(initial.entries.contains_key(Path::new("dir/foo.txt")));

    // Destination-only edit, then regenerate the consistency file the way a
    // destination-side tool would.
    destination.edit_file("dir/foo.txt", "a\nb\nfoo\nc\n");
    let pristine = tempfile::tempdir().unwrap();
    let edited = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(pristine.path().join("dir")).unwrap();
    std::fs::create_dir_all(edited.path().join("dir")).unwrap();
    std::fs::write(pristine.path().join("dir/foo.txt"), "a\nb\nc\n").unwrap();
    std::fs::write(edited.path().join("dir/foo.txt"), "a\nb\nfoo\nc\n").unwrap();
    let regenerated = ConsistencyFile::generate(
        pristine.path(),
        edited.path(),
        HashKind::Sha256,
        Some(Path::new(CONSISTENCY_PATH)),
    )
    .unwrap();
    destination.edit_file(CONSISTENCY_PATH, &regenerated.serialize());

    // Import v1: the destination edit must survive, the new file must land.
    let workflow = merge_workflow(origin, &destination, true);
    run_workflow(&workflow, WorkflowOptions::default(), None).unwrap();

    assert_eq!(
        destination.latest_file("dir/foo.txt").unwrap(),
        b"a\nb\nfoo\nc\n"
    );
    assert_eq!(
        destination.latest_file("dir/bar.txt").unwrap(),
        b"Another file\n"
    );

    // Reverse-applying the fresh consistency file recovers the pristine
    // origin state.
    let cf_bytes = destination.latest_file(CONSISTENCY_PATH).unwrap();
    let cf = ConsistencyFile::parse(std::str::from_utf8(&cf_bytes).unwrap()).unwrap();
    let scratch = tempfile::tempdir().unwrap();
    for (path, content) in &destination.committed().last().unwrap().files {
        if path == Path::new(CONSISTENCY_PATH) {
            continue;
        }
        let full = scratch.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
    cf.validate_hashes(scratch.path()).unwrap();
    cf.reverse_apply(scratch.path()).unwrap();

    assert_eq!(
        std::fs::read_to_string(scratch.path().join("dir/foo.txt")).unwrap(),
        "a\nb\nc\n"
    );
    assert_eq!(
        std::fs::read_to_string(scratch.path().join("dir/bar.txt")).unwrap(),
        "Another file\n"
    );
}

#[test]
fn tampered_consistency_hashes_fail_validation() {
    let mut origin = RecordingOrigin::new();
    origin.add_change("0", "base\n", &[("f.txt", "x\n")]);
    origin.add_change_on_top("1", "next\n", &[("f.txt", "y\n")]);

    let destination = RecordingDestination::new();
    let seed = {
        let mut o = RecordingOrigin::new();
        o.add_change("0", "base\n", &[("f.txt", "x\n")]);
        merge_workflow(o, &destination, true)
    };
    run_workflow(&seed, init_options(), Some("0")).unwrap();

    // Edit the tree without regenerating the consistency file.
    destination.edit_file("f.txt", "tampered\n");

    let workflow = merge_workflow(origin, &destination, true);
    let err = run_workflow(&workflow, WorkflowOptions::default(), None).unwrap_err();
    assert!(
        err.to_string().contains("in ConsistencyFile but"),
        "unexpected: {err}"
    );

    // The escape hatch falls back to a re-imported baseline; the diverging
    // edits then merge with conflict markers instead of failing outright.
    let options = WorkflowOptions {
        disable_consistency_merge_import: true,
        ..WorkflowOptions::default()
    };
    run_workflow(&workflow, options, None).unwrap();
    let merged = String::from_utf8(destination.latest_file("f.txt").unwrap()).unwrap();
    assert!(merged.contains("tampered"), "destination edit lost: {merged}");
    assert!(merged.contains(">>>>>>>"), "no conflict marker: {merged}");
}
