mod common;

use std::fs;
use std::io::Cursor;
use std::sync::atomic::Ordering;

use assert_matches::assert_matches;

use plan_locator::archive::{ArchiveBuilder, DeliveryKind};
use plan_locator::error::LocatorError;
use plan_locator::retrieve::Orchestrator;

use common::CopyRasterizer;

#[test]
fn existing_artifact_skips_rasterizer() {
    let temp = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(common::workspace(&temp), CopyRasterizer::default());
    let manifest = serde_json::json!({"width": 10, "height": 10});

    let first = orchestrator.materialize(&manifest, "Sy_3000_3000J1.jpg").unwrap();
    let second = orchestrator.materialize(&manifest, "Sy_3000_3000J1.jpg").unwrap();

    assert_eq!(first.path, second.path);
    assert_ne!(first.source_manifest_path, second.source_manifest_path);
    assert!(first.path.ends_with("artifacts/Sy_3000_3000J1.jpg"));
    assert!(first.source_manifest_path.exists());
    assert!(second.source_manifest_path.exists());
}

#[test]
fn rasterizer_runs_once_per_name() {
    let temp = tempfile::tempdir().unwrap();
    let rasterizer = CopyRasterizer::default();
    let orchestrator = Orchestrator::new(common::workspace(&temp), rasterizer);
    let manifest = serde_json::json!({"width": 10, "height": 10});
    orchestrator.materialize(&manifest, "a.jpg").unwrap();
    orchestrator.materialize(&manifest, "a.jpg").unwrap();
    orchestrator.materialize(&manifest, "b.jpg").unwrap();

    let artifacts = orchestrator.workspace().artifacts_dir();
    assert_eq!(common::dir_entries(artifacts.as_std_path()), 2);
    let written = fs::read_to_string(orchestrator.workspace().artifact_path("a.jpg")).unwrap();
    let staged: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(staged, manifest);
}

#[test]
fn preexisting_file_is_reused_untouched() {
    let temp = tempfile::tempdir().unwrap();
    let workspace = common::workspace(&temp);
    fs::write(workspace.artifact_path("cached.jpg"), b"old").unwrap();

    let orchestrator = Orchestrator::new(workspace, CopyRasterizer::default());
    let artifact = orchestrator
        .materialize(&serde_json::json!({}), "cached.jpg")
        .unwrap();
    assert_eq!(fs::read(&artifact.path).unwrap(), b"old");
}

#[test]
fn failure_carries_diagnostic_text() {
    let temp = tempfile::tempdir().unwrap();
    let rasterizer = CopyRasterizer {
        fail_for: vec!["broken".to_string()],
        ..CopyRasterizer::default()
    };
    let orchestrator = Orchestrator::new(common::workspace(&temp), rasterizer);
    let err = orchestrator
        .materialize(&serde_json::json!({"id": "broken"}), "x.jpg")
        .unwrap_err();
    assert_matches!(err, LocatorError::RasterizationFailed(message) if message.contains("tile"));
}

#[test]
fn second_call_does_not_invoke_rasterizer() {
    let temp = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(common::workspace(&temp), CopyRasterizer::default());
    let manifest = serde_json::json!({"width": 1});
    orchestrator.materialize(&manifest, "once.jpg").unwrap();
    orchestrator.materialize(&manifest, "once.jpg").unwrap();
    assert_eq!(calls(&orchestrator), 1);
}

fn calls(orchestrator: &Orchestrator<CopyRasterizer>) -> usize {
    orchestrator.rasterizer().calls.load(Ordering::SeqCst)
}

#[test]
fn overlapping_deliveries_keep_shared_artifact() {
    let temp = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::new(common::workspace(&temp), CopyRasterizer::default());
    let archive = ArchiveBuilder::with_leases(
        orchestrator.workspace().clone(),
        orchestrator.leases().clone(),
    );
    let manifest = serde_json::json!({"width": 1});

    let first = orchestrator.materialize(&manifest, "shared.jpg").unwrap();
    let reused = orchestrator.materialize(&manifest, "shared.jpg").unwrap();
    let other = orchestrator.materialize(&manifest, "other.jpg").unwrap();
    assert_eq!(calls(&orchestrator), 2);

    let mut sink = Vec::new();
    archive
        .deliver(std::slice::from_ref(&first))
        .unwrap()
        .copy_to(&mut sink)
        .unwrap();
    assert!(reused.path.exists());

    let delivery = archive.deliver(&[reused.clone(), other.clone()]).unwrap();
    assert_eq!(delivery.kind(), DeliveryKind::Archive);
    let mut bytes = Vec::new();
    delivery.copy_to(&mut bytes).unwrap();
    let zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(zip.len(), 2);

    assert!(!reused.path.exists());
    assert!(!other.path.exists());
    assert_eq!(orchestrator.leases().holders(&reused.path), 0);
}
