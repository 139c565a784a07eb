//! End-to-end indexing against a real directory and an on-disk store.

use promptvault::control::{IndexControl, IndexState};
use promptvault::engine::{EngineConfig, IndexEngine, IndexOutcome, RootSpec};
use promptvault::index::RootSnapshot;
use promptvault::query::{self, Facets, Query};
use promptvault::source::FsSource;
use promptvault::store::{JsonSnapshotStore, SnapshotStore};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn chunk(kind: &[u8], body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out.extend_from_slice(&[0; 4]);
    out
}

fn png_with_text(keyword: &str, text: &str) -> Vec<u8> {
    let mut body = keyword.as_bytes().to_vec();
    body.push(0);
    body.extend_from_slice(text.as_bytes());

    let mut png = PNG_SIGNATURE.to_vec();
    png.extend(chunk(b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]));
    png.extend(chunk(b"tEXt", &body));
    png.extend(chunk(b"IEND", &[]));
    png
}

fn engine(store_dir: &Path) -> IndexEngine<FsSource, JsonSnapshotStore> {
    let extensions = ["png".to_string(), "jpg".to_string()];
    let config = EngineConfig {
        workers: 2,
        batch_size: 2,
        pause_poll: Duration::from_millis(5),
    };
    IndexEngine::new(FsSource::new(&extensions), JsonSnapshotStore::new(store_dir), config).unwrap()
}

fn run(engine: &IndexEngine<FsSource, JsonSnapshotStore>, root: &RootSpec) -> IndexOutcome {
    let control = IndexControl::new();
    let outcome = engine.index_root(root, &control, None).unwrap();
    assert_eq!(control.state(), IndexState::Completed);
    assert!(outcome.persist_error.is_none());
    outcome
}

/// Rewrite a file with an explicit, clearly different modification time.
fn rewrite(path: &Path, bytes: &[u8], age: Duration) {
    fs::write(path, bytes).unwrap();
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

struct Gallery {
    _tmp: TempDir,
    images: std::path::PathBuf,
    store: std::path::PathBuf,
}

fn gallery() -> Gallery {
    let tmp = TempDir::new().unwrap();
    let images = tmp.path().join("images");
    let store = tmp.path().join("store");
    fs::create_dir_all(images.join("sub")).unwrap();

    fs::write(
        images.join("castle.png"),
        png_with_text(
            "parameters",
            "a castle on a hill <lora:moody:0.7>\nNegative prompt: blurry\nSteps: 25, Sampler: DPM++ 2M, CFG scale: 6, Seed: 7, Size: 832x1216, Model: sdxl_base",
        ),
    )
    .unwrap();
    fs::write(
        images.join("invoke.png"),
        png_with_text(
            "invokeai_metadata",
            r#"{"positive_prompt": "a lighthouse", "model": {"name": "juggernaut"}, "steps": 30, "cfg_scale": 7.5, "seed": 12345, "board_name": "Coast"}"#,
        ),
    )
    .unwrap();
    fs::write(images.join("broken.jpg"), b"\xFF\xD8 not really a jpeg").unwrap();
    fs::write(images.join("readme.txt"), b"ignored").unwrap();
    fs::write(images.join("sub/deep.png"), png_with_text("parameters", "deep\nSteps: 5")).unwrap();

    Gallery {
        _tmp: tmp,
        images,
        store,
    }
}

fn paths(snapshot: &RootSnapshot) -> Vec<&str> {
    let mut paths: Vec<&str> = snapshot
        .entries()
        .iter()
        .map(|e| e.relative_path.as_str())
        .collect();
    paths.sort();
    paths
}

// =========================================================================
// Index lifecycle
// =========================================================================

#[test]
fn index_query_and_reindex() {
    let g = gallery();
    let engine = engine(&g.store);
    let root = RootSpec::new(&g.images, false);

    let first = run(&engine, &root);
    assert_eq!(paths(&first.snapshot), vec!["broken.jpg", "castle.png", "invoke.png"]);
    assert_eq!(first.stats.parsed, 3);

    let castle = &first.snapshot.get("castle.png").unwrap().metadata;
    assert_eq!(castle.prompt, "a castle on a hill <lora:moody:0.7>");
    assert_eq!(castle.steps, Some(25));
    assert_eq!(castle.model, "sdxl_base");
    assert!(castle.loras.contains("moody"));

    let invoke = &first.snapshot.get("invoke.png").unwrap().metadata;
    assert_eq!(invoke.board, "Coast");
    assert_eq!(invoke.cfg_scale, Some(7.5));
    assert!(first.snapshot.get("broken.jpg").unwrap().metadata.is_empty());

    // Nothing changed: everything is reused.
    let second = run(&engine, &root);
    assert_eq!(second.stats.parsed, 0);
    assert_eq!(second.stats.unchanged, 3);

    // One file modified, one deleted.
    rewrite(
        &g.images.join("castle.png"),
        &png_with_text("parameters", "a ruined castle\nSteps: 40"),
        Duration::from_secs(3600),
    );
    fs::remove_file(g.images.join("broken.jpg")).unwrap();
    let third = run(&engine, &root);
    assert_eq!(third.stats.parsed, 1);
    assert_eq!(third.stats.deleted, 1);
    assert_eq!(paths(&third.snapshot), vec!["castle.png", "invoke.png"]);
    assert_eq!(third.snapshot.get("castle.png").unwrap().metadata.steps, Some(40));

    let stored = engine.store().get(&g.images, false).unwrap().unwrap();
    assert_eq!(stored, third.snapshot);
}

#[test]
fn snapshot_outlives_the_engine() {
    let g = gallery();
    let root = RootSpec::new(&g.images, true);
    run(&engine(&g.store), &root);

    let fresh = run(&engine(&g.store), &root);
    assert_eq!(fresh.stats.parsed, 0);
    assert_eq!(fresh.stats.unchanged, 4);
}

#[test]
fn recursive_and_flat_are_separate_snapshots() {
    let g = gallery();
    let engine = engine(&g.store);
    let flat = run(&engine, &RootSpec::new(&g.images, false));
    let deep = run(&engine, &RootSpec::new(&g.images, true));
    assert_eq!(flat.snapshot.len(), 3);
    assert_eq!(deep.snapshot.len(), 4);
    assert_eq!(deep.stats.parsed, 4);
    assert!(deep.snapshot.get("sub/deep.png").is_some());
}

#[test]
fn corrupt_store_file_forces_full_rescan() {
    let g = gallery();
    let engine = engine(&g.store);
    let root = RootSpec::new(&g.images, false);
    run(&engine, &root);

    fs::write(engine.store().path_for(&g.images, false), "{ not json").unwrap();
    let rescan = run(&engine, &root);
    assert_eq!(rescan.stats.parsed, 3);
    assert_eq!(rescan.stats.unchanged, 0);
}

#[test]
fn missing_root_fails_without_touching_the_store() {
    let g = gallery();
    let engine = engine(&g.store);
    let control = IndexControl::new();
    let result = engine.index_root(&RootSpec::new(g.images.join("nope"), false), &control, None);
    assert!(result.is_err());
    assert_eq!(control.state(), IndexState::Idle);
    assert!(!g.store.exists());
}

// =========================================================================
// Query surface over the committed store
// =========================================================================

#[test]
fn query_and_facets_over_committed_snapshots() {
    let g = gallery();
    let engine = engine(&g.store);
    run(&engine, &RootSpec::new(&g.images, true));

    let snapshot = engine.store().get(&g.images, true).unwrap().unwrap();
    let snapshots = [&snapshot];

    let lighthouse = Query {
        text: "Lighthouse".into(),
        ..Query::default()
    };
    let hits = query::search(&snapshots, &lighthouse);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.relative_path, "invoke.png");

    let by_lora = Query {
        loras: vec!["moody".into()],
        ..Query::default()
    };
    assert_eq!(query::search(&snapshots, &by_lora)[0].entry.relative_path, "castle.png");

    let facets = Facets::aggregate(&snapshots);
    assert_eq!(facets.models.get("juggernaut"), Some(&1));
    assert_eq!(facets.schedulers.get("DPM++ 2M"), Some(&1));
    assert_eq!(facets.boards.get("Coast"), Some(&1));
}
