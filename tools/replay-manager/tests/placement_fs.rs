use chrono::NaiveDate;
use replay_manager::config::AppConfig;
use replay_manager::placement::{PlacementContext, PlacementPolicy};
use replay_manager::runtime::{FakeProcessRunner, ProductionFileSystem};
use replay_manager::types::SortCategory;
use std::path::Path;

fn ctx(scene: Option<&str>) -> PlacementContext<'_> {
    let now = NaiveDate::from_ymd_opt(2024, 3, 9)
        .and_then(|d| d.and_hms_opt(21, 4, 5))
        .expect("valid timestamp");
    PlacementContext {
        scene,
        session_start: None,
        now,
    }
}

fn seed(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, name).expect("seed");
    path
}

#[test]
fn same_nominal_name_twice_yields_two_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = AppConfig::default();
    cfg.output.dir = Some(temp.path().join("out"));
    cfg.output.filename_format = "Replay".to_string();
    let fs = ProductionFileSystem;
    let runner = FakeProcessRunner::default();
    let policy = PlacementPolicy::new(&cfg, &fs, &runner);

    let first = policy
        .place(&seed(temp.path(), "a.mp4"), &ctx(None))
        .expect("first");
    let second = policy
        .place(&seed(temp.path(), "b.mp4"), &ctx(None))
        .expect("second");

    assert_ne!(first.destination, second.destination);
    assert_eq!(
        std::fs::read_to_string(&first.destination).expect("first"),
        "a.mp4"
    );
    assert_eq!(
        std::fs::read_to_string(&second.destination).expect("second"),
        "b.mp4"
    );
    assert!(second.destination.ends_with("Replay_1.mp4"));
}

#[test]
fn overwrite_replaces_existing_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = AppConfig::default();
    cfg.output.dir = Some(temp.path().join("out"));
    cfg.output.filename_format = "Replay".to_string();
    cfg.output.overwrite_existing = true;
    let fs = ProductionFileSystem;
    let runner = FakeProcessRunner::default();
    let policy = PlacementPolicy::new(&cfg, &fs, &runner);

    let first = policy
        .place(&seed(temp.path(), "a.mp4"), &ctx(None))
        .expect("first");
    let second = policy
        .place(&seed(temp.path(), "b.mp4"), &ctx(None))
        .expect("second");
    assert_eq!(first.destination, second.destination);
    assert_eq!(
        std::fs::read_to_string(&second.destination).expect("read"),
        "b.mp4"
    );
}

#[test]
fn hostile_scene_names_stay_under_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("out");
    let mut cfg = AppConfig::default();
    cfg.output.dir = Some(root.clone());
    cfg.sorting.enabled = true;
    cfg.sorting.category = SortCategory::Scene;
    cfg.sorting.by_date = true;
    cfg.sorting.date_scheme = "../%Y/%B/".to_string();
    let fs = ProductionFileSystem;
    let runner = FakeProcessRunner::default();
    let policy = PlacementPolicy::new(&cfg, &fs, &runner);

    let placed = policy
        .place(&seed(temp.path(), "a.mkv"), &ctx(Some("../../etc")))
        .expect("place");
    assert!(placed.destination.starts_with(&root), "{:?}", placed.destination);
    assert!(placed.destination.exists());
    assert!(placed.destination.to_string_lossy().contains("March"));
}

#[test]
fn persistent_copy_keeps_the_placed_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = AppConfig::default();
    cfg.output.dir = Some(temp.path().join("out"));
    cfg.persistent.enabled = true;
    cfg.persistent.path = Some(temp.path().join("latest").join("replay.mp4"));
    let fs = ProductionFileSystem;
    let runner = FakeProcessRunner::default();
    let policy = PlacementPolicy::new(&cfg, &fs, &runner);

    let placed = policy
        .place(&seed(temp.path(), "a.mp4"), &ctx(None))
        .expect("place");
    let copied = policy
        .copy_to_persistent(&placed.destination)
        .expect("copy")
        .expect("configured");
    assert!(placed.destination.exists());
    assert_eq!(std::fs::read_to_string(copied).expect("read"), "a.mp4");
}
