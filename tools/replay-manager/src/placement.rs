use crate::config::AppConfig;
use crate::errors::ReplayError;
use crate::logging::append_run_log;
use crate::process_table::{ExeEntry, ProcessLister};
use crate::runtime::{FileSystem, ProcessRunner};
use crate::timefmt::format_timestamp;
use crate::types::{DateBase, SortCategory};
use chrono::NaiveDateTime;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
pub struct PlacementContext<'a> {
    pub scene: Option<&'a str>,
    pub session_start: Option<NaiveDateTime>,
    pub now: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub destination: PathBuf,
    pub matched_exe: Option<ExeEntry>,
}

pub struct PlacementPolicy<'a> {
    cfg: &'a AppConfig,
    fs: &'a dyn FileSystem,
    runner: &'a dyn ProcessRunner,
}

impl<'a> PlacementPolicy<'a> {
    pub fn new(cfg: &'a AppConfig, fs: &'a dyn FileSystem, runner: &'a dyn ProcessRunner) -> Self {
        Self { cfg, fs, runner }
    }

    pub fn plan(
        &self,
        source: &Path,
        ctx: &PlacementContext<'_>,
    ) -> Result<Placement, ReplayError> {
        let root = self.cfg.output_dir()?;
        let matched_exe = self.matched_exe()?;

        let dir = resolve_dir(root, self.cfg, ctx, matched_exe.as_ref())?;
        let prefix = if self.cfg.sorting.exe_prefixes {
            matched_exe.as_ref().map(|entry| entry.prefix.as_str())
        } else {
            None
        };
        let filename = build_filename(
            &self.cfg.output.filename_format,
            &ctx.now,
            prefix,
            source_extension(source).as_deref(),
        )?;

        let candidate = dir.join(filename);
        let destination = if self.cfg.output.overwrite_existing {
            candidate
        } else {
            unique_path(self.fs, &candidate)
        };
        Ok(Placement {
            destination,
            matched_exe,
        })
    }

    pub fn place(
        &self,
        source: &Path,
        ctx: &PlacementContext<'_>,
    ) -> Result<Placement, ReplayError> {
        let placement = self.plan(source, ctx)?;
        if let Some(parent) = placement.destination.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs.rename(source, &placement.destination)?;
        append_run_log(
            "info",
            "placement.moved",
            json!({
                "source": source.display().to_string(),
                "destination": placement.destination.display().to_string(),
                "exe": placement.matched_exe.as_ref().map(|entry| entry.exe.clone()),
                "scene": ctx.scene,
            }),
        );
        Ok(placement)
    }

    pub fn copy_to_persistent(&self, placed: &Path) -> Result<Option<PathBuf>, ReplayError> {
        let Some(target) = self.cfg.persistent_path() else {
            return Ok(None);
        };
        if self.fs.same_file(placed, target) {
            append_run_log(
                "debug",
                "placement.persistent.same_file",
                json!({ "path": target.display().to_string() }),
            );
            return Ok(None);
        }
        if let Some(parent) = target.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs.copy(placed, target)?;
        append_run_log(
            "info",
            "placement.persistent.copied",
            json!({
                "source": placed.display().to_string(),
                "target": target.display().to_string(),
            }),
        );
        Ok(Some(target.to_path_buf()))
    }

    fn matched_exe(&self) -> Result<Option<ExeEntry>, ReplayError> {
        if !self.cfg.needs_process_table() {
            return Ok(None);
        }
        let table = self.cfg.process_table()?;
        let found = ProcessLister::new(self.runner).find_foremost(&table)?;
        Ok(found.cloned())
    }
}

pub fn resolve_dir(
    root: &Path,
    cfg: &AppConfig,
    ctx: &PlacementContext<'_>,
    matched_exe: Option<&ExeEntry>,
) -> Result<PathBuf, ReplayError> {
    let mut dir = root.to_path_buf();
    if !cfg.sorting.enabled {
        return Ok(dir);
    }

    let category = match cfg.sorting.category {
        SortCategory::Executable => matched_exe.map(|entry| entry.display_name.as_str()),
        SortCategory::Scene => ctx.scene,
    };
    if let Some(name) = category.and_then(sanitize_component) {
        dir.push(name);
    }

    if cfg.sorting.by_date {
        let basis = match cfg.sorting.date_base {
            DateBase::BufferStart => ctx.session_start.unwrap_or(ctx.now),
            DateBase::BufferSaved => ctx.now,
        };
        let rendered = format_timestamp(&basis, &cfg.sorting.date_scheme)?;
        for segment in relative_segments(&rendered) {
            dir.push(segment);
        }
    }
    Ok(dir)
}

pub fn build_filename(
    format: &str,
    timestamp: &NaiveDateTime,
    prefix: Option<&str>,
    extension: Option<&str>,
) -> Result<String, ReplayError> {
    let formatted = format_timestamp(timestamp, format)?;
    let mut name = sanitize_component(&formatted).ok_or_else(|| {
        ReplayError::Format(format!("filename format {format:?} produced an empty name"))
    })?;
    if let Some(prefix) = prefix.and_then(sanitize_component) {
        name = format!("{prefix}_{name}");
    }
    if let Some(ext) = extension.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty()) {
        name = format!("{name}.{ext}");
    }
    Ok(name)
}

pub fn source_extension(path: &Path) -> Option<String> {
    if let Some(ext) = path.extension() {
        return Some(ext.to_string_lossy().to_string());
    }
    let name = path.file_name()?.to_string_lossy();
    let rest = name.strip_prefix('.')?;
    (!rest.is_empty()).then(|| rest.to_string())
}

pub fn unique_path(fs: &dyn FileSystem, candidate: &Path) -> PathBuf {
    if !fs.exists(candidate) {
        return candidate.to_path_buf();
    }
    let dir = candidate.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut num: u64 = 1;
    loop {
        let probe = dir.join(format!("{stem}_{num}{ext}"));
        if !fs.exists(&probe) {
            return probe;
        }
        num += 1;
    }
}

/// Make `raw` safe as a single path component. `None` if nothing usable remains.
pub fn sanitize_component(raw: &str) -> Option<String> {
    let cleaned = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn relative_segments(rendered: &str) -> Vec<String> {
    rendered
        .split(['/', '\\'])
        .filter_map(sanitize_component)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        build_filename, relative_segments, resolve_dir, sanitize_component, source_extension,
        unique_path, PlacementContext, PlacementPolicy,
    };
    use crate::config::AppConfig;
    use crate::process_table::ExeEntry;
    use crate::runtime::{FakeFileSystem, FakeProcessRunner, FileSystem};
    use crate::types::{DateBase, SortCategory};
    use chrono::{NaiveDate, NaiveDateTime};
    use std::path::{Path, PathBuf};

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .expect("valid")
    }

    fn cfg() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.output.dir = Some(PathBuf::from("/replays"));
        cfg
    }

    fn ctx(scene: Option<&str>) -> PlacementContext<'_> {
        PlacementContext {
            scene,
            session_start: Some(at(1, 23, 59, 0)),
            now: at(2, 0, 10, 5),
        }
    }

    fn bf4() -> ExeEntry {
        ExeEntry {
            exe: "bf4.exe".to_string(),
            display_name: "Battlefield 4".to_string(),
            prefix: "BF4".to_string(),
        }
    }

    #[test]
    fn literal_format_yields_literal_name_plus_extension() {
        let name = build_filename("latest", &at(2, 0, 0, 0), None, Some("mkv")).expect("name");
        assert_eq!(name, "latest.mkv");
    }

    #[test]
    fn prefix_is_joined_with_underscore() {
        let name =
            build_filename("Replay_%H", &at(2, 9, 0, 0), Some("BF4"), Some(".mp4")).expect("name");
        assert_eq!(name, "BF4_Replay_09.mp4");
    }

    #[test]
    fn separators_in_formatted_name_are_flattened() {
        let name = build_filename("%Y/%m", &at(2, 0, 0, 0), None, None).expect("name");
        assert_eq!(name, "2024_05");
    }

    #[test]
    fn extension_of_dotfile_name_is_kept() {
        assert_eq!(source_extension(Path::new("/tmp/.mp4")).as_deref(), Some("mp4"));
        assert_eq!(source_extension(Path::new("/tmp/a.b.mkv")).as_deref(), Some("mkv"));
        assert_eq!(source_extension(Path::new("/tmp/noext")), None);
    }

    #[test]
    fn unsorted_dir_is_the_root() {
        let dir = resolve_dir(Path::new("/replays"), &cfg(), &ctx(Some("Game")), None)
            .expect("dir");
        assert_eq!(dir, PathBuf::from("/replays"));
    }

    #[test]
    fn scene_and_session_start_date_dirs() {
        let mut cfg = cfg();
        cfg.sorting.enabled = true;
        cfg.sorting.category = SortCategory::Scene;
        cfg.sorting.by_date = true;
        let dir = resolve_dir(Path::new("/replays"), &cfg, &ctx(Some("Main Scene")), None)
            .expect("dir");
        assert_eq!(dir, PathBuf::from("/replays/Main Scene/2024-05-01"));

        cfg.sorting.date_base = DateBase::BufferSaved;
        cfg.sorting.date_scheme = "%Y/%B/%a_%d/".to_string();
        let dir = resolve_dir(Path::new("/replays"), &cfg, &ctx(Some("Main Scene")), None)
            .expect("dir");
        assert_eq!(dir, PathBuf::from("/replays/Main Scene/2024/May/Thu_02"));
    }

    #[test]
    fn buffer_start_without_session_falls_back_to_now() {
        let mut cfg = cfg();
        cfg.sorting.enabled = true;
        cfg.sorting.by_date = true;
        let context = PlacementContext {
            scene: None,
            session_start: None,
            now: at(7, 12, 0, 0),
        };
        let dir = resolve_dir(Path::new("/replays"), &cfg, &context, None).expect("dir");
        assert_eq!(dir, PathBuf::from("/replays/2024-05-07"));
    }

    #[test]
    fn executable_category_uses_display_name() {
        let mut cfg = cfg();
        cfg.sorting.enabled = true;
        let dir = resolve_dir(Path::new("/replays"), &cfg, &ctx(None), Some(&bf4())).expect("dir");
        assert_eq!(dir, PathBuf::from("/replays/Battlefield 4"));
        let dir = resolve_dir(Path::new("/replays"), &cfg, &ctx(None), None).expect("dir");
        assert_eq!(dir, PathBuf::from("/replays"));
    }

    #[test]
    fn hostile_names_stay_under_root() {
        let mut cfg = cfg();
        cfg.sorting.enabled = true;
        cfg.sorting.category = SortCategory::Scene;
        cfg.sorting.by_date = true;
        cfg.sorting.date_scheme = "../../%Y/./".to_string();
        for scene in ["..", "../../etc", "/abs/path", "C:\\Windows", "  ", "a\u{7}b"] {
            let dir = resolve_dir(Path::new("/replays"), &cfg, &ctx(Some(scene)), None)
                .expect("dir");
            assert!(dir.starts_with("/replays"), "{scene:?} -> {}", dir.display());
            assert!(
                !dir.components()
                    .any(|c| matches!(c, std::path::Component::ParentDir)),
                "{scene:?} -> {}",
                dir.display()
            );
        }
    }

    #[test]
    fn sanitizer_drops_dot_segments() {
        assert_eq!(sanitize_component(".."), None);
        assert_eq!(sanitize_component(" . "), None);
        assert_eq!(sanitize_component("a:b").as_deref(), Some("a_b"));
        assert_eq!(relative_segments("2024//05\\x/"), vec!["2024", "05", "x"]);
    }

    #[test]
    fn unique_path_probes_numbered_suffixes() {
        let fs = FakeFileSystem::with_file("/r/clip.mp4", "");
        fs.write_string(Path::new("/r/clip_1.mp4"), "").expect("seed");
        assert_eq!(unique_path(&fs, Path::new("/r/clip.mp4")), PathBuf::from("/r/clip_2.mp4"));
        assert_eq!(unique_path(&fs, Path::new("/r/new.mp4")), PathBuf::from("/r/new.mp4"));
    }

    #[test]
    fn place_moves_and_avoids_collisions() {
        let mut cfg = cfg();
        cfg.output.filename_format = "clip".to_string();
        let fs = FakeFileSystem::with_file("/obs/a.mkv", "first");
        fs.write_string(Path::new("/obs/b.mkv"), "second").expect("seed");
        let runner = FakeProcessRunner::default();
        let policy = PlacementPolicy::new(&cfg, &fs, &runner);

        let first = policy.place(Path::new("/obs/a.mkv"), &ctx(None)).expect("first");
        let second = policy.place(Path::new("/obs/b.mkv"), &ctx(None)).expect("second");
        assert_eq!(first.destination, PathBuf::from("/replays/clip.mkv"));
        assert_eq!(second.destination, PathBuf::from("/replays/clip_1.mkv"));
        assert_eq!(fs.read_to_string(&first.destination).expect("read"), "first");
        assert_eq!(fs.read_to_string(&second.destination).expect("read"), "second");
        assert!(!fs.exists(Path::new("/obs/a.mkv")));
        assert!(runner.spawned().is_empty());
    }

    #[test]
    fn overwrite_reuses_nominal_name() {
        let mut cfg = cfg();
        cfg.output.filename_format = "clip".to_string();
        cfg.output.overwrite_existing = true;
        let fs = FakeFileSystem::with_file("/replays/clip.mp4", "old");
        fs.write_string(Path::new("/obs/new.mp4"), "new").expect("seed");
        let runner = FakeProcessRunner::default();
        let placed = PlacementPolicy::new(&cfg, &fs, &runner)
            .place(Path::new("/obs/new.mp4"), &ctx(None))
            .expect("place");
        assert_eq!(placed.destination, PathBuf::from("/replays/clip.mp4"));
        assert_eq!(fs.read_to_string(&placed.destination).expect("read"), "new");
    }

    #[test]
    fn exe_sorting_queries_process_list_once() {
        let mut cfg = cfg();
        cfg.sorting.enabled = true;
        cfg.sorting.exe_prefixes = true;
        cfg.output.filename_format = "clip".to_string();
        let fs = FakeFileSystem::with_file("/obs/x.mp4", "");
        let runner = FakeProcessRunner::default();
        runner.push_success(" 500 bash\n 90000 bfv.exe\n 700000 chrome\n");
        let placed = PlacementPolicy::new(&cfg, &fs, &runner)
            .place(Path::new("/obs/x.mp4"), &ctx(None))
            .expect("place");
        assert_eq!(
            placed.destination,
            PathBuf::from("/replays/Battlefield V/BF5_clip.mp4")
        );
        assert_eq!(runner.spawned().len(), 1);
    }

    #[test]
    fn persistent_copy_skips_same_file_and_copies_otherwise() {
        let mut cfg = cfg();
        cfg.persistent.enabled = true;
        cfg.persistent.path = Some(PathBuf::from("/latest/replay.mp4"));
        let fs = FakeFileSystem::with_file("/replays/a.mp4", "data");
        let runner = FakeProcessRunner::default();
        let policy = PlacementPolicy::new(&cfg, &fs, &runner);

        let copied = policy
            .copy_to_persistent(Path::new("/replays/a.mp4"))
            .expect("copy");
        assert_eq!(copied, Some(PathBuf::from("/latest/replay.mp4")));
        assert_eq!(
            fs.read_to_string(Path::new("/latest/replay.mp4")).expect("read"),
            "data"
        );

        let skipped = policy
            .copy_to_persistent(Path::new("/latest/replay.mp4"))
            .expect("same file");
        assert_eq!(skipped, None);
    }

    #[test]
    fn move_failure_propagates() {
        let cfg = cfg();
        let fs = FakeFileSystem::default();
        let runner = FakeProcessRunner::default();
        let err = PlacementPolicy::new(&cfg, &fs, &runner)
            .place(Path::new("/obs/missing.mp4"), &ctx(None))
            .expect_err("missing source");
        assert!(format!("{err}").contains("missing file"));
    }
}
