use crate::errors::ReplayError;
use crate::host_profile::{host_config_dir, load_host_profile};
use crate::logging::DEFAULT_DISK_BUDGET_BYTES;
use crate::process_table::ProcessTable;
use crate::runtime::FileSystem;
use crate::timefmt::validate_pattern;
use crate::types::{BitrateMode, Container, DateBase, RemuxMode, SortCategory, VideoEncoder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_EXE_LIST: &str = "bf4.exe, Battlefield 4, BF4\n\
TslGame.exe, PUBG, PUBG\n\
BF2042.exe, Battlefield 2042, BF2042\n\
bfv.exe, Battlefield V, BF5";

pub const FILE_TOKEN: &str = "%FILE%";
pub const INPUT_TOKEN: &str = "%INPUT%";
pub const OUTPUT_TOKEN: &str = "%OUTPUT%";

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub output: OutputConfig,
    pub persistent: PersistentConfig,
    pub sorting: SortingConfig,
    pub concat: ConcatConfig,
    pub remux: RemuxConfig,
    pub host: HostConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputConfig {
    pub dir: Option<PathBuf>,
    pub filename_format: String,
    pub overwrite_existing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistentConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortingConfig {
    pub enabled: bool,
    pub category: SortCategory,
    pub by_date: bool,
    pub date_base: DateBase,
    pub date_scheme: String,
    pub exe_prefixes: bool,
    pub exe_list: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcatConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemuxConfig {
    pub enabled: bool,
    pub on_buffer_stop: bool,
    pub replace_original: bool,
    pub mode: RemuxMode,
    pub filename_format: String,
    pub video_encoder: VideoEncoder,
    pub container: Container,
    pub crf: u32,
    pub bitrate_mbps: u32,
    pub bitrate_mode: BitrateMode,
    pub h264_preset: String,
    pub custom_command: String,
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    pub profile: String,
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    pub dir: Option<PathBuf>,
    pub log_budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig {
                dir: None,
                filename_format: "Replay_%Y-%m-%d_%H-%M-%S".to_string(),
                overwrite_existing: false,
            },
            persistent: PersistentConfig {
                enabled: false,
                path: None,
            },
            sorting: SortingConfig {
                enabled: false,
                category: SortCategory::Executable,
                by_date: false,
                date_base: DateBase::BufferStart,
                date_scheme: "%Y-%m-%d/".to_string(),
                exe_prefixes: false,
                exe_list: DEFAULT_EXE_LIST.to_string(),
            },
            concat: ConcatConfig { enabled: false },
            remux: RemuxConfig {
                enabled: false,
                on_buffer_stop: false,
                replace_original: false,
                mode: RemuxMode::Standard,
                filename_format: format!("{FILE_TOKEN}_remux"),
                video_encoder: VideoEncoder::Copy,
                container: Container::Mp4,
                crf: 23,
                bitrate_mbps: 10,
                bitrate_mode: BitrateMode::Cq,
                h264_preset: "medium".to_string(),
                custom_command: String::new(),
                ffmpeg_path: "ffmpeg".to_string(),
            },
            host: HostConfig {
                profile: "Untitled".to_string(),
                config_dir: None,
            },
            state: StateConfig {
                dir: None,
                log_budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

impl AppConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.state.dir.clone().unwrap_or_else(default_state_dir)
    }

    pub fn output_dir(&self) -> Result<&Path, ReplayError> {
        self.output
            .dir
            .as_deref()
            .ok_or_else(|| ReplayError::InvalidConfig("output.dir is not set".to_string()))
    }

    pub fn persistent_path(&self) -> Option<&Path> {
        if self.persistent.enabled {
            self.persistent.path.as_deref()
        } else {
            None
        }
    }

    pub fn needs_process_table(&self) -> bool {
        self.sorting.exe_prefixes
            || (self.sorting.enabled && self.sorting.category == SortCategory::Executable)
    }

    pub fn process_table(&self) -> Result<ProcessTable, ReplayError> {
        if !self.needs_process_table() {
            return Ok(ProcessTable::default());
        }
        ProcessTable::parse(&self.sorting.exe_list)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    output: Option<PartialOutputConfig>,
    persistent: Option<PartialPersistentConfig>,
    sorting: Option<PartialSortingConfig>,
    concat: Option<PartialConcatConfig>,
    remux: Option<PartialRemuxConfig>,
    host: Option<PartialHostConfig>,
    state: Option<PartialStateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialOutputConfig {
    dir: Option<PathBuf>,
    filename_format: Option<String>,
    overwrite_existing: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPersistentConfig {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSortingConfig {
    enabled: Option<bool>,
    category: Option<SortCategory>,
    by_date: Option<bool>,
    date_base: Option<DateBase>,
    date_scheme: Option<String>,
    exe_prefixes: Option<bool>,
    exe_list: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialConcatConfig {
    enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRemuxConfig {
    enabled: Option<bool>,
    on_buffer_stop: Option<bool>,
    replace_original: Option<bool>,
    mode: Option<RemuxMode>,
    filename_format: Option<String>,
    video_encoder: Option<VideoEncoder>,
    container: Option<Container>,
    crf: Option<u32>,
    bitrate_mbps: Option<u32>,
    bitrate_mode: Option<BitrateMode>,
    h264_preset: Option<String>,
    custom_command: Option<String>,
    ffmpeg_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHostConfig {
    profile: Option<String>,
    config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialStateConfig {
    dir: Option<PathBuf>,
    log_budget_bytes: Option<u64>,
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("replay-manager").join("config.toml"))
}

pub fn default_state_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("replay-manager"))
        .unwrap_or_else(|| PathBuf::from(".cache").join("replay-manager"))
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, ReplayError> {
    let mut cfg = AppConfig::default();

    let config_path = match &overrides.config_path {
        Some(path) => Some(absolutize_path(process_cwd, path)),
        None => default_config_path().filter(|path| fs.exists(path)),
    };
    let partial = match &config_path {
        Some(path) => {
            let file_contents = fs.read_to_string(path)?;
            toml::from_str::<PartialAppConfig>(&file_contents)
                .map_err(|e| ReplayError::ConfigParse(format!("{}: {e}", path.display())))?
        }
        None => PartialAppConfig::default(),
    };

    // Host defaults sit between built-in defaults and the file.
    if let Some(host) = &partial.host {
        merge_host(&mut cfg.host, host);
    }
    apply_host_defaults(&mut cfg, fs)?;
    merge_partial_config(&mut cfg, partial);
    apply_cli_overrides(&mut cfg, overrides);

    if let Some(dir) = cfg.output.dir.take() {
        cfg.output.dir = Some(absolutize_path(process_cwd, &dir));
    }
    let state_dir = cfg.state_dir();
    cfg.state.dir = Some(absolutize_path(process_cwd, &state_dir));

    validate_config(&cfg)?;
    Ok(cfg)
}

fn apply_host_defaults(cfg: &mut AppConfig, fs: &dyn FileSystem) -> Result<(), ReplayError> {
    let Some(config_dir) = host_config_dir(cfg.host.config_dir.as_deref()) else {
        return Ok(());
    };
    let Some(profile) = load_host_profile(fs, &config_dir, &cfg.host.profile)? else {
        return Ok(());
    };
    if let Some(dir) = profile.default_replay_dir() {
        cfg.output.dir = Some(dir);
    }
    if let Some(path) = profile.default_persistent_path() {
        cfg.persistent.path = Some(path);
    }
    Ok(())
}

fn merge_host(host: &mut HostConfig, partial: &PartialHostConfig) {
    if let Some(profile) = &partial.profile {
        host.profile = profile.clone();
    }
    if let Some(dir) = &partial.config_dir {
        host.config_dir = Some(dir.clone());
    }
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(output) = partial.output {
        if let Some(dir) = output.dir {
            cfg.output.dir = Some(dir);
        }
        if let Some(value) = output.filename_format {
            cfg.output.filename_format = value;
        }
        if let Some(value) = output.overwrite_existing {
            cfg.output.overwrite_existing = value;
        }
    }

    if let Some(persistent) = partial.persistent {
        if let Some(value) = persistent.enabled {
            cfg.persistent.enabled = value;
        }
        if let Some(path) = persistent.path {
            cfg.persistent.path = Some(path);
        }
    }

    if let Some(sorting) = partial.sorting {
        if let Some(value) = sorting.enabled {
            cfg.sorting.enabled = value;
        }
        if let Some(value) = sorting.category {
            cfg.sorting.category = value;
        }
        if let Some(value) = sorting.by_date {
            cfg.sorting.by_date = value;
        }
        if let Some(value) = sorting.date_base {
            cfg.sorting.date_base = value;
        }
        if let Some(value) = sorting.date_scheme {
            cfg.sorting.date_scheme = value;
        }
        if let Some(value) = sorting.exe_prefixes {
            cfg.sorting.exe_prefixes = value;
        }
        if let Some(value) = sorting.exe_list {
            cfg.sorting.exe_list = value;
        }
    }

    if let Some(concat) = partial.concat {
        if let Some(value) = concat.enabled {
            cfg.concat.enabled = value;
        }
    }

    if let Some(remux) = partial.remux {
        if let Some(value) = remux.enabled {
            cfg.remux.enabled = value;
        }
        if let Some(value) = remux.on_buffer_stop {
            cfg.remux.on_buffer_stop = value;
        }
        if let Some(value) = remux.replace_original {
            cfg.remux.replace_original = value;
        }
        if let Some(value) = remux.mode {
            cfg.remux.mode = value;
        }
        if let Some(value) = remux.filename_format {
            cfg.remux.filename_format = value;
        }
        if let Some(value) = remux.video_encoder {
            cfg.remux.video_encoder = value;
        }
        if let Some(value) = remux.container {
            cfg.remux.container = value;
        }
        if let Some(value) = remux.crf {
            cfg.remux.crf = value;
        }
        if let Some(value) = remux.bitrate_mbps {
            cfg.remux.bitrate_mbps = value;
        }
        if let Some(value) = remux.bitrate_mode {
            cfg.remux.bitrate_mode = value;
        }
        if let Some(value) = remux.h264_preset {
            cfg.remux.h264_preset = value;
        }
        if let Some(value) = remux.custom_command {
            cfg.remux.custom_command = value;
        }
        if let Some(value) = remux.ffmpeg_path {
            cfg.remux.ffmpeg_path = value;
        }
    }

    if let Some(state) = partial.state {
        if let Some(dir) = state.dir {
            cfg.state.dir = Some(dir);
        }
        if let Some(value) = state.log_budget_bytes {
            cfg.state.log_budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(state_dir) = &overrides.state_dir {
        cfg.state.dir = Some(state_dir.clone());
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

pub fn validate_config(cfg: &AppConfig) -> Result<(), ReplayError> {
    if cfg.output.dir.is_none() {
        return Err(ReplayError::InvalidConfig(
            "output.dir is required when no host profile provides a recording path".to_string(),
        ));
    }

    if cfg.output.filename_format.trim().is_empty() {
        return Err(ReplayError::InvalidConfig(
            "output.filename_format must not be empty".to_string(),
        ));
    }
    validate_pattern(&cfg.output.filename_format)
        .map_err(|e| ReplayError::InvalidConfig(format!("output.filename_format: {e}")))?;

    if cfg.sorting.enabled && cfg.sorting.by_date {
        validate_pattern(&cfg.sorting.date_scheme)
            .map_err(|e| ReplayError::InvalidConfig(format!("sorting.date_scheme: {e}")))?;
    }

    if cfg.needs_process_table() {
        ProcessTable::parse(&cfg.sorting.exe_list)
            .map_err(|e| ReplayError::InvalidConfig(format!("sorting.exe_list: {e}")))?;
    }

    if cfg.persistent.enabled && cfg.persistent.path.is_none() {
        return Err(ReplayError::InvalidConfig(
            "persistent.path is required when persistent.enabled is true".to_string(),
        ));
    }

    validate_remux(&cfg.remux)
}

fn validate_remux(remux: &RemuxConfig) -> Result<(), ReplayError> {
    if !remux.filename_format.contains(FILE_TOKEN) {
        return Err(ReplayError::InvalidConfig(format!(
            "remux.filename_format must contain {FILE_TOKEN}"
        )));
    }
    if remux.crf > 51 {
        return Err(ReplayError::InvalidConfig(
            "remux.crf must be between 0 and 51".to_string(),
        ));
    }
    if !(1..=100).contains(&remux.bitrate_mbps) {
        return Err(ReplayError::InvalidConfig(
            "remux.bitrate_mbps must be between 1 and 100".to_string(),
        ));
    }
    if remux.ffmpeg_path.trim().is_empty() {
        return Err(ReplayError::InvalidConfig(
            "remux.ffmpeg_path must not be empty".to_string(),
        ));
    }

    match remux.mode {
        RemuxMode::Standard => {
            let presets = remux.video_encoder.presets();
            if !presets.is_empty() && !presets.contains(&remux.h264_preset.as_str()) {
                return Err(ReplayError::InvalidConfig(format!(
                    "remux.h264_preset {:?} is not valid for {} (expected one of: {})",
                    remux.h264_preset,
                    remux.video_encoder.as_str(),
                    presets.join(", ")
                )));
            }
        }
        RemuxMode::CustomFfmpeg => {
            if !remux.custom_command.contains(INPUT_TOKEN) {
                return Err(ReplayError::InvalidConfig(format!(
                    "remux.custom_command must contain {INPUT_TOKEN} in custom_ffmpeg mode"
                )));
            }
        }
    }

    Ok(())
}
