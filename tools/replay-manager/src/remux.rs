use crate::config::{RemuxConfig, FILE_TOKEN, INPUT_TOKEN, OUTPUT_TOKEN};
use crate::errors::ReplayError;
use crate::runtime::{FileSystem, ProcessRequest};
use crate::types::{BitrateMode, RemuxMode, VideoEncoder};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceOriginal {
    pub temp: PathBuf,
    pub original: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub label: String,
    pub request: ProcessRequest,
    pub output: PathBuf,
    pub finalize: Option<ReplaceOriginal>,
    pub cleanup: Option<PathBuf>,
}

pub fn build_remux_job(input: &Path, cfg: &RemuxConfig) -> Result<TranscodeJob, ReplayError> {
    let dir = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ReplayError::InvalidConfig(format!("cannot remux {}: no file name", input.display()))
        })?;
    let formatted = cfg.filename_format.replace(FILE_TOKEN, &stem);

    match cfg.mode {
        RemuxMode::CustomFfmpeg => {
            let output = dir.join(&formatted);
            let command = cfg
                .custom_command
                .replace(INPUT_TOKEN, &input.to_string_lossy())
                .replace(OUTPUT_TOKEN, &output.to_string_lossy());
            Ok(TranscodeJob {
                label: format!("remux:{}", input.display()),
                request: shell_request(&command),
                output,
                finalize: None,
                cleanup: None,
            })
        }
        RemuxMode::Standard => {
            let ext = cfg.container.extension();
            let (output, finalize) = if cfg.replace_original {
                let temp = dir.join(format!("{stem}.remux-tmp.{ext}"));
                let finalize = ReplaceOriginal {
                    temp: temp.clone(),
                    original: input.to_path_buf(),
                    target: dir.join(format!("{stem}.{ext}")),
                };
                (temp, Some(finalize))
            } else {
                let output = dir.join(format!("{formatted}.{ext}"));
                if output == input {
                    return Err(ReplayError::InvalidConfig(format!(
                        "remux output would overwrite its input {}; set remux.replace_original or change remux.filename_format",
                        input.display()
                    )));
                }
                (output, None)
            };

            let mut args = vec![
                "-y".to_string(),
                "-i".to_string(),
                input.to_string_lossy().to_string(),
            ];
            args.extend(encoder_args(cfg));
            args.push(output.to_string_lossy().to_string());

            Ok(TranscodeJob {
                label: format!("remux:{}", input.display()),
                request: ProcessRequest {
                    program: cfg.ffmpeg_path.clone(),
                    args,
                },
                output,
                finalize,
                cleanup: None,
            })
        }
    }
}

pub fn encoder_args(cfg: &RemuxConfig) -> Vec<String> {
    let mut args: Vec<String> = match cfg.video_encoder {
        VideoEncoder::Copy => vec!["-c:v".into(), "copy".into()],
        VideoEncoder::Libx264 => vec![
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            cfg.h264_preset.clone(),
            "-crf".into(),
            cfg.crf.to_string(),
        ],
        VideoEncoder::H264Nvenc => vec![
            "-c:v".into(),
            "h264_nvenc".into(),
            "-preset".into(),
            cfg.h264_preset.clone(),
            "-b:v".into(),
            format!("{}M", cfg.bitrate_mbps),
        ],
        VideoEncoder::Libsvtav1 => match cfg.bitrate_mode {
            BitrateMode::Cq => vec![
                "-c:v".into(),
                "libsvtav1".into(),
                "-crf".into(),
                cfg.crf.to_string(),
                "-b:v".into(),
                "0".into(),
            ],
            BitrateMode::Vbr => vec![
                "-c:v".into(),
                "libsvtav1".into(),
                "-b:v".into(),
                format!("{}M", cfg.bitrate_mbps),
            ],
        },
    };
    args.extend(["-c:a", "copy", "-map", "0"].map(String::from));
    args
}

pub fn concat_list_contents(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', "'\\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

pub fn concat_list_path(state_dir: &Path, session_id: &str) -> PathBuf {
    state_dir.join(format!("concat-{session_id}.txt"))
}

pub fn build_concat_job(
    fs: &dyn FileSystem,
    list_path: &Path,
    replays: &[PathBuf],
    output: &Path,
    ffmpeg_path: &str,
) -> Result<TranscodeJob, ReplayError> {
    if let Some(parent) = list_path.parent() {
        fs.create_dir_all(parent)?;
    }
    fs.write_string(list_path, &concat_list_contents(replays))?;
    let mut args = ["-y", "-f", "concat", "-safe", "0", "-i"].map(String::from).to_vec();
    args.push(list_path.to_string_lossy().to_string());
    args.extend(["-c", "copy"].map(String::from));
    args.push(output.to_string_lossy().to_string());
    Ok(TranscodeJob {
        label: format!("concat:{}", output.display()),
        request: ProcessRequest {
            program: ffmpeg_path.to_string(),
            args,
        },
        output: output.to_path_buf(),
        finalize: None,
        cleanup: Some(list_path.to_path_buf()),
    })
}

pub fn batch_inputs(fs: &dyn FileSystem, dir: &Path) -> Result<Vec<PathBuf>, ReplayError> {
    let files = fs.list_dir(dir)?;
    Ok(files
        .into_iter()
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ext == "mp4" || ext == "mkv")
        })
        .collect())
}

fn shell_request(command: &str) -> ProcessRequest {
    if cfg!(windows) {
        ProcessRequest {
            program: "cmd".to_string(),
            args: vec!["/C".to_string(), command.to_string()],
        }
    } else {
        ProcessRequest {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), command.to_string()],
        }
    }
}
