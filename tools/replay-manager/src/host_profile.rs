use crate::errors::ReplayError;
use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl IniDocument {
    pub fn parse(text: &str) -> Self {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current = String::new();
        for raw in text.lines() {
            let line = raw.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = name.trim().to_string();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { sections }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostProfile {
    pub recording_path: Option<PathBuf>,
    pub filename_formatting: Option<String>,
    pub recording_format: Option<String>,
}

impl HostProfile {
    pub fn from_ini(doc: &IniDocument) -> Self {
        let advanced = doc
            .get("Output", "Mode")
            .is_some_and(|mode| mode.eq_ignore_ascii_case("advanced"));
        let (primary, secondary) = if advanced {
            (("AdvOut", "RecFilePath"), ("SimpleOutput", "FilePath"))
        } else {
            (("SimpleOutput", "FilePath"), ("AdvOut", "RecFilePath"))
        };
        let recording_path = doc
            .get(primary.0, primary.1)
            .or_else(|| doc.get(secondary.0, secondary.1))
            .map(PathBuf::from);

        let format_sections: [&str; 2] = if advanced {
            ["AdvOut", "SimpleOutput"]
        } else {
            ["SimpleOutput", "AdvOut"]
        };
        let recording_format = format_sections.iter().find_map(|section| {
            doc.get(section, "RecFormat2")
                .or_else(|| doc.get(section, "RecFormat"))
        });

        Self {
            recording_path,
            filename_formatting: doc.get("Output", "FilenameFormatting").map(str::to_string),
            recording_format: recording_format.map(str::to_string),
        }
    }

    pub fn default_replay_dir(&self) -> Option<PathBuf> {
        self.recording_path.as_ref().map(|p| p.join("Replays"))
    }

    pub fn default_persistent_path(&self) -> Option<PathBuf> {
        let dir = self.recording_path.as_ref()?;
        let stem = self.filename_formatting.as_deref()?.trim();
        let ext = self.recording_format.as_deref()?.trim();
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(dir.join(format!("{stem}.{ext}")))
    }
}

pub fn host_config_dir(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit {
        return Some(dir.to_path_buf());
    }
    if cfg!(windows) {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return Some(PathBuf::from(appdata).join("obs-studio"));
        }
    }
    dirs::config_dir().map(|dir| dir.join("obs-studio"))
}

pub fn profile_ini_path(config_dir: &Path, profile: &str) -> PathBuf {
    config_dir
        .join("basic")
        .join("profiles")
        .join(profile)
        .join("basic.ini")
}

pub fn load_host_profile(
    fs: &dyn FileSystem,
    config_dir: &Path,
    profile: &str,
) -> Result<Option<HostProfile>, ReplayError> {
    let path = profile_ini_path(config_dir, profile);
    if !fs.exists(&path) {
        append_run_log(
            "debug",
            "host_profile.missing",
            json!({ "path": path.display().to_string() }),
        );
        return Ok(None);
    }
    let text = fs.read_to_string(&path)?;
    let profile = HostProfile::from_ini(&IniDocument::parse(&text));
    append_run_log(
        "debug",
        "host_profile.loaded",
        json!({
            "path": path.display().to_string(),
            "recording_path": profile.recording_path.as_ref().map(|p| p.display().to_string()),
            "recording_format": profile.recording_format,
        }),
    );
    Ok(Some(profile))
}
