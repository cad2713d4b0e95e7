use crate::model::{AudioFormat, Quality, Theme};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at a config file
pub const CONFIG_ENV: &str = "TUBEGRAB_CONFIG";

/// Startup defaults for the form plus tool locations. Every field is optional
/// in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pre-filled save location; empty means the user must pick one
    pub download_dir: Option<PathBuf>,
    pub quality: Quality,
    pub audio_format: AudioFormat,
    pub convert_to_audio: bool,
    pub theme: Theme,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// `json` or `pretty`
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            quality: Quality::Best,
            audio_format: AudioFormat::Mp3,
            convert_to_audio: false,
            theme: Theme::Dark,
            ytdlp_path: PathBuf::from(if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" }),
            ffmpeg_path: PathBuf::from(if cfg!(target_os = "windows") { "ffmpeg.exe" } else { "ffmpeg" }),
            log_format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Loads the file if one exists, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    pub fn uses_json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Flag, then environment, then `<config dir>/tubegrab/config.toml`.
pub fn config_path(flag: Option<PathBuf>) -> Option<PathBuf> {
    if flag.is_some() {
        return flag;
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir().map(|dir| dir.join("tubegrab").join("config.toml"))
}
