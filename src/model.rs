use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

/// Identifier handed out by the job manager, unique for the process lifetime.
pub type JobId = u64;

/// Whether a job fetches one video or every member of a playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Video,
    Playlist,
}

/// Quality picked in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    #[serde(rename = "Best")]
    Best,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "144p")]
    P144,
}

impl Quality {
    pub const ALL: [Quality; 6] = [
        Quality::Best,
        Quality::P720,
        Quality::P480,
        Quality::P360,
        Quality::P240,
        Quality::P144,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Quality::Best => "Best",
            Quality::P720 => "720p",
            Quality::P480 => "480p",
            Quality::P360 => "360p",
            Quality::P240 => "240p",
            Quality::P144 => "144p",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Audio container produced by the optional conversion step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
    Ogg,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 3] = [AudioFormat::Mp3, AudioFormat::Wav, AudioFormat::Ogg];

    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// egui visuals selectable from the theme menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub const ALL: [Theme; 2] = [Theme::Dark, Theme::Light];

    pub fn label(self) -> &'static str {
        match self {
            Theme::Dark => "Dark",
            Theme::Light => "Light",
        }
    }
}

/// One user-initiated download request, as read from the form.
#[derive(Debug, Clone)]
pub struct Job {
    pub kind: JobKind,
    pub url: String,
    pub save_dir: PathBuf,
    /// Collected but not applied to stream selection, see `downloader::select_stream`.
    pub quality: Quality,
    pub convert_to_audio: bool,
    pub audio_format: AudioFormat,
}

/// A candidate encoded stream reported by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub format_id: String,
    /// Container extension, e.g. `mp4`
    pub extension: String,
    /// Vertical resolution in pixels
    pub height: Option<u32>,
    /// Size in bytes when the site reports it
    pub filesize: Option<u64>,
    /// Carries both audio and video
    pub progressive: bool,
}

impl StreamInfo {
    pub fn resolution_label(&self) -> String {
        match self.height {
            Some(h) => format!("{}p", h),
            None => "unknown".to_string(),
        }
    }
}

/// Metadata for a single video plus all of its candidate streams
#[derive(Debug, Clone)]
pub struct ResolvedVideo {
    pub url: String,
    pub title: String,
    pub thumbnail: Option<String>,
    pub streams: Vec<StreamInfo>,
}

/// A progress sample for the stream currently being downloaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub bytes_downloaded: u64,
    pub bytes_remaining: u64,
    /// Time since the job started
    pub elapsed: Duration,
    /// 0.0 ..= 100.0
    pub percent: f64,
    /// Cumulative job bytes over `elapsed`
    pub bytes_per_sec: f64,
}

/// A finished download, shown in the list as `"<title> - <path>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedEntry {
    pub title: String,
    pub path: PathBuf,
    pub thumbnail: Option<String>,
}

impl fmt::Display for CompletedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.title, self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_labels_roundtrip_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            quality: Quality,
            audio: AudioFormat,
        }

        let parsed: Wrapper = toml::from_str("quality = \"480p\"\naudio = \"ogg\"").unwrap();
        assert_eq!(parsed.quality, Quality::P480);
        assert_eq!(parsed.audio, AudioFormat::Ogg);
        assert_eq!(Quality::P480.to_string(), "480p");
    }

    #[test]
    fn test_defaults_match_form_defaults() {
        assert_eq!(Quality::default(), Quality::Best);
        assert_eq!(AudioFormat::default().extension(), "mp3");
    }

    #[test]
    fn test_completed_entry_display() {
        let entry = CompletedEntry {
            title: "Intro".to_string(),
            path: PathBuf::from("/tmp/out/Intro.mp4"),
            thumbnail: None,
        };
        assert_eq!(entry.to_string(), "Intro - /tmp/out/Intro.mp4");
    }

    #[test]
    fn test_resolution_label() {
        let mut stream = StreamInfo {
            format_id: "18".into(),
            extension: "mp4".into(),
            height: Some(360),
            filesize: None,
            progressive: true,
        };
        assert_eq!(stream.resolution_label(), "360p");
        stream.height = None;
        assert_eq!(stream.resolution_label(), "unknown");
    }
}
