use std::path::PathBuf;
use thiserror::Error;

/// Everything that can end a download job (or its audio conversion).
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Please enter a valid URL")]
    EmptyUrl,

    #[error("Please select a save location")]
    MissingSaveDir,

    #[error("no progressive mp4 stream available for {0}")]
    NoProgressiveStream(String),

    #[error("playlist has no videos: {0}")]
    EmptyPlaylist(String),

    #[error("external tool is missing: {tool} ({source})")]
    ToolMissing {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse yt-dlp output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download produced no file at {0}")]
    MissingOutput(PathBuf),

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Input problems are reported inline and never reach a background task.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::EmptyUrl | Self::MissingSaveDir)
    }

    /// Maps a spawn failure onto `ToolMissing` when the executable is absent.
    pub fn from_spawn(tool: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::ToolMissing {
                tool: tool.to_string(),
                source: err,
            }
        } else {
            Self::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
