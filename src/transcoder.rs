use crate::{
    error::{DownloadError, Result},
    model::AudioFormat,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Extracts the audio track of a downloaded file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes `<input stem>.<format>` next to `input` and returns its path.
    async fn extract_audio(&self, input: &Path, format: AudioFormat) -> Result<PathBuf>;
}

pub fn audio_output_path(input: &Path, format: AudioFormat) -> PathBuf {
    input.with_extension(format.extension())
}

/// Transcoder backed by the external `ffmpeg` executable.
pub struct FfmpegTranscoder {
    bin: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn extract_audio(&self, input: &Path, format: AudioFormat) -> Result<PathBuf> {
        let output = audio_output_path(input, format);
        debug!("Converting {} -> {}", input.display(), output.display());

        // The child is killed if this future is dropped mid-conversion.
        let result = Command::new(&self.bin)
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg(&output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DownloadError::from_spawn("ffmpeg", e))?;

        if !result.status.success() {
            return Err(DownloadError::ToolFailed {
                tool: "ffmpeg".to_string(),
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        info!("Wrote audio file {}", output.display());
        Ok(output)
    }
}
