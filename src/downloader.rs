use crate::{
    error::{DownloadError, Result},
    model::{ResolvedVideo, StreamInfo},
    progress::{StreamSampler, parse_progress_from_line, progress_template},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{ChildStderr, Command},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Invoked with the stream being fetched and the bytes still to come.
pub type ProgressCallback<'a> = dyn FnMut(&StreamInfo, u64) + Send + 'a;

/// Turns a page URL into downloadable streams and fetches them.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Name of the backend (for logging)
    fn name(&self) -> &'static str;

    /// Title, thumbnail and candidate streams for a single video
    async fn resolve(&self, url: &str) -> Result<ResolvedVideo>;

    /// Member video URLs of a playlist, in playlist order
    async fn playlist_urls(&self, url: &str) -> Result<Vec<String>>;

    /// Downloads `stream` into `dir` and returns the written file.
    async fn download(
        &self,
        video: &ResolvedVideo,
        stream: &StreamInfo,
        dir: &Path,
        on_progress: &mut ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// Highest-resolution progressive mp4 among the candidates.
///
/// The quality picked in the UI is not consulted.
pub fn select_stream(streams: &[StreamInfo]) -> Option<&StreamInfo> {
    streams
        .iter()
        .filter(|s| s.progressive && s.extension.eq_ignore_ascii_case("mp4"))
        .max_by_key(|s| s.height.unwrap_or(0))
}

const FORBIDDEN_CHARS: &[char] = &[
    '/', '\\', ':', '*', '?', '"', '<', '>', '|', '~', '#', '%', '{', '}', ';', ',',
];

/// Strips characters that are not allowed in file names on common platforms.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !c.is_control() && !FORBIDDEN_CHARS.contains(c))
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.').trim();
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<dir>/<sanitized title>.<ext>`
pub fn output_path(dir: &Path, title: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", sanitize_filename(title), extension))
}

#[derive(Debug, Deserialize)]
struct YtDlpVideo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    filesize: Option<u64>,
    #[serde(default)]
    filesize_approx: Option<f64>,
}

impl YtDlpFormat {
    fn has_codec(codec: &Option<String>) -> bool {
        codec.as_deref().is_some_and(|c| !c.is_empty() && c != "none")
    }

    fn into_stream(self) -> StreamInfo {
        let progressive = Self::has_codec(&self.vcodec) && Self::has_codec(&self.acodec);
        StreamInfo {
            format_id: self.format_id,
            extension: self.ext.unwrap_or_default(),
            height: self.height,
            filesize: self
                .filesize
                .or_else(|| self.filesize_approx.map(|f| f as u64)),
            progressive,
        }
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpPlaylist {
    #[serde(default)]
    entries: Vec<YtDlpEntry>,
}

#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
}

fn parse_video(url: &str, json: &str) -> Result<ResolvedVideo> {
    let raw: YtDlpVideo = serde_json::from_str(json)?;
    Ok(ResolvedVideo {
        url: raw.webpage_url.unwrap_or_else(|| url.to_string()),
        title: raw.title.unwrap_or_else(|| "Unknown Title".to_string()),
        thumbnail: raw.thumbnail,
        streams: raw.formats.into_iter().map(YtDlpFormat::into_stream).collect(),
    })
}

fn parse_playlist(json: &str) -> Result<Vec<String>> {
    let raw: YtDlpPlaylist = serde_json::from_str(json)?;
    Ok(raw
        .entries
        .into_iter()
        .filter_map(|e| e.url.or(e.webpage_url))
        .collect())
}

/// Resolver backed by the external `yt-dlp` executable.
pub struct YtDlpResolver {
    bin: PathBuf,
}

impl YtDlpResolver {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    async fn dump_json(&self, args: &[&str], url: &str) -> Result<String> {
        debug!("Running {} {:?} {}", self.bin.display(), args, url);
        let output = Command::new(&self.bin)
            .args(args)
            .arg("--no-warnings")
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DownloadError::from_spawn("yt-dlp", e))?;

        if !output.status.success() {
            return Err(DownloadError::ToolFailed {
                tool: "yt-dlp".to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve(&self, url: &str) -> Result<ResolvedVideo> {
        let json = self.dump_json(&["-J", "--no-playlist"], url).await?;
        let video = parse_video(url, &json)?;
        debug!(
            "Resolved '{}' with {} candidate streams",
            video.title,
            video.streams.len()
        );
        Ok(video)
    }

    async fn playlist_urls(&self, url: &str) -> Result<Vec<String>> {
        let json = self.dump_json(&["-J", "--flat-playlist"], url).await?;
        let urls = parse_playlist(&json)?;
        if urls.is_empty() {
            return Err(DownloadError::EmptyPlaylist(url.to_string()));
        }
        info!("Playlist {} has {} videos", url, urls.len());
        Ok(urls)
    }

    async fn download(
        &self,
        video: &ResolvedVideo,
        stream: &StreamInfo,
        dir: &Path,
        on_progress: &mut ProgressCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let target = output_path(dir, &video.title, &stream.extension);

        let args = vec![
            "-f".to_owned(),
            stream.format_id.clone(),
            "--newline".to_owned(),
            "--no-warnings".to_owned(),
            "--no-part".to_owned(),
            "--force-overwrites".to_owned(),
            "--progress-template".to_owned(),
            progress_template(),
            "-o".to_owned(),
            // yt-dlp treats % in the output path as a template field
            target.to_string_lossy().replace('%', "%%"),
            video.url.clone(),
        ];
        debug!("Running {} {:?}", self.bin.display(), args);

        let mut child = Command::new(&self.bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloadError::from_spawn("yt-dlp", e))?;

        let out = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Io(std::io::Error::other("yt-dlp stdout unavailable")))?;
        let stderr = child.stderr.take().map(|err| tokio::spawn(stderr_tail(err)));
        let mut lines = BufReader::new(out).lines();
        let mut current = stream.clone();
        let mut sampler = StreamSampler::new(stream.filesize);

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Cancelling download of '{}'", video.title);
                    let _ = child.kill().await;
                    if let Some(task) = &stderr {
                        task.abort();
                    }
                    return Err(DownloadError::Cancelled);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };

            let sample = parse_progress_from_line(&line).and_then(|raw| sampler.sample(raw));
            if let Some((size, remaining)) = sample {
                current.filesize = Some(size);
                on_progress(&current, remaining);
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let err = match stderr {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            return Err(DownloadError::ToolFailed {
                tool: "yt-dlp".to_string(),
                code: status.code(),
                stderr: err.trim().to_string(),
            });
        }
        if let Some(task) = stderr {
            task.abort();
        }

        if !tokio::fs::try_exists(&target).await? {
            return Err(DownloadError::MissingOutput(target));
        }
        let on_disk = tokio::fs::metadata(&target).await?.len();
        if let Some((size, remaining)) = sampler.finish(on_disk) {
            current.filesize = Some(size);
            on_progress(&current, remaining);
        }
        Ok(target)
    }
}

const STDERR_TAIL: usize = 4096;

/// Drains a child's stderr to EOF and keeps the last [`STDERR_TAIL`] bytes.
async fn stderr_tail(mut err: ChildStderr) -> String {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match err.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_TAIL {
                    tail.drain(..tail.len() - STDERR_TAIL);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}
