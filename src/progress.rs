use crate::model::ProgressEvent;
use std::time::Instant;

/// Prefix of the machine-readable progress lines requested from yt-dlp.
pub const PROGRESS_PREFIX: &str = "tubegrab-progress:";

/// `--progress-template` value producing lines parsed by [`parse_progress_from_line`].
pub fn progress_template() -> String {
    format!(
        "download:{}%(progress.downloaded_bytes)s:%(progress.total_bytes,progress.total_bytes_estimate)s",
        PROGRESS_PREFIX
    )
}

/// Raw byte counters reported by one progress line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl RawProgress {
    pub fn remaining(&self, filesize: u64) -> u64 {
        filesize.saturating_sub(self.downloaded)
    }
}

pub fn parse_progress_from_line(line: &str) -> Option<RawProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let (downloaded, total) = rest.split_once(':')?;
    let downloaded = parse_byte_count(downloaded)?;
    Some(RawProgress {
        downloaded,
        total: parse_byte_count(total),
    })
}

// yt-dlp prints "NA" for unknown fields and floats for estimates.
fn parse_byte_count(field: &str) -> Option<u64> {
    let value = field.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value as u64)
}

/// Turns the raw lines of one stream into `(filesize, remaining)` samples.
///
/// The total carried by the line wins over `fallback`, the size known at
/// resolve time, which is often only an estimate. Repeated samples and
/// anything after the first complete one are dropped.
#[derive(Debug)]
pub struct StreamSampler {
    fallback: Option<u64>,
    last: Option<RawProgress>,
    complete: bool,
}

impl StreamSampler {
    pub fn new(fallback: Option<u64>) -> Self {
        Self {
            fallback,
            last: None,
            complete: false,
        }
    }

    pub fn sample(&mut self, raw: RawProgress) -> Option<(u64, u64)> {
        if self.complete || self.last == Some(raw) {
            return None;
        }
        self.last = Some(raw);

        let size = match raw.total {
            Some(total) => total.max(raw.downloaded),
            // past the estimate with no live total: the end is unknown
            None => self.fallback.filter(|size| *size > raw.downloaded)?,
        };
        let remaining = size - raw.downloaded;
        self.complete = remaining == 0;
        Some((size, remaining))
    }

    /// Closing sample once the file is on disk, unless one was already sent.
    pub fn finish(&mut self, size: u64) -> Option<(u64, u64)> {
        if self.complete {
            return None;
        }
        self.complete = true;
        Some((size, 0))
    }
}

/// Derives percentage and throughput for one job.
///
/// Percentage is per stream and never goes backwards; it only reaches 100
/// when nothing remains. Throughput counts every byte fetched since the job
/// started, including streams already finished in a playlist.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    finished_bytes: u64,
    stream_percent: f64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started: Instant) -> Self {
        Self {
            started,
            finished_bytes: 0,
            stream_percent: 0.0,
        }
    }

    pub fn observe(&mut self, filesize: u64, remaining: u64) -> ProgressEvent {
        self.observe_at(filesize, remaining, Instant::now())
    }

    pub fn observe_at(&mut self, filesize: u64, remaining: u64, now: Instant) -> ProgressEvent {
        let remaining = remaining.min(filesize);
        let downloaded = filesize - remaining;

        let mut percent = if remaining == 0 {
            100.0
        } else {
            (downloaded as f64 / filesize as f64 * 100.0).min(99.9)
        };
        percent = percent.max(self.stream_percent);
        self.stream_percent = percent;

        let elapsed = now.saturating_duration_since(self.started);
        let secs = elapsed.as_secs_f64();
        let total = (self.finished_bytes + downloaded) as f64;
        let bytes_per_sec = if secs > 0.0 { total / secs } else { 0.0 };

        ProgressEvent {
            bytes_downloaded: downloaded,
            bytes_remaining: remaining,
            elapsed,
            percent,
            bytes_per_sec,
        }
    }

    /// Folds a completed stream into the job totals and resets the percentage.
    pub fn finish_stream(&mut self, filesize: u64) {
        self.finished_bytes += filesize;
        self.stream_percent = 0.0;
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("Download Speed: {:.2} KB/s", bytes_per_sec.max(0.0) / 1024.0)
}

pub fn format_percent(percent: f64) -> String {
    format!("Downloading... {:.1}% complete", percent)
}
