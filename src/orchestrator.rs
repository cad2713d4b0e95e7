//! Runs one job: resolves each video, picks its stream, downloads it while
//! streaming progress to the UI, then hands the file to the conversion worker.

use crate::{
    downloader::{StreamResolver, select_stream},
    error::{DownloadError, Result},
    events::{EventSender, JobEvent},
    model::{AudioFormat, CompletedEntry, Job, JobId, JobKind, StreamInfo},
    progress::ProgressTracker,
    transcoder::Transcoder,
};
use std::{future::Future, path::PathBuf, sync::Arc};
use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Audio extraction scheduled after a successful download
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub job: JobId,
    pub input: PathBuf,
    pub format: AudioFormat,
}

/// Handle to the worker that converts finished downloads one at a time.
#[derive(Clone)]
pub struct ConversionQueue {
    tx: UnboundedSender<ConversionRequest>,
}

impl ConversionQueue {
    /// Spawns the worker; it exits once every queue handle is dropped.
    pub fn spawn(transcoder: Arc<dyn Transcoder>, events: EventSender, runtime: &Handle) -> Self {
        let (tx, rx) = unbounded_channel();
        runtime.spawn(run_conversions(transcoder, rx, events));
        Self { tx }
    }

    pub fn enqueue(&self, request: ConversionRequest) {
        if self.tx.send(request).is_err() {
            warn!("Conversion worker is gone, dropping request");
        }
    }
}

async fn run_conversions(
    transcoder: Arc<dyn Transcoder>,
    mut rx: UnboundedReceiver<ConversionRequest>,
    events: EventSender,
) {
    while let Some(req) = rx.recv().await {
        let _ = events.send(JobEvent::ConversionStarted {
            job: req.job,
            input: req.input.clone(),
        });
        let event = match transcoder.extract_audio(&req.input, req.format).await {
            Ok(output) => JobEvent::Converted {
                job: req.job,
                output,
            },
            Err(e) => {
                warn!(
                    "{} failed on {}: {}",
                    transcoder.name(),
                    req.input.display(),
                    e
                );
                JobEvent::ConversionFailed {
                    job: req.job,
                    message: e.to_string(),
                }
            }
        };
        let _ = events.send(event);
    }
    debug!("Conversion worker stopped");
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::Cancelled),
        res = fut => res,
    }
}

pub struct Orchestrator {
    resolver: Arc<dyn StreamResolver>,
    conversions: ConversionQueue,
}

impl Orchestrator {
    pub fn new(resolver: Arc<dyn StreamResolver>, conversions: ConversionQueue) -> Self {
        Self {
            resolver,
            conversions,
        }
    }

    /// Runs `job` to completion and reports exactly one terminal event.
    pub async fn run(&self, id: JobId, job: Job, events: EventSender, cancel: CancellationToken) {
        info!(
            "Job {} started with {}: {:?} {} -> {}",
            id,
            self.resolver.name(),
            job.kind,
            job.url,
            job.save_dir.display()
        );
        let mut tracker = ProgressTracker::new();

        let result = match job.kind {
            JobKind::Video => self
                .download_video(id, &job.url, &job, &mut tracker, &events, &cancel)
                .await
                .map(|_| ()),
            JobKind::Playlist => {
                self.download_playlist(id, &job, &mut tracker, &events, &cancel)
                    .await
            }
        };

        let event = match result {
            Ok(()) => {
                info!("Job {} finished", id);
                JobEvent::Succeeded {
                    job: id,
                    kind: job.kind,
                }
            }
            Err(DownloadError::Cancelled) => {
                info!("Job {} cancelled", id);
                JobEvent::Cancelled { job: id }
            }
            Err(e) => {
                warn!("Job {} failed: {}", id, e);
                JobEvent::Failed {
                    job: id,
                    message: e.to_string(),
                }
            }
        };
        let _ = events.send(event);
    }

    // One failing member aborts the rest of the playlist.
    async fn download_playlist(
        &self,
        id: JobId,
        job: &Job,
        tracker: &mut ProgressTracker,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let urls = cancellable(cancel, self.resolver.playlist_urls(&job.url)).await?;
        for (index, url) in urls.iter().enumerate() {
            debug!("Job {}: playlist item {}/{}", id, index + 1, urls.len());
            self.download_video(id, url, job, tracker, events, cancel)
                .await?;
        }
        Ok(())
    }

    async fn download_video(
        &self,
        id: JobId,
        url: &str,
        job: &Job,
        tracker: &mut ProgressTracker,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<CompletedEntry> {
        let video = cancellable(cancel, self.resolver.resolve(url)).await?;
        let stream = select_stream(&video.streams)
            .cloned()
            .ok_or_else(|| DownloadError::NoProgressiveStream(video.title.clone()))?;
        debug!(
            "Job {}: requested quality {} not applied, using {} ({})",
            id,
            job.quality,
            stream.resolution_label(),
            stream.format_id
        );

        let mut fetched = stream.filesize.unwrap_or(0);
        let mut on_progress = |current: &StreamInfo, remaining: u64| {
            let size = current.filesize.unwrap_or(0);
            fetched = size;
            let progress = tracker.observe(size, remaining);
            trace!(
                "Job {}: {} bytes in, {} left after {:?}",
                id,
                progress.bytes_downloaded,
                progress.bytes_remaining,
                progress.elapsed
            );
            let _ = events.send(JobEvent::Progress { job: id, progress });
        };
        let path = self
            .resolver
            .download(&video, &stream, &job.save_dir, &mut on_progress, cancel)
            .await?;
        tracker.finish_stream(fetched);

        let entry = CompletedEntry {
            title: video.title,
            path,
            thumbnail: video.thumbnail,
        };
        info!("Job {}: saved {}", id, entry);
        let _ = events.send(JobEvent::Completed {
            job: id,
            entry: entry.clone(),
        });

        if job.convert_to_audio {
            self.conversions.enqueue(ConversionRequest {
                job: id,
                input: entry.path.clone(),
                format: job.audio_format,
            });
        }
        Ok(entry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        downloader::{ProgressCallback, output_path},
        model::{Quality, ResolvedVideo},
        transcoder::audio_output_path,
    };
    use async_trait::async_trait;
    use std::{
        collections::HashMap,
        path::Path,
        sync::Mutex,
        time::Duration,
    };

    /// Resolver serving canned videos; URLs missing from `videos` fail.
    pub(crate) struct FakeResolver {
        pub videos: HashMap<String, ResolvedVideo>,
        pub playlist: Vec<String>,
        pub chunks: Vec<u64>,
        pub hang: bool,
    }

    impl FakeResolver {
        pub(crate) fn new() -> Self {
            Self {
                videos: HashMap::new(),
                playlist: Vec::new(),
                chunks: vec![750, 500, 0],
                hang: false,
            }
        }

        pub(crate) fn with_video(mut self, url: &str, title: &str, progressive: bool) -> Self {
            self.videos.insert(
                url.to_string(),
                ResolvedVideo {
                    url: url.to_string(),
                    title: title.to_string(),
                    thumbnail: None,
                    streams: vec![
                        StreamInfo {
                            format_id: "18".into(),
                            extension: "mp4".into(),
                            height: Some(360),
                            filesize: Some(1000),
                            progressive,
                        },
                        StreamInfo {
                            format_id: "137".into(),
                            extension: "mp4".into(),
                            height: Some(1080),
                            filesize: Some(5000),
                            progressive: false,
                        },
                    ],
                },
            );
            self.playlist.push(url.to_string());
            self
        }
    }

    #[async_trait]
    impl StreamResolver for FakeResolver {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn resolve(&self, url: &str) -> Result<ResolvedVideo> {
            self.videos.get(url).cloned().ok_or_else(|| DownloadError::ToolFailed {
                tool: "fake".into(),
                code: Some(1),
                stderr: format!("Video unavailable: {}", url),
            })
        }

        async fn playlist_urls(&self, _url: &str) -> Result<Vec<String>> {
            Ok(self.playlist.clone())
        }

        async fn download(
            &self,
            video: &ResolvedVideo,
            stream: &StreamInfo,
            dir: &Path,
            on_progress: &mut ProgressCallback<'_>,
            cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            if self.hang {
                cancel.cancelled().await;
                return Err(DownloadError::Cancelled);
            }
            for remaining in &self.chunks {
                on_progress(stream, *remaining);
            }
            let path = output_path(dir, &video.title, &stream.extension);
            std::fs::write(&path, b"video")?;
            Ok(path)
        }
    }

    /// Records conversions; fails when `fail` is set.
    pub(crate) struct FakeTranscoder {
        pub calls: Mutex<Vec<PathBuf>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn extract_audio(&self, input: &Path, format: AudioFormat) -> Result<PathBuf> {
            self.calls.lock().unwrap().push(input.to_path_buf());
            if self.fail {
                return Err(DownloadError::ToolFailed {
                    tool: "fake".into(),
                    code: Some(1),
                    stderr: "no audio stream".into(),
                });
            }
            Ok(audio_output_path(input, format))
        }
    }

    pub(crate) fn job(kind: JobKind, url: &str, dir: &Path, convert: bool) -> Job {
        Job {
            kind,
            url: url.to_string(),
            save_dir: dir.to_path_buf(),
            quality: Quality::P144,
            convert_to_audio: convert,
            audio_format: AudioFormat::Mp3,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn completed(events: &[JobEvent]) -> Vec<CompletedEntry> {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::Completed { entry, .. } => Some(entry.clone()),
                _ => None,
            })
            .collect()
    }

    fn setup(
        resolver: FakeResolver,
        fail_conversion: bool,
    ) -> (
        Orchestrator,
        Arc<FakeTranscoder>,
        EventSender,
        UnboundedReceiver<JobEvent>,
    ) {
        let (tx, rx) = unbounded_channel();
        let transcoder = Arc::new(FakeTranscoder {
            calls: Mutex::new(Vec::new()),
            fail: fail_conversion,
        });
        let queue = ConversionQueue::spawn(transcoder.clone(), tx.clone(), &Handle::current());
        (
            Orchestrator::new(Arc::new(resolver), queue),
            transcoder,
            tx,
            rx,
        )
    }

    #[tokio::test]
    async fn test_single_video_adds_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FakeResolver::new().with_video("https://v/1", "First", true);
        let (orch, _, tx, mut rx) = setup(resolver, false);

        orch.run(
            1,
            job(JobKind::Video, "https://v/1", dir.path(), false),
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = drain(&mut rx);
        let entries = completed(&events);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "First");
        assert_eq!(entries[0].path, dir.path().join("First.mp4"));
        assert!(entries[0].path.exists());
        assert_eq!(
            events.last(),
            Some(&JobEvent::Succeeded {
                job: 1,
                kind: JobKind::Video
            })
        );
    }

    #[tokio::test]
    async fn test_no_progressive_stream_fails_without_entry() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FakeResolver::new().with_video("https://v/1", "Adaptive", false);
        let (orch, _, tx, mut rx) = setup(resolver, false);

        orch.run(
            1,
            job(JobKind::Video, "https://v/1", dir.path(), false),
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = drain(&mut rx);
        assert!(completed(&events).is_empty());
        assert!(matches!(
            events.last(),
            Some(JobEvent::Failed { message, .. }) if message.contains("no progressive mp4 stream")
        ));
    }

    #[tokio::test]
    async fn test_playlist_downloads_every_member() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FakeResolver::new()
            .with_video("https://v/1", "One", true)
            .with_video("https://v/2", "Two", true)
            .with_video("https://v/3", "Three", true);
        let (orch, _, tx, mut rx) = setup(resolver, false);

        orch.run(
            7,
            job(JobKind::Playlist, "https://p/list", dir.path(), false),
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = drain(&mut rx);
        let titles: Vec<String> = completed(&events).into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["One", "Two", "Three"]);
        for title in &titles {
            assert!(dir.path().join(format!("{}.mp4", title)).exists());
        }
        assert_eq!(
            events.last(),
            Some(&JobEvent::Succeeded {
                job: 7,
                kind: JobKind::Playlist
            })
        );
    }

    #[tokio::test]
    async fn test_playlist_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = FakeResolver::new()
            .with_video("https://v/1", "One", true)
            .with_video("https://v/3", "Three", true);
        resolver.playlist = vec![
            "https://v/1".into(),
            "https://v/missing".into(),
            "https://v/3".into(),
        ];
        let (orch, _, tx, mut rx) = setup(resolver, false);

        orch.run(
            2,
            job(JobKind::Playlist, "https://p/list", dir.path(), false),
            tx,
            CancellationToken::new(),
        )
        .await;

        let events = drain(&mut rx);
        let titles: Vec<String> = completed(&events).into_iter().map(|e| e.title).collect();
        assert_eq!(titles, vec!["One"]);
        assert!(!dir.path().join("Three.mp4").exists());
        assert!(matches!(
            events.last(),
            Some(JobEvent::Failed { message, .. }) if message.contains("Video unavailable")
        ));
    }

    #[tokio::test]
    async fn test_progress_events_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = FakeResolver::new().with_video("https://v/1", "First", true);
        resolver.chunks = vec![900, 400, 600, 100, 0];
        let (orch, _, tx, mut rx) = setup(resolver, false);

        orch.run(
            1,
            job(JobKind::Video, "https://v/1", dir.path(), false),
            tx,
            CancellationToken::new(),
        )
        .await;

        let percents: Vec<f64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                JobEvent::Progress { progress, .. } => {
                    assert!(progress.bytes_per_sec >= 0.0);
                    Some(progress.percent)
                }
                _ => None,
            })
            .collect();
        assert_eq!(percents.len(), 5);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert!(percents[..4].iter().all(|p| *p < 100.0));
        assert_eq!(percents[4], 100.0);
    }

    #[tokio::test]
    async fn test_conversion_runs_after_download() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FakeResolver::new().with_video("https://v/1", "Song", true);
        let (orch, transcoder, tx, mut rx) = setup(resolver, false);

        orch.run(
            1,
            job(JobKind::Video, "https://v/1", dir.path(), true),
            tx,
            CancellationToken::new(),
        )
        .await;

        let converted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(JobEvent::Converted { output, .. }) => break output,
                    Some(_) => continue,
                    None => panic!("channel closed"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(converted, dir.path().join("Song.mp3"));
        assert_eq!(
            transcoder.calls.lock().unwrap().as_slice(),
            &[dir.path().join("Song.mp4")]
        );
    }

    #[tokio::test]
    async fn test_conversion_failure_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FakeResolver::new().with_video("https://v/1", "Song", true);
        let (orch, _, tx, mut rx) = setup(resolver, true);

        orch.run(
            1,
            job(JobKind::Video, "https://v/1", dir.path(), true),
            tx,
            CancellationToken::new(),
        )
        .await;

        let mut seen = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(ev) = rx.recv().await {
                let done = matches!(ev, JobEvent::ConversionFailed { .. });
                seen.push(ev);
                if done {
                    break;
                }
            }
        })
        .await
        .unwrap();
        seen.extend(drain(&mut rx));

        assert_eq!(completed(&seen).len(), 1);
        assert!(seen.contains(&JobEvent::Succeeded {
            job: 1,
            kind: JobKind::Video
        }));
        assert!(!seen.iter().any(|e| matches!(e, JobEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_cancel_stops_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = FakeResolver::new().with_video("https://v/1", "Long", true);
        resolver.hang = true;
        let (orch, _, tx, mut rx) = setup(resolver, false);

        let cancel = CancellationToken::new();
        cancel.cancel();
        orch.run(
            1,
            job(JobKind::Video, "https://v/1", dir.path(), false),
            tx,
            cancel,
        )
        .await;

        let events = drain(&mut rx);
        assert!(completed(&events).is_empty());
        assert_eq!(events.last(), Some(&JobEvent::Cancelled { job: 1 }));
    }
}
