//! Desktop front-end for downloading videos and playlists, with optional
//! conversion of each download to an audio file.

// Startup configuration
mod config;
// Resolver seam and the yt-dlp implementation
mod downloader;
// Error type shared by jobs
mod error;
// Job -> UI messages and the UI-side labels they update
mod events;
// Job supervision and cancellation
mod jobs;
// Data models for jobs, streams and completed downloads
mod model;
// Per-job download flow
mod orchestrator;
// Progress parsing and percentage/speed math
mod progress;
// Thumbnail fetching module
mod thumbnail;
// Transcoder seam and the ffmpeg implementation
mod transcoder;

use config::{AppConfig, config_path};
use downloader::YtDlpResolver;
use events::{Dashboard, JobEvent, Tone};
use jobs::JobManager;
use model::{AudioFormat, Job, JobKind, Quality, Theme};
use orchestrator::{ConversionQueue, Orchestrator};
use transcoder::FfmpegTranscoder;

use anyhow::{Context, anyhow};
use clap::Parser;
// eframe/egui for GUI application framework
use eframe::{App, Frame, egui};
use egui::{Color32, ColorImage, TextureOptions, Visuals};
// OnceCell for single-time runtime initialization
use once_cell::sync::OnceCell;
// FileDialog for folder selection dialogs
use rfd::FileDialog;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::{
    runtime::Runtime,
    sync::mpsc::{UnboundedReceiver, unbounded_channel},
};
use tracing::{debug, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_logging(config: &AppConfig) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if config.uses_json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

/// Program entry point: initializes runtime and launches GUI
fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let path = config_path(args.config);
    let config = AppConfig::load(path.as_deref())?;
    init_logging(&config);

    info!("Starting tubegrab...");
    if let Some(p) = &path {
        debug!("Config path: {}", p.display());
    }

    let rt = Runtime::new().context("Failed to start the tokio runtime")?;
    RUNTIME
        .set(rt)
        .map_err(|_| anyhow!("Runtime already initialized"))?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("YouTube Downloader")
            .with_inner_size([800.0, 600.0]),
        ..Default::default()
    };
    let app = DownloaderApp::new(config)?;
    eframe::run_native(
        "YouTube Downloader",
        options,
        Box::new(move |cc| {
            cc.egui_ctx.set_visuals(visuals_for(app.theme));
            Box::new(app)
        }),
    )
    .map_err(|e| anyhow!("UI exited with error: {}", e))
}

fn visuals_for(theme: Theme) -> Visuals {
    match theme {
        Theme::Dark => Visuals::dark(),
        Theme::Light => Visuals::light(),
    }
}

fn runtime() -> anyhow::Result<&'static Runtime> {
    RUNTIME.get().ok_or_else(|| anyhow!("Runtime not initialized"))
}

/// Application state for the GUI
struct DownloaderApp {
    /// Input field for the video or playlist URL
    url_input: String,
    /// Destination folder for downloads
    download_folder: String,
    /// Selected quality option
    selected_quality: Quality,
    /// Run the audio conversion after each download
    convert_audio: bool,
    audio_format: AudioFormat,
    theme: Theme,
    /// Status/speed labels and completed list, only touched on this thread
    dashboard: Dashboard,
    /// Events from background jobs
    events_rx: UnboundedReceiver<JobEvent>,
    jobs: JobManager,
    /// Cached textures keyed by thumbnail URL
    thumbnails: HashMap<String, egui::TextureHandle>,
    /// Incoming thumbnail fetch results (url, image)
    thumbnail_results: Arc<Mutex<Vec<(String, ColorImage)>>>,
}

impl DownloaderApp {
    fn new(config: AppConfig) -> anyhow::Result<Self> {
        let handle = runtime()?.handle().clone();
        let (tx, rx) = unbounded_channel();

        let resolver = Arc::new(YtDlpResolver::new(config.ytdlp_path.clone()));
        let transcoder = Arc::new(FfmpegTranscoder::new(config.ffmpeg_path.clone()));
        let conversions = ConversionQueue::spawn(transcoder, tx.clone(), &handle);
        let orchestrator = Arc::new(Orchestrator::new(resolver, conversions));

        Ok(Self {
            url_input: String::new(),
            download_folder: config
                .download_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_default(),
            selected_quality: config.quality,
            convert_audio: config.convert_to_audio,
            audio_format: config.audio_format,
            theme: config.theme,
            dashboard: Dashboard::default(),
            events_rx: rx,
            jobs: JobManager::new(orchestrator, tx, handle),
            thumbnails: HashMap::new(),
            thumbnail_results: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn start(&mut self, kind: JobKind) {
        let job = Job {
            kind,
            url: self.url_input.clone(),
            save_dir: PathBuf::from(self.download_folder.trim()),
            quality: self.selected_quality,
            convert_to_audio: self.convert_audio,
            audio_format: self.audio_format,
        };
        match self.jobs.submit(job) {
            Ok(id) => debug!("Submitted job {}", id),
            Err(e) => {
                if !e.is_input_error() {
                    warn!("Could not start download: {}", e);
                }
                self.dashboard.set_status(e.to_string(), Tone::Error);
            }
        }
    }

    fn clear_fields(&mut self) {
        self.url_input.clear();
        self.selected_quality = Quality::Best;
        self.download_folder.clear();
        self.dashboard.clear_status();
    }

    fn open_folder(&self) {
        let folder = self.download_folder.trim().to_string();
        if folder.is_empty() {
            return;
        }
        std::thread::spawn(move || {
            #[cfg(target_os = "windows")]
            {
                let _ = std::process::Command::new("explorer").arg(folder).spawn();
            }
            #[cfg(target_os = "macos")]
            {
                let _ = std::process::Command::new("open").arg(folder).spawn();
            }
            #[cfg(all(unix, not(target_os = "macos")))]
            {
                let _ = std::process::Command::new("xdg-open").arg(folder).spawn();
            }
        });
    }

    fn copy_url(&self, ctx: &egui::Context) {
        let url = self.url_input.trim().to_string();
        if url.is_empty() {
            return;
        }
        ctx.output_mut(|o| o.copied_text = url);
        let _ = rfd::MessageDialog::new()
            .set_level(rfd::MessageLevel::Info)
            .set_title("URL Copied")
            .set_description("The URL has been copied to the clipboard.")
            .set_buttons(rfd::MessageButtons::Ok)
            .show();
    }

    fn cancel_downloads(&mut self) {
        if self.jobs.cancel_all() == 0 {
            self.dashboard.set_status("No download is running", Tone::Info);
        }
    }

    /// Drain job events; the only place job results reach the labels.
    fn poll_events(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.events_rx.try_recv() {
            if event.is_terminal() {
                debug!("Job {} reported its final status", event.job());
            }
            if let Some(entry) = self.dashboard.apply(event) {
                if let Some(url) = entry.thumbnail {
                    self.spawn_thumbnail(url, ctx);
                }
            }
        }
        self.jobs.reap();
    }

    fn spawn_thumbnail(&self, url: String, ctx: &egui::Context) {
        if self.thumbnails.contains_key(&url) {
            return;
        }
        let rt = match runtime() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("Skipping thumbnail: {}", e);
                return;
            }
        };
        let results = Arc::clone(&self.thumbnail_results);
        let ctx_c = ctx.clone();
        rt.spawn_blocking(move || {
            if let Some(img) = thumbnail::fetch_thumbnail(&url) {
                if let Ok(mut pending) = results.lock() {
                    pending.push((url, img));
                }
                ctx_c.request_repaint();
            }
        });
    }

    fn load_thumbnails(&mut self, ctx: &egui::Context) {
        let Ok(mut pending) = self.thumbnail_results.lock() else {
            return;
        };
        for (url, img) in pending.drain(..) {
            let tex = ctx.load_texture(&url, img, TextureOptions::default());
            self.thumbnails.insert(url, tex);
        }
    }

    fn form(&mut self, ui: &mut egui::Ui) {
        egui::Grid::new("form")
            .num_columns(3)
            .spacing([10.0, 8.0])
            .show(ui, |ui| {
                ui.label("Select Theme:");
                let before = self.theme;
                egui::ComboBox::from_id_source("theme")
                    .selected_text(self.theme.label())
                    .show_ui(ui, |ui| {
                        for t in Theme::ALL {
                            ui.selectable_value(&mut self.theme, t, t.label());
                        }
                    });
                if self.theme != before {
                    ui.ctx().set_visuals(visuals_for(self.theme));
                }
                ui.end_row();

                ui.label("Enter YouTube URL:");
                ui.add(egui::TextEdit::singleline(&mut self.url_input).desired_width(360.0));
                ui.end_row();

                ui.label("Select Video Quality:");
                egui::ComboBox::from_id_source("quality")
                    .selected_text(self.selected_quality.label())
                    .show_ui(ui, |ui| {
                        for q in Quality::ALL {
                            ui.selectable_value(&mut self.selected_quality, q, q.label());
                        }
                    });
                ui.end_row();

                ui.label("Select Save Location:");
                ui.add(egui::TextEdit::singleline(&mut self.download_folder).desired_width(300.0));
                if ui.button("Browse").clicked() {
                    let mut dialog = FileDialog::new();
                    if !self.download_folder.trim().is_empty() {
                        dialog = dialog.set_directory(self.download_folder.trim());
                    }
                    if let Some(folder) = dialog.pick_folder() {
                        self.download_folder = folder.display().to_string();
                    }
                }
                ui.end_row();

                ui.checkbox(&mut self.convert_audio, "Convert to Audio");
                ui.end_row();

                ui.label("Select Audio Format:");
                egui::ComboBox::from_id_source("audio_format")
                    .selected_text(self.audio_format.extension())
                    .show_ui(ui, |ui| {
                        for f in AudioFormat::ALL {
                            ui.selectable_value(&mut self.audio_format, f, f.extension());
                        }
                    });
                ui.end_row();
            });
    }

    fn buttons(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui.button("Download Video").clicked() {
                self.start(JobKind::Video);
            }
            if ui.button("Download Playlist").clicked() {
                self.start(JobKind::Playlist);
            }
        });
        ui.horizontal(|ui| {
            if ui.button("Clear Fields").clicked() {
                self.clear_fields();
            }
            if ui.button("Open Folder").clicked() {
                self.open_folder();
            }
            if ui.button("Pause/Resume").clicked() {
                self.dashboard
                    .set_status("Pause/Resume is not supported", Tone::Info);
            }
            if ui.button("Cancel").clicked() {
                self.cancel_downloads();
            }
            if ui.button("Copy URL").clicked() {
                self.copy_url(ui.ctx());
            }
        });
    }

    fn completed_list(&self, ui: &mut egui::Ui) {
        egui::ScrollArea::vertical()
            .max_height(220.0)
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                for entry in self.dashboard.completed() {
                    ui.horizontal(|ui| {
                        // Show thumbnail if available
                        if let Some(tex) = entry
                            .thumbnail
                            .as_ref()
                            .and_then(|url| self.thumbnails.get(url))
                        {
                            ui.add(egui::Image::new(tex).max_width(80.0));
                        }
                        ui.label(entry.to_string());
                    });
                }
            });
    }

    fn status(&self, ui: &mut egui::Ui) {
        let color = match self.dashboard.status.tone {
            Tone::Info => ui.visuals().text_color(),
            Tone::Success => Color32::GREEN,
            Tone::Error => Color32::RED,
        };
        ui.colored_label(color, self.dashboard.status.text.as_str());
        ui.label(self.dashboard.speed.as_str());
        if self.jobs.active() > 0 {
            ui.label(format!("Active downloads: {}", self.jobs.active()));
        }
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.poll_events(ctx);
        self.load_thumbnails(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("YouTube Downloader");
            ui.separator();
            self.form(ui);
            ui.separator();
            self.buttons(ui);
            ui.separator();
            ui.label(format!("Completed downloads ({})", self.dashboard.completed().len()));
            self.completed_list(ui);
            ui.separator();
            self.status(ui);
        });

        // Request periodic repaint for progress updates
        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}
