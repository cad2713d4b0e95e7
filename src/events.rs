//! Typed messages from background jobs to the UI thread, and the UI-side
//! state they update.

use crate::{
    model::{CompletedEntry, JobId, JobKind, ProgressEvent},
    progress::{format_percent, format_speed},
};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

pub type EventSender = UnboundedSender<JobEvent>;

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started { job: JobId, kind: JobKind },
    Progress { job: JobId, progress: ProgressEvent },
    Completed { job: JobId, entry: CompletedEntry },
    Succeeded { job: JobId, kind: JobKind },
    Failed { job: JobId, message: String },
    Cancelled { job: JobId },
    ConversionStarted { job: JobId, input: PathBuf },
    Converted { job: JobId, output: PathBuf },
    ConversionFailed { job: JobId, message: String },
}

impl JobEvent {
    pub fn job(&self) -> JobId {
        match self {
            JobEvent::Started { job, .. }
            | JobEvent::Progress { job, .. }
            | JobEvent::Completed { job, .. }
            | JobEvent::Succeeded { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Cancelled { job }
            | JobEvent::ConversionStarted { job, .. }
            | JobEvent::Converted { job, .. }
            | JobEvent::ConversionFailed { job, .. } => *job,
        }
    }

    /// True for the last event a download task emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Succeeded { .. } | JobEvent::Failed { .. } | JobEvent::Cancelled { .. }
        )
    }
}

/// Colour of the status label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    #[default]
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub tone: Tone,
}

/// Labels and completed list shown by the UI. Only the UI thread mutates it.
#[derive(Debug, Default)]
pub struct Dashboard {
    pub status: StatusLine,
    pub speed: String,
    completed: Vec<CompletedEntry>,
}

impl Dashboard {
    pub fn completed(&self) -> &[CompletedEntry] {
        &self.completed
    }

    pub fn set_status(&mut self, text: impl Into<String>, tone: Tone) {
        self.status = StatusLine {
            text: text.into(),
            tone,
        };
    }

    pub fn clear_status(&mut self) {
        self.status = StatusLine::default();
    }

    /// Applies one event; returns the entry when the completed list grew.
    pub fn apply(&mut self, event: JobEvent) -> Option<CompletedEntry> {
        match event {
            JobEvent::Started { kind, .. } => {
                let text = match kind {
                    JobKind::Video => "Downloading...",
                    JobKind::Playlist => "Downloading playlist...",
                };
                self.set_status(text, Tone::Info);
                self.speed.clear();
            }
            JobEvent::Progress { progress, .. } => {
                self.speed = format_speed(progress.bytes_per_sec);
                self.set_status(format_percent(progress.percent), Tone::Info);
            }
            JobEvent::Completed { entry, .. } => {
                self.completed.push(entry.clone());
                return Some(entry);
            }
            JobEvent::Succeeded { kind, .. } => {
                let text = match kind {
                    JobKind::Video => "Video downloaded successfully!",
                    JobKind::Playlist => "Playlist downloaded successfully!",
                };
                self.set_status(text, Tone::Success);
            }
            JobEvent::Failed { message, .. } => {
                self.set_status(format!("An error occurred: {}", message), Tone::Error);
            }
            JobEvent::Cancelled { .. } => {
                self.set_status("Download cancelled", Tone::Error);
            }
            JobEvent::ConversionStarted { input, .. } => {
                self.set_status(
                    format!("Converting {} to audio...", file_name(&input)),
                    Tone::Info,
                );
            }
            JobEvent::Converted { output, .. } => {
                self.set_status(format!("Audio saved: {}", output.display()), Tone::Success);
            }
            JobEvent::ConversionFailed { message, .. } => {
                self.set_status(
                    format!("Error converting video to audio: {}", message),
                    Tone::Error,
                );
            }
        }
        None
    }
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
