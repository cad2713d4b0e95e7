//! Supervises background download tasks: validation, spawning, cancellation
//! and reaping. Pause/resume is not supported.

use crate::{
    error::{DownloadError, Result},
    events::{EventSender, JobEvent},
    model::{Job, JobId},
    orchestrator::Orchestrator,
};
use std::{collections::HashMap, sync::Arc};
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct JobHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct JobManager {
    orchestrator: Arc<Orchestrator>,
    events: EventSender,
    runtime: Handle,
    next_id: JobId,
    running: HashMap<JobId, JobHandle>,
}

/// Rejects a job before any task exists for it.
pub fn validate(job: &Job) -> Result<()> {
    if job.url.trim().is_empty() {
        return Err(DownloadError::EmptyUrl);
    }
    if job.save_dir.as_os_str().is_empty() {
        return Err(DownloadError::MissingSaveDir);
    }
    Ok(())
}

impl JobManager {
    pub fn new(orchestrator: Arc<Orchestrator>, events: EventSender, runtime: Handle) -> Self {
        Self {
            orchestrator,
            events,
            runtime,
            next_id: 1,
            running: HashMap::new(),
        }
    }

    /// Validates `job` and, if it is acceptable, spawns one supervised task for it.
    pub fn submit(&mut self, mut job: Job) -> Result<JobId> {
        validate(&job)?;
        job.url = job.url.trim().to_string();

        let id = self.next_id;
        self.next_id += 1;

        let _ = self.events.send(JobEvent::Started { job: id, kind: job.kind });

        let cancel = CancellationToken::new();
        let orchestrator = Arc::clone(&self.orchestrator);
        let events = self.events.clone();
        let token = cancel.clone();
        let task = self
            .runtime
            .spawn(async move { orchestrator.run(id, job, events, token).await });

        info!("Spawned job {}", id);
        self.running.insert(id, JobHandle { cancel, task });
        Ok(id)
    }

    /// Cancels every running job and returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        for (id, handle) in &self.running {
            debug!("Cancelling job {}", id);
            handle.cancel.cancel();
        }
        self.running.len()
    }

    /// Forgets tasks that have exited.
    pub fn reap(&mut self) {
        self.running.retain(|_, h| !h.task.is_finished());
    }

    pub fn active(&self) -> usize {
        self.running.len()
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
