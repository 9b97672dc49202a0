//! Mirror job state machine.
//!
//! Every status change arrives through the status transport and is handled
//! here, one event at a time. Handlers update the job table and stage queues
//! under a single lock, start backends on their own tasks, and emit the next
//! status back into the transport instead of calling the next handler.

use async_trait::async_trait;
use chrono::Utc;
use garde::Validate;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::backend::{BackendError, BackendRegistry, StageBackend, StageContext};
use super::notifier::{CompletionNotice, Notifier};
use super::stage_queue::{QueueStats, StageQueue};
use super::transport::{StatusHandler, StatusTransport};
use crate::models::{JobId, JobStatus, JobSummary, MirrorJob, NewJobRequest, Stage, StatusEvent};

const EVENT_HISTORY_CAPACITY: usize = 1024;

/// Maximum number of concurrently active jobs per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageCapacities {
    pub download: usize,
    pub compression: usize,
    pub decompression: usize,
    pub upload: usize,
}

impl Default for StageCapacities {
    fn default() -> Self {
        Self {
            download: 3,
            compression: 1,
            decompression: 1,
            upload: 3,
        }
    }
}

impl StageCapacities {
    pub fn get(&self, stage: Stage) -> usize {
        match stage {
            Stage::Download => self.download,
            Stage::Compression => self.compression,
            Stage::Decompression => self.decompression,
            Stage::Upload => self.upload,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parent of every job's work directory.
    pub work_root: PathBuf,
    pub capacities: StageCapacities,
}

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Invalid job request: {0}")]
    Validation(#[from] garde::Report),

    #[error("No {stage} backend named '{name}' is registered")]
    UnknownBackend { stage: Stage, name: String },

    #[error("Failed to prepare work directory: {0}")]
    Io(#[from] std::io::Error),
}

struct PipelineState {
    jobs: HashMap<JobId, MirrorJob>,
    queues: [StageQueue; 4],
}

impl PipelineState {
    fn new(capacities: StageCapacities) -> Self {
        let queue = |stage| StageQueue::new(stage, capacities.get(stage));
        Self {
            jobs: HashMap::new(),
            queues: [
                queue(Stage::Download),
                queue(Stage::Compression),
                queue(Stage::Decompression),
                queue(Stage::Upload),
            ],
        }
    }

    fn queue(&self, stage: Stage) -> &StageQueue {
        &self.queues[stage as usize]
    }

    fn queue_mut(&mut self, stage: Stage) -> &mut StageQueue {
        &mut self.queues[stage as usize]
    }

    /// Drop the job from `stage`'s queue and refill free slots.
    fn release(&mut self, stage: Stage, job_id: &JobId) -> Vec<JobId> {
        let queue = self.queue_mut(stage);
        queue.remove(job_id);
        let promoted = queue.admit();
        record_queue_gauges(queue);
        promoted
    }

    /// Drop the job from every queue it is still in and refill those stages.
    fn evict(&mut self, job_id: &JobId) -> Vec<(Stage, Vec<JobId>)> {
        let mut promoted = Vec::new();
        for queue in self.queues.iter_mut() {
            if queue.remove(job_id).is_some() {
                promoted.push((queue.stage(), queue.admit()));
                record_queue_gauges(queue);
            }
        }
        promoted
    }
}

struct Inner {
    state: Mutex<PipelineState>,
    transport: StatusTransport,
    backends: BackendRegistry,
    notifier: Arc<dyn Notifier>,
    work_root: PathBuf,
    events: broadcast::Sender<StatusEvent>,
}

/// Owner of the job table and the four stage queues.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        transport: StatusTransport,
        backends: BackendRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_HISTORY_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PipelineState::new(config.capacities)),
                transport,
                backends,
                notifier,
                work_root: config.work_root,
                events,
            }),
        }
    }

    /// Create a job, its work directory, and queue it for download.
    pub async fn submit(&self, request: NewJobRequest) -> Result<JobId, MirrorError> {
        request.validate()?;
        if let Some((stage, name)) = self.inner.backends.missing(&request.capabilities) {
            return Err(MirrorError::UnknownBackend { stage, name });
        }

        let job_id = JobId::generate();
        let work_dir = self.inner.work_root.join(job_id.as_str());
        tokio::fs::create_dir_all(&work_dir).await?;

        let job = MirrorJob::new(job_id.clone(), request, work_dir);
        info!(
            job_id = %job_id,
            source = %job.source,
            downloader = %job.capabilities.downloader,
            uploader = %job.capabilities.uploader,
            compress = job.capabilities.compress,
            decompress = job.capabilities.decompress,
            "Mirror job created"
        );
        self.inner.state.lock().jobs.insert(job_id.clone(), job);
        metrics::counter!("mirror_jobs_submitted_total").increment(1);

        self.inner
            .transport
            .emit(&job_id, JobStatus::Queued(Stage::Download));
        Ok(job_id)
    }

    /// Schedule removal of a job. Unknown ids are a logged no-op.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        if !self.inner.state.lock().jobs.contains_key(job_id) {
            info!(job_id = %job_id, "Cancel requested for unknown job");
            return false;
        }
        info!(job_id = %job_id, "Cancel requested");
        self.inner.transport.emit(job_id, JobStatus::Cancelled);
        true
    }

    /// Schedule removal of every live job.
    pub fn cancel_all(&self) -> Vec<JobId> {
        let ids: Vec<JobId> = self.inner.state.lock().jobs.keys().cloned().collect();
        if ids.is_empty() {
            info!("Cancel all requested with no active jobs");
        }
        for job_id in &ids {
            self.inner.transport.emit(job_id, JobStatus::Cancelled);
        }
        ids
    }

    pub fn job(&self, job_id: &JobId) -> Option<JobSummary> {
        self.inner.state.lock().jobs.get(job_id).map(MirrorJob::summary)
    }

    /// Consistent copy of every live job, oldest first.
    pub fn snapshot(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self
            .inner
            .state
            .lock()
            .jobs
            .values()
            .map(MirrorJob::summary)
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }

    pub fn job_count(&self) -> usize {
        self.inner.state.lock().jobs.len()
    }

    pub fn queue_stats(&self) -> Vec<QueueStats> {
        self.inner
            .state
            .lock()
            .queues
            .iter()
            .map(StageQueue::stats)
            .collect()
    }

    pub fn stage_stats(&self, stage: Stage) -> QueueStats {
        self.inner.state.lock().queue(stage).stats()
    }

    /// Stages whose queue currently holds the job.
    pub fn stages_holding(&self, job_id: &JobId) -> Vec<Stage> {
        self.inner
            .state
            .lock()
            .queues
            .iter()
            .filter(|q| q.contains(job_id))
            .map(StageQueue::stage)
            .collect()
    }

    /// One `<id> <status>` line per job.
    pub fn status_text(&self) -> String {
        let jobs = self.snapshot();
        if jobs.is_empty() {
            return "No active mirrors".to_string();
        }
        jobs.iter()
            .map(|job| format!("{} {}\n", job.job_id, job.status))
            .collect()
    }

    /// Every status change applied from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.events.subscribe()
    }

    /// Record the new status on the job. Returns false if the event is dropped.
    fn apply(&self, event: &StatusEvent) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !state.jobs.contains_key(&event.job_id) {
                warn!(
                    job_id = %event.job_id,
                    status = %event.status,
                    "Status for unknown job, dropping"
                );
                return false;
            }

            // Only the admission controller may make a job active
            if let JobStatus::Active(stage) = event.status {
                if !state.queue(stage).is_admitted(&event.job_id) {
                    warn!(
                        job_id = %event.job_id,
                        stage = %stage,
                        "Active status for a job without a slot, dropping"
                    );
                    return false;
                }
            }

            let Some(job) = state.jobs.get_mut(&event.job_id) else {
                return false;
            };
            if !job.status.can_transition_to(event.status) {
                warn!(
                    job_id = %event.job_id,
                    from = %job.status,
                    to = %event.status,
                    "Rejected status transition"
                );
                return false;
            }

            // Skipping past a queue is only for stages the job does not run
            if let (JobStatus::Queued(from), JobStatus::Queued(_)) = (job.status, event.status) {
                if job.capabilities.requires(from) {
                    warn!(
                        job_id = %event.job_id,
                        stage = %from,
                        "Job cannot skip a stage it requires, dropping"
                    );
                    return false;
                }
            }

            job.status = event.status;
            job.updated_at = Utc::now();
        }

        info!(job_id = %event.job_id, status = %event.status, "Job status changed");
        // No subscribers is fine
        let _ = self.inner.events.send(event.clone());
        true
    }

    fn activate(&self, stage: Stage, promoted: Vec<JobId>) {
        for job_id in promoted {
            debug!(job_id = %job_id, stage = %stage, "Admitted to stage");
            self.inner.transport.emit(&job_id, JobStatus::Active(stage));
        }
    }

    fn on_queued(&self, job_id: &JobId, stage: Stage) {
        let mut state = self.inner.state.lock();
        let required = match state.jobs.get(job_id) {
            Some(job) => job.capabilities.requires(stage),
            None => return,
        };

        if !required {
            drop(state);
            if let Some(next) = stage.next() {
                debug!(job_id = %job_id, stage = %stage, "Skipping stage");
                self.inner.transport.emit(job_id, JobStatus::Queued(next));
            }
            return;
        }

        let queue = state.queue_mut(stage);
        queue.push_back(job_id.clone());
        let promoted = queue.admit();
        record_queue_gauges(queue);
        drop(state);

        self.activate(stage, promoted);
    }

    fn on_active(&self, job_id: &JobId, stage: Stage) {
        let Some(job) = self.inner.state.lock().jobs.get(job_id).cloned() else {
            return;
        };

        let Some(backend) = self.inner.backends.resolve(stage, &job.capabilities) else {
            error!(job_id = %job_id, stage = %stage, "No backend registered for stage");
            self.inner.transport.emit_with_detail(
                job_id,
                JobStatus::Error(stage),
                Some(format!("no {stage} backend registered")),
            );
            return;
        };

        // Must be queued before the backend can report anything
        self.inner
            .transport
            .emit(job_id, JobStatus::Progressing(stage));

        let ctx = StageContext {
            stage,
            cancel: job.cancel.clone(),
            job,
        };
        tokio::spawn(run_stage(backend, ctx, self.inner.transport.clone()));
    }

    async fn on_complete(&self, job_id: JobId, stage: Stage, detail: Option<String>) {
        let (promoted, finished) = {
            let mut state = self.inner.state.lock();
            if !state.queue(stage).contains(&job_id) {
                warn!(job_id = %job_id, stage = %stage, "Completed job was not in the stage queue");
            }

            if stage == Stage::Upload {
                (state.evict(&job_id), state.jobs.remove(&job_id))
            } else {
                let promoted = state.release(stage, &job_id);
                if let (Some(job), Some(output)) = (state.jobs.get_mut(&job_id), &detail) {
                    job.output = Some(output.clone());
                }
                (vec![(stage, promoted)], None)
            }
        };

        for (freed, ids) in promoted {
            self.activate(freed, ids);
        }

        match (stage.next(), finished) {
            (Some(next), _) => self.inner.transport.emit(&job_id, JobStatus::Queued(next)),
            (None, Some(job)) => self.finish(job, detail).await,
            (None, None) => {}
        }
    }

    async fn finish(&self, job: MirrorJob, detail: Option<String>) {
        job.cancel.cancel();
        remove_work_dir(&job.id, &job.work_dir).await;

        let elapsed = Utc::now() - job.created_at;
        info!(
            job_id = %job.id,
            elapsed_secs = elapsed.num_seconds(),
            "Mirror job finished"
        );
        metrics::counter!("mirror_jobs_completed_total").increment(1);

        let notice = CompletionNotice {
            location: detail.or(job.destination),
            job_id: job.id,
            requester: job.requester,
        };
        let notifier = self.inner.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notice).await {
                warn!(job_id = %notice.job_id, error = %e, "Failed to notify requester");
            }
        });
    }

    async fn on_error(&self, job_id: JobId, stage: Stage, detail: Option<String>) {
        let (promoted, work_dir) = {
            let mut state = self.inner.state.lock();
            let promoted = state.evict(&job_id);
            let work_dir = state.jobs.get_mut(&job_id).map(|job| {
                job.work_dir_released = true;
                job.cancel.cancel();
                job.work_dir.clone()
            });
            (promoted, work_dir)
        };

        warn!(
            job_id = %job_id,
            stage = %stage,
            error = detail.as_deref().unwrap_or("unspecified"),
            "Stage failed, tearing down job"
        );
        metrics::counter!("mirror_jobs_failed_total", "stage" => stage.as_static()).increment(1);

        for (stage, ids) in promoted {
            self.activate(stage, ids);
        }
        if let Some(work_dir) = work_dir {
            remove_work_dir(&job_id, &work_dir).await;
        }
        self.inner.transport.emit(&job_id, JobStatus::Cancelled);
    }

    async fn on_cancelled(&self, job_id: &JobId) {
        let (job, promoted) = {
            let mut state = self.inner.state.lock();
            let Some(job) = state.jobs.remove(job_id) else {
                return;
            };
            let promoted = state.evict(job_id);
            (job, promoted)
        };

        job.cancel.cancel();
        for (stage, ids) in promoted {
            self.activate(stage, ids);
        }
        if !job.work_dir_released {
            remove_work_dir(job_id, &job.work_dir).await;
        }

        metrics::counter!("mirror_jobs_cancelled_total").increment(1);
        info!(job_id = %job_id, "Mirror job removed");
    }
}

#[async_trait]
impl StatusHandler for Orchestrator {
    async fn handle_status(&self, event: StatusEvent) {
        if !self.apply(&event) {
            return;
        }

        match event.status {
            JobStatus::Created => {}
            JobStatus::Queued(stage) => self.on_queued(&event.job_id, stage),
            JobStatus::Active(stage) => self.on_active(&event.job_id, stage),
            JobStatus::Progressing(_) => {}
            JobStatus::Complete(stage) => self.on_complete(event.job_id, stage, event.detail).await,
            JobStatus::Error(stage) => self.on_error(event.job_id, stage, event.detail).await,
            JobStatus::Cancelled => self.on_cancelled(&event.job_id).await,
        }
    }
}

/// Run one backend to completion and report the outcome through the transport.
async fn run_stage(backend: Arc<dyn StageBackend>, ctx: StageContext, transport: StatusTransport) {
    let job_id = ctx.job.id.clone();
    let stage = ctx.stage;
    info!(job_id = %job_id, stage = %stage, backend = backend.name(), "Stage started");

    let started = Instant::now();
    let outcome = tokio::select! {
        _ = ctx.cancel.cancelled() => Err(BackendError::Cancelled),
        result = backend.run(&ctx) => result,
    };
    let elapsed = started.elapsed();

    match outcome {
        Ok(output) => {
            info!(
                job_id = %job_id,
                stage = %stage,
                duration_ms = elapsed.as_millis() as u64,
                location = output.location.as_deref().unwrap_or("-"),
                "Stage complete"
            );
            metrics::histogram!("mirror_stage_seconds", "stage" => stage.as_static())
                .record(elapsed.as_secs_f64());
            transport.emit_with_detail(&job_id, JobStatus::Complete(stage), output.location);
        }
        Err(BackendError::Cancelled) if ctx.cancel.is_cancelled() => {
            info!(job_id = %job_id, stage = %stage, "Stage abandoned, job was torn down");
        }
        Err(e) => {
            transport.emit_with_detail(&job_id, JobStatus::Error(stage), Some(e.to_string()));
        }
    }
}

async fn remove_work_dir(job_id: &JobId, path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(job_id = %job_id, path = %path.display(), "Work directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(job_id = %job_id, path = %path.display(), "Work directory already gone");
        }
        Err(e) => {
            warn!(job_id = %job_id, path = %path.display(), error = %e, "Failed to remove work directory");
        }
    }
}

fn record_queue_gauges(queue: &StageQueue) {
    let stage = queue.stage().as_static();
    metrics::gauge!("mirror_stage_active", "stage" => stage).set(queue.active() as f64);
    metrics::gauge!("mirror_stage_queued", "stage" => stage).set(queue.queued() as f64);
}
