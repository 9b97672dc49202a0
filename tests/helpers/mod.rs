//! Test helper utilities for pipeline and API tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{sleep, Instant};

use mirror_pipeline::app_state::AppState;
use mirror_pipeline::models::{JobId, JobStatus, Stage, StatusEvent};
use mirror_pipeline::services::backend::{
    BackendError, BackendRegistry, StageBackend, StageContext, StageOutput,
};
use mirror_pipeline::services::notifier::{CompletionNotice, Notifier, NotifyError};
use mirror_pipeline::services::orchestrator::{Orchestrator, OrchestratorConfig, StageCapacities};
use mirror_pipeline::services::transport::{status_channel, ListenerHandle, StatusTransport};

use crate::fixtures::{JobFixture, DOWNLOADER, UPLOADER};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` until it holds, panicking with `what` after the timeout.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {what}");
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Outcome handed to a waiting [`GatedBackend`] run.
pub type Outcome = Result<Option<String>, String>;

/// Backend whose runs block until the test releases them, one job at a time.
pub struct GatedBackend {
    name: &'static str,
    gates: Mutex<HashMap<JobId, oneshot::Sender<Outcome>>>,
    started: Mutex<Vec<JobId>>,
}

impl GatedBackend {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            gates: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
        })
    }

    /// Finish the job's run. Returns false if it is not waiting.
    pub fn release(&self, job_id: &JobId, outcome: Outcome) -> bool {
        match self.gates.lock().remove(job_id) {
            Some(gate) => gate.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn succeed(&self, job_id: &JobId) -> bool {
        self.release(job_id, Ok(None))
    }

    pub fn fail(&self, job_id: &JobId, message: &str) -> bool {
        self.release(job_id, Err(message.to_string()))
    }

    /// A run for the job has started and is still being awaited.
    pub fn is_waiting(&self, job_id: &JobId) -> bool {
        self.gates
            .lock()
            .get(job_id)
            .is_some_and(|gate| !gate.is_closed())
    }

    /// Number of runs currently being awaited.
    pub fn in_flight(&self) -> usize {
        self.gates.lock().values().filter(|gate| !gate.is_closed()).count()
    }

    /// Jobs in the order their runs started.
    pub fn started(&self) -> Vec<JobId> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl StageBackend for GatedBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, BackendError> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(ctx.job.id.clone(), tx);
        self.started.lock().push(ctx.job.id.clone());

        match rx.await {
            Ok(Ok(location)) => Ok(StageOutput { location }),
            Ok(Err(message)) => Err(BackendError::Other(message)),
            Err(_) => Err(BackendError::Cancelled),
        }
    }
}

/// Backend that finishes immediately, leaving a file in the work directory.
pub struct InstantBackend {
    name: &'static str,
    failure: Option<&'static str>,
    calls: Mutex<Vec<JobId>>,
}

impl InstantBackend {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            failure: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &'static str, message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            failure: Some(message),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<JobId> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StageBackend for InstantBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutput, BackendError> {
        self.calls.lock().push(ctx.job.id.clone());
        if let Some(message) = self.failure {
            return Err(BackendError::Other(message.to_string()));
        }

        let artifact = ctx.job.work_dir.join(format!("{}.out", ctx.stage));
        tokio::fs::write(&artifact, ctx.job.source.as_bytes()).await?;
        Ok(StageOutput::at(format!("{}://{}", self.name, ctx.job.id)))
    }
}

/// Notifier that keeps every notice for inspection.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<CompletionNotice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<CompletionNotice> {
        self.notices.lock().clone()
    }

    pub fn notified(&self, job_id: &JobId) -> bool {
        self.notices.lock().iter().any(|n| &n.job_id == job_id)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: &CompletionNotice) -> Result<(), NotifyError> {
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}

/// One backend per stage, so tests can mix gated and instant stages.
pub struct StageBackends {
    pub download: Arc<dyn StageBackend>,
    pub compression: Arc<dyn StageBackend>,
    pub decompression: Arc<dyn StageBackend>,
    pub upload: Arc<dyn StageBackend>,
}

impl StageBackends {
    pub fn instant() -> Self {
        Self {
            download: InstantBackend::new("fake-dl"),
            compression: InstantBackend::new("fake-tar"),
            decompression: InstantBackend::new("fake-untar"),
            upload: InstantBackend::new("fake-up"),
        }
    }

    fn registry(self) -> BackendRegistry {
        BackendRegistry::new()
            .with_downloader(DOWNLOADER, self.download)
            .with_uploader(UPLOADER, self.upload)
            .with_compressor(self.compression)
            .with_decompressor(self.decompression)
    }
}

/// A running orchestrator with its listener, work root and event log.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub transport: StatusTransport,
    pub notifier: Arc<RecordingNotifier>,
    events: Arc<Mutex<Vec<StatusEvent>>>,
    listener: Option<ListenerHandle>,
    work_root: TempDir,
}

impl Harness {
    pub fn start(capacities: StageCapacities, backends: StageBackends) -> Self {
        let work_root = tempfile::tempdir().expect("Failed to create work root");
        let notifier = Arc::new(RecordingNotifier::default());
        let (transport, listener) = status_channel();

        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                work_root: work_root.path().to_path_buf(),
                capacities,
            },
            transport.clone(),
            backends.registry(),
            notifier.clone(),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(collect_events(orchestrator.subscribe(), events.clone()));
        let listener = listener.start(Arc::new(orchestrator.clone()));

        Self {
            orchestrator,
            transport,
            notifier,
            events,
            listener: Some(listener),
            work_root,
        }
    }

    pub async fn submit(&self, fixture: &JobFixture) -> JobId {
        self.orchestrator
            .submit(fixture.request())
            .await
            .unwrap_or_else(|e| panic!("Failed to submit {}: {e}", fixture.description))
    }

    pub fn work_dir(&self, job_id: &JobId) -> PathBuf {
        self.work_root.path().join(job_id.as_str())
    }

    /// Every status applied for the job, in order.
    pub fn statuses(&self, job_id: &JobId) -> Vec<JobStatus> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.job_id == job_id)
            .map(|e| e.status)
            .collect()
    }

    pub fn saw(&self, job_id: &JobId, status: JobStatus) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| &e.job_id == job_id && e.status == status)
    }

    pub async fn wait_for(&self, job_id: &JobId, status: JobStatus) {
        wait_until(&format!("{job_id} to reach {status}"), || self.saw(job_id, status)).await;
    }

    pub async fn wait_removed(&self, job_id: &JobId) {
        wait_until(&format!("{job_id} to be removed"), || {
            self.orchestrator.job(job_id).is_none()
        })
        .await;
    }

    pub fn active(&self, stage: Stage) -> usize {
        self.orchestrator.stage_stats(stage).active
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.orchestrator.clone(), self.transport.clone())
    }

    pub async fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop().await;
        }
    }
}

async fn collect_events(
    mut rx: broadcast::Receiver<StatusEvent>,
    events: Arc<Mutex<Vec<StatusEvent>>>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => events.lock().push(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                println!("  ! event collector skipped {skipped} events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
