//! Self-addressed status channel.
//!
//! Emitting a status change only enqueues it. A dispatcher task takes events
//! one at a time and runs the handler for each on a freshly spawned task,
//! waiting for it to finish before taking the next event. Handlers therefore
//! never run on the emitter's stack, they run exactly once per event, and
//! they never overlap.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{JobId, JobStatus, StatusEvent};

/// Receives every event delivered by the transport.
#[async_trait]
pub trait StatusHandler: Send + Sync + 'static {
    async fn handle_status(&self, event: StatusEvent);
}

/// Create a connected emitter / listener pair.
pub fn status_channel() -> (StatusTransport, StatusListener) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StatusTransport { tx }, StatusListener { rx })
}

/// Emitting side of the status channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusTransport {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusTransport {
    /// Fire-and-forget. If the listener has stopped the event is lost.
    pub fn emit(&self, job_id: &JobId, status: JobStatus) {
        self.send(StatusEvent::new(job_id.clone(), status));
    }

    pub fn emit_with_detail(&self, job_id: &JobId, status: JobStatus, detail: Option<String>) {
        let mut event = StatusEvent::new(job_id.clone(), status);
        event.detail = detail;
        self.send(event);
    }

    pub fn send(&self, event: StatusEvent) {
        debug!(job_id = %event.job_id, status = %event.status, "Emitting status");
        if let Err(e) = self.tx.send(event) {
            let event = e.0;
            warn!(
                job_id = %event.job_id,
                status = %event.status,
                "Status listener is not running, event lost"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of the status channel, consumed by `start`.
pub struct StatusListener {
    rx: mpsc::UnboundedReceiver<StatusEvent>,
}

impl StatusListener {
    /// Spawn the dispatcher. Events emitted before this point are buffered.
    pub fn start<H: StatusHandler>(self, handler: Arc<H>) -> ListenerHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let mut rx = self.rx;

        let task = tokio::spawn(async move {
            info!("Status listener started");
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                let job_id = event.job_id.clone();
                let status = event.status;
                let handler = handler.clone();
                let run = tokio::spawn(async move { handler.handle_status(event).await });
                if let Err(e) = run.await {
                    error!(
                        job_id = %job_id,
                        status = %status,
                        error = %e,
                        "Status handler failed"
                    );
                }
            }
            rx.close();
            info!("Status listener stopped");
        });

        ListenerHandle { shutdown, task }
    }
}

/// Running dispatcher. Dropping it leaves the dispatcher running.
pub struct ListenerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop after the event currently being handled, if any.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Status listener task failed");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<StatusEvent>>,
        in_flight: Mutex<usize>,
        overlapped: Mutex<bool>,
    }

    #[async_trait]
    impl StatusHandler for Recorder {
        async fn handle_status(&self, event: StatusEvent) {
            {
                let mut in_flight = self.in_flight.lock();
                *in_flight += 1;
                if *in_flight > 1 {
                    *self.overlapped.lock() = true;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            if event.job_id.as_str() == "boom" {
                *self.in_flight.lock() -= 1;
                panic!("handler blew up");
            }
            self.seen.lock().push(event);
            *self.in_flight.lock() -= 1;
        }
    }

    async fn wait_for(recorder: &Recorder, count: usize) {
        for _ in 0..500 {
            if recorder.seen.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} events");
    }

    #[tokio::test]
    async fn test_events_delivered_in_order_without_overlap() {
        let (transport, listener) = status_channel();
        let recorder = Arc::new(Recorder::default());
        let handle = listener.start(recorder.clone());

        let id = JobId::from("j1");
        transport.emit(&id, JobStatus::Queued(Stage::Download));
        transport.emit(&id, JobStatus::Active(Stage::Download));
        transport.emit(&id, JobStatus::Progressing(Stage::Download));

        wait_for(&recorder, 3).await;
        let statuses: Vec<_> = recorder.seen.lock().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Queued(Stage::Download),
                JobStatus::Active(Stage::Download),
                JobStatus::Progressing(Stage::Download),
            ]
        );
        assert!(!*recorder.overlapped.lock());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_emit_returns_before_handler_runs() {
        let (transport, listener) = status_channel();
        let recorder = Arc::new(Recorder::default());

        // Buffered until the listener starts
        transport.emit(&JobId::from("j1"), JobStatus::Cancelled);
        assert!(recorder.seen.lock().is_empty());

        let handle = listener.start(recorder.clone());
        wait_for(&recorder, 1).await;
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_listener_survives_panicking_handler() {
        let (transport, listener) = status_channel();
        let recorder = Arc::new(Recorder::default());
        let handle = listener.start(recorder.clone());

        transport.emit(&JobId::from("boom"), JobStatus::Cancelled);
        transport.emit(&JobId::from("j2"), JobStatus::Cancelled);

        wait_for(&recorder, 1).await;
        assert_eq!(recorder.seen.lock()[0].job_id, JobId::from("j2"));
        assert!(handle.is_running());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_emit_after_stop_is_lost() {
        let (transport, listener) = status_channel();
        let recorder = Arc::new(Recorder::default());
        let handle = listener.start(recorder.clone());
        handle.stop().await;

        assert!(transport.is_closed());
        transport.emit(&JobId::from("j1"), JobStatus::Cancelled);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(recorder.seen.lock().is_empty());
    }
}
