use std::sync::{mpsc, Arc};
use std::time::Duration;

use snapocr_logging::ocr_info;
use thiserror::Error;
use tokio::runtime::Handle;

use crate::events::ChannelEventSink;
use crate::export::Exporter;
use crate::ocr::OcrClient;
use crate::worker::{BatchJob, BatchSettings, BatchWorker, WorkerHandle};
use crate::{BatchEvent, JobId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("job {job_id} is still running; stop it and wait for its terminal event first")]
    JobActive { job_id: JobId },
}

struct ActiveJob {
    handle: WorkerHandle,
    started: bool,
}

/// Owns at most one batch job at a time and the channel its events arrive on.
pub struct Coordinator {
    runtime: Handle,
    client: Arc<dyn OcrClient>,
    exporter: Arc<dyn Exporter>,
    settings: BatchSettings,
    event_tx: mpsc::Sender<BatchEvent>,
    event_rx: mpsc::Receiver<BatchEvent>,
    next_job_id: JobId,
    current: Option<ActiveJob>,
}

impl Coordinator {
    pub fn new(
        runtime: Handle,
        client: Arc<dyn OcrClient>,
        exporter: Arc<dyn Exporter>,
        settings: BatchSettings,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        Self {
            runtime,
            client,
            exporter,
            settings,
            event_tx,
            event_rx,
            next_job_id: 1,
            current: None,
        }
    }

    /// Builds a worker for `job` without starting it. The new worker replaces
    /// the held one unless that one is still running.
    pub fn process(&mut self, job: BatchJob) -> Result<BatchWorker, CoordinatorError> {
        if let Some(active) = &self.current {
            if active.started && !active.handle.phase().is_terminal() {
                return Err(CoordinatorError::JobActive {
                    job_id: active.handle.job_id(),
                });
            }
        }
        let job_id = self.next_job_id;
        self.next_job_id += 1;
        let sink = Arc::new(ChannelEventSink::new(self.event_tx.clone()));
        let worker = BatchWorker::new(
            job_id,
            job,
            self.client.clone(),
            self.exporter.clone(),
            sink,
            self.settings.clone(),
        );
        self.current = Some(ActiveJob {
            handle: worker.handle(),
            started: false,
        });
        Ok(worker)
    }

    /// Spawns the worker on the runtime and returns immediately.
    pub fn start(&mut self, worker: BatchWorker) -> JobId {
        let job_id = worker.job_id();
        match &mut self.current {
            Some(active) if active.handle.job_id() == job_id => active.started = true,
            _ => {
                self.current = Some(ActiveJob {
                    handle: worker.handle(),
                    started: true,
                });
            }
        }
        ocr_info!("job {}: handed to runtime", job_id);
        self.runtime.spawn(worker.run());
        job_id
    }

    /// Requests cancellation of the held job. Idempotent; does not wait.
    pub fn stop(&self) {
        if let Some(active) = &self.current {
            active.handle.stop();
        }
    }

    /// Whether the held job was started and has not emitted its terminal event.
    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|active| active.started && !active.handle.phase().is_terminal())
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.current.as_ref().map(|active| active.handle.job_id())
    }

    pub fn try_recv(&self) -> Option<BatchEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<BatchEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}
