//! Bounded-concurrency batch pipeline.
//!
//! A [`BatchWorker`] submits one task per input to a semaphore-bounded pool,
//! throttling submissions, then drains the pool with short interruptible
//! polls. Every per-item event goes through a [`Ledger`] so that once the
//! cancellation token is set no open item can emit anything but
//! `user_stopped`, and a terminal item is never overwritten.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use snapocr_logging::{clip, ocr_debug, ocr_error, ocr_info, ocr_warn};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MAX_CONCURRENCY;
use crate::events::EventSink;
use crate::export::{ExportFormat, ExportRequest, Exporter};
use crate::filename::assign_output_stems;
use crate::ocr::{OcrClient, OcrRequest};
use crate::persist::ensure_output_dir;
use crate::{BatchEvent, BatchMode, InputKind, ItemResult, ItemStatus, JobId};

/// Raw response text appended to an item's error message is cut to this many chars.
const RAW_SNIPPET_CHARS: usize = 200;
const STOPPED_MESSAGE: &str = "stopped by user";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("row_indices has {rows} entries for {inputs} inputs")]
    RowIndexMismatch { inputs: usize, rows: usize },
    #[error("max_concurrency must be within 1..=20, got {0}")]
    Concurrency(usize),
    #[error("no inputs to process")]
    NoInputs,
}

/// Parameters of one batch run.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub mode: BatchMode,
    pub inputs: Vec<PathBuf>,
    pub model_override: Option<String>,
    pub output_dir: PathBuf,
    pub export_format: ExportFormat,
    pub max_concurrency: usize,
    /// Display slot of each input; identity when constructed with an empty list.
    pub row_indices: Vec<usize>,
}

impl BatchJob {
    pub fn new(
        mode: BatchMode,
        inputs: Vec<PathBuf>,
        output_dir: PathBuf,
        export_format: ExportFormat,
        max_concurrency: usize,
        row_indices: Vec<usize>,
    ) -> Result<Self, JobError> {
        if inputs.is_empty() {
            return Err(JobError::NoInputs);
        }
        if !(1..=MAX_CONCURRENCY).contains(&max_concurrency) {
            return Err(JobError::Concurrency(max_concurrency));
        }
        let row_indices = if row_indices.is_empty() {
            (0..inputs.len()).collect()
        } else if row_indices.len() == inputs.len() {
            row_indices
        } else {
            return Err(JobError::RowIndexMismatch {
                inputs: inputs.len(),
                rows: row_indices.len(),
            });
        };
        Ok(Self {
            mode,
            inputs,
            model_override: None,
            output_dir,
            export_format,
            max_concurrency,
            row_indices,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model_override = if model.is_empty() { None } else { Some(model) };
        self
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Timings of the submission and drain loops.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Minimum spacing between consecutive submissions.
    pub submit_delay: Duration,
    /// Extra wait for the previous task when it is still running after `submit_delay`.
    pub slow_task_grace: Duration,
    /// Granularity of every wait in the coordinating task.
    pub poll_interval: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            submit_delay: Duration::from_secs(2),
            slow_task_grace: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Submitting,
    Draining,
    Terminating,
    Finished,
    Stopped,
}

impl WorkerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerPhase::Finished | WorkerPhase::Stopped)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LedgerState {
    statuses: Vec<ItemStatus>,
    closed: bool,
}

/// Single writer of a job's events. Checking and emitting happen under one
/// lock, so a write refused here can never race with a stop marker.
struct Ledger {
    job_id: JobId,
    slots: Vec<usize>,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
    state: Mutex<LedgerState>,
}

impl Ledger {
    fn new(
        job_id: JobId,
        slots: Vec<usize>,
        cancel: CancellationToken,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let statuses = vec![ItemStatus::Pending; slots.len()];
        Self {
            job_id,
            slots,
            cancel,
            sink,
            state: Mutex::new(LedgerState {
                statuses,
                closed: false,
            }),
        }
    }

    fn accepts(&self, state: &LedgerState, index: usize, status: ItemStatus) -> bool {
        if state.closed || state.statuses[index].is_terminal() {
            return false;
        }
        status == ItemStatus::UserStopped || !self.cancel.is_cancelled()
    }

    fn emit_item(&self, index: usize, status: ItemStatus, message: String) {
        self.sink.emit(BatchEvent::Item {
            job_id: self.job_id,
            result: ItemResult {
                index,
                display_slot: self.slots[index],
                status,
                message,
            },
        });
    }

    fn emit_progress(&self, index: usize, current: u32) {
        self.sink.emit(BatchEvent::Progress {
            job_id: self.job_id,
            display_slot: self.slots[index],
            current,
            total: 100,
        });
    }

    /// Marks an item as picked up by a task.
    fn start(&self, index: usize) -> bool {
        let mut state = lock(&self.state);
        if !self.accepts(&state, index, ItemStatus::Processing) {
            return false;
        }
        state.statuses[index] = ItemStatus::Processing;
        self.emit_item(index, ItemStatus::Processing, "processing".to_string());
        self.emit_progress(index, 50);
        true
    }

    /// Writes an item's terminal status. Returns whether the write was accepted.
    fn finish(&self, index: usize, status: ItemStatus, message: String) -> bool {
        let mut state = lock(&self.state);
        if !self.accepts(&state, index, status) {
            return false;
        }
        state.statuses[index] = status;
        if status != ItemStatus::UserStopped {
            self.emit_progress(index, 100);
        }
        self.emit_item(index, status, message);
        true
    }

    /// Marks every open item from `from` onwards as `user_stopped`.
    fn stop_open(&self, from: usize) -> usize {
        let mut state = lock(&self.state);
        if state.closed {
            return 0;
        }
        let mut marked = 0;
        for index in from..state.statuses.len() {
            if !state.statuses[index].is_terminal() {
                state.statuses[index] = ItemStatus::UserStopped;
                self.emit_item(index, ItemStatus::UserStopped, STOPPED_MESSAGE.to_string());
                marked += 1;
            }
        }
        marked
    }

    /// Closes the ledger with a terminal job event; every later write is refused.
    fn close(&self, event: BatchEvent) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.closed = true;
        self.sink.emit(event);
    }

    fn snapshot(&self) -> Vec<ItemStatus> {
        lock(&self.state).statuses.clone()
    }
}

struct Shared {
    phase: Mutex<WorkerPhase>,
    ledger: Ledger,
}

/// Cheap handle for observing and stopping a worker after it moved onto the runtime.
#[derive(Clone)]
pub struct WorkerHandle {
    job_id: JobId,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl WorkerHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Sets the cancellation token. Idempotent and non-blocking.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            ocr_info!("job {}: stop requested", self.job_id);
        }
        self.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn phase(&self) -> WorkerPhase {
        *lock(&self.shared.phase)
    }

    /// Current status of every item, indexed like the job inputs.
    /// Blocks while an event is being emitted; never call it from an
    /// [`EventSink`].
    pub fn item_statuses(&self) -> Vec<ItemStatus> {
        self.shared.ledger.snapshot()
    }
}

#[derive(Debug, Error)]
enum FatalError {
    #[error("cannot prepare output directory {path}: {reason}")]
    OutputDir { path: String, reason: String },
    #[error("task pool closed unexpectedly")]
    PoolClosed,
}

pub struct BatchWorker {
    job_id: JobId,
    job: Arc<BatchJob>,
    client: Arc<dyn OcrClient>,
    exporter: Arc<dyn Exporter>,
    settings: BatchSettings,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl BatchWorker {
    pub fn new(
        job_id: JobId,
        job: BatchJob,
        client: Arc<dyn OcrClient>,
        exporter: Arc<dyn Exporter>,
        sink: Arc<dyn EventSink>,
        settings: BatchSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        let ledger = Ledger::new(job_id, job.row_indices.clone(), cancel.clone(), sink);
        Self {
            job_id,
            job: Arc::new(job),
            client,
            exporter,
            settings,
            cancel,
            shared: Arc::new(Shared {
                phase: Mutex::new(WorkerPhase::Idle),
                ledger,
            }),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job(&self) -> &BatchJob {
        &self.job
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            job_id: self.job_id,
            cancel: self.cancel.clone(),
            shared: self.shared.clone(),
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        *lock(&self.shared.phase)
    }

    fn set_phase(&self, phase: WorkerPhase) {
        ocr_debug!("job {}: phase {:?}", self.job_id, phase);
        *lock(&self.shared.phase) = phase;
    }

    /// Runs the job to completion or cancellation. Emits exactly one
    /// `Finished` or `Stopped` event.
    pub async fn run(self) {
        ocr_info!(
            "job {}: starting {} batch of {} inputs (max_concurrency={}, format={})",
            self.job_id,
            self.job.mode.as_str(),
            self.job.len(),
            self.job.max_concurrency,
            self.job.export_format.label()
        );
        let ledger = &self.shared.ledger;

        let mut outstanding = Vec::new();
        if let Err(err) = self.drive(&mut outstanding).await {
            ocr_error!("job {}: {}", self.job_id, err);
            if !self.cancel.is_cancelled() {
                let message = err.to_string();
                for index in 0..self.job.len() {
                    ledger.finish(index, ItemStatus::Error, message.clone());
                }
            }
        }

        self.set_phase(WorkerPhase::Terminating);
        let stopped = self.cancel.is_cancelled();
        if stopped {
            let marked = ledger.stop_open(0);
            ocr_info!(
                "job {}: stopped; {} items marked user_stopped, {} tasks detached",
                self.job_id,
                marked,
                outstanding.len()
            );
        }
        // Unfinished tasks keep running in the background; the closed ledger keeps them silent.
        drop(outstanding);

        if stopped {
            self.set_phase(WorkerPhase::Stopped);
            ledger.close(BatchEvent::Stopped {
                job_id: self.job_id,
            });
        } else {
            self.set_phase(WorkerPhase::Finished);
            ocr_info!("job {}: finished", self.job_id);
            ledger.close(BatchEvent::Finished {
                job_id: self.job_id,
            });
        }
    }

    async fn drive(
        &self,
        outstanding: &mut Vec<(usize, JoinHandle<()>)>,
    ) -> Result<(), FatalError> {
        self.set_phase(WorkerPhase::Submitting);
        if self.cancel.is_cancelled() {
            self.shared.ledger.stop_open(0);
            return Ok(());
        }
        ensure_output_dir(&self.job.output_dir).map_err(|err| FatalError::OutputDir {
            path: self.job.output_dir.display().to_string(),
            reason: err.to_string(),
        })?;

        let submitted = self.submit_all(outstanding).await?;
        if submitted < self.job.len() {
            let marked = self.shared.ledger.stop_open(submitted);
            ocr_info!(
                "job {}: cancelled after {} submissions; {} unsubmitted items stopped",
                self.job_id,
                submitted,
                marked
            );
        }

        self.set_phase(WorkerPhase::Draining);
        self.drain(outstanding).await;
        Ok(())
    }

    /// Submits items in order until done or cancelled; returns how many were submitted.
    async fn submit_all(
        &self,
        outstanding: &mut Vec<(usize, JoinHandle<()>)>,
    ) -> Result<usize, FatalError> {
        let semaphore = Arc::new(Semaphore::new(self.job.max_concurrency));
        let stems = assign_output_stems(&self.job.inputs);

        for (index, stem) in stems.into_iter().enumerate() {
            if index > 0 {
                let previous_task = outstanding.last().map(|(_, handle)| handle);
                if !self.throttle(previous_task).await {
                    return Ok(index);
                }
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(index),
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| FatalError::PoolClosed)?
                }
            };
            if self.cancel.is_cancelled() {
                return Ok(index);
            }

            ocr_debug!(
                "job {}: submitting item {} ({})",
                self.job_id,
                index,
                self.job.inputs[index].display()
            );
            let task = ItemTask {
                index,
                stem,
                job: self.job.clone(),
                client: self.client.clone(),
                exporter: self.exporter.clone(),
                cancel: self.cancel.clone(),
                shared: self.shared.clone(),
            };
            let handle = tokio::spawn(async move {
                let _permit = permit;
                task.run().await;
            });
            outstanding.push((index, handle));
        }
        Ok(self.job.len())
    }

    /// Waits `submit_delay`, then up to `slow_task_grace` more while the
    /// previous task is still running. Returns false when cancelled.
    async fn throttle(&self, previous: Option<&JoinHandle<()>>) -> bool {
        let window = Instant::now() + self.settings.submit_delay;
        if !self.wait_until(window, None).await {
            return false;
        }
        match previous {
            Some(handle) if !handle.is_finished() => {
                let grace = Instant::now() + self.settings.slow_task_grace;
                self.wait_until(grace, Some(handle)).await
            }
            _ => !self.cancel.is_cancelled(),
        }
    }

    async fn wait_until(&self, deadline: Instant, watch: Option<&JoinHandle<()>>) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            if watch.is_some_and(|handle| handle.is_finished()) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let step = self.settings.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(step) => {}
            }
        }
    }

    /// Polls outstanding tasks until all are done or the token is set.
    /// Finished handles are removed from `outstanding`.
    async fn drain(&self, outstanding: &mut Vec<(usize, JoinHandle<()>)>) {
        loop {
            let mut still_running = Vec::with_capacity(outstanding.len());
            for (index, handle) in outstanding.drain(..) {
                if !handle.is_finished() {
                    still_running.push((index, handle));
                    continue;
                }
                if let Err(err) = handle.await {
                    ocr_warn!("job {}: task for item {} failed: {}", self.job_id, index, err);
                    self.shared.ledger.finish(
                        index,
                        ItemStatus::Error,
                        format!("internal error: {err}"),
                    );
                }
            }
            *outstanding = still_running;

            if outstanding.is_empty() || self.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
    }
}

struct ItemTask {
    index: usize,
    stem: String,
    job: Arc<BatchJob>,
    client: Arc<dyn OcrClient>,
    exporter: Arc<dyn Exporter>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

impl ItemTask {
    async fn run(self) {
        let ledger = &self.shared.ledger;
        let index = self.index;
        if self.cancel.is_cancelled() || !ledger.start(index) {
            return;
        }

        let path = self.job.inputs[index].clone();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                ledger.finish(
                    index,
                    ItemStatus::Error,
                    format!("failed to read {}: {err}", path.display()),
                );
                return;
            }
        };

        if self.cancel.is_cancelled() {
            return;
        }
        let request = OcrRequest {
            bytes: &bytes,
            kind: InputKind::from_path(&path),
            model: self.job.model_override.as_deref(),
            optimize_for_small: false,
        };
        let response = self.client.recognize(request, &self.cancel).await;
        if self.cancel.is_cancelled() {
            return;
        }

        let document = match response {
            Ok(document) => document,
            Err(err) => {
                let mut message = err.message.clone();
                if let Some(raw) = err.raw_response.as_deref().filter(|raw| !raw.is_empty()) {
                    message.push_str(&format!(" | {}", clip(raw, RAW_SNIPPET_CHARS)));
                }
                ocr_warn!("job item {} ({}) failed: {}", index, path.display(), err.kind);
                ledger.finish(index, ItemStatus::Error, message);
                return;
            }
        };

        if !document.has_content() {
            if let Some(debug) = &document.debug_info {
                ocr_debug!("item {} has no content: {}", index, debug);
            }
            ledger.finish(index, ItemStatus::NoContent, "no text recognized".to_string());
            return;
        }

        let request = ExportRequest::from_document(
            path,
            self.job.output_dir.clone(),
            self.stem,
            document,
            self.job.export_format,
        );
        let exporter = self.exporter.clone();
        let exported = tokio::task::spawn_blocking(move || exporter.export(&request)).await;
        if self.cancel.is_cancelled() {
            return;
        }
        match exported {
            Ok(status) => {
                ledger.finish(index, ItemStatus::Success, status);
            }
            Err(err) => {
                ledger.finish(index, ItemStatus::Error, format!("export failed: {err}"));
            }
        }
    }
}
