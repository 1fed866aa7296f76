use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use snapocr_core::{
    update, AppState, BatchParams, CompletedRow, Effect, Msg, RowStatus, TableViewModel,
};
use snapocr_engine::{
    BatchEvent, BatchJob, BatchMode, Coordinator, ExportFormat, ItemStatus, JobError,
};
use snapocr_logging::{ocr_info, ocr_warn};

use crate::persistence::{load_completed_rows, save_completed_rows};
use crate::render::{summary_line, ConsoleRenderer};

const EVENT_WAIT: Duration = Duration::from_millis(100);

/// Executes core effects against the coordinator and turns engine events
/// into core messages.
pub struct EffectRunner {
    coordinator: Coordinator,
    mode: BatchMode,
}

impl EffectRunner {
    pub fn new(coordinator: Coordinator, mode: BatchMode) -> Self {
        Self { coordinator, mode }
    }

    /// Runs `effects` and returns the messages they produce immediately.
    pub fn enqueue(&mut self, effects: Vec<Effect>) -> Vec<Msg> {
        let mut replies = Vec::new();
        for effect in effects {
            match effect {
                Effect::StartBatch {
                    inputs,
                    row_indices,
                    params,
                } => {
                    ocr_info!(
                        "StartBatch mode={} inputs={} format={} concurrency={}",
                        self.mode.as_str(),
                        inputs.len(),
                        params.format,
                        params.max_concurrency
                    );
                    replies.push(self.start(inputs, row_indices, params));
                }
                Effect::StopBatch => self.coordinator.stop(),
            }
        }
        replies
    }

    fn start(&mut self, inputs: Vec<PathBuf>, row_indices: Vec<usize>, params: BatchParams) -> Msg {
        let job = match build_job(self.mode, inputs, row_indices, params) {
            Ok(job) => job,
            Err(err) => {
                ocr_warn!("Batch rejected: {}", err);
                return Msg::BatchRejected {
                    reason: err.to_string(),
                };
            }
        };
        match self.coordinator.process(job) {
            Ok(worker) => Msg::BatchStarted {
                job_id: self.coordinator.start(worker),
            },
            Err(err) => {
                ocr_warn!("Batch rejected: {}", err);
                Msg::BatchRejected {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Waits up to `wait` for the next engine event.
    pub fn next_msg(&self, wait: Duration) -> Option<Msg> {
        self.coordinator.recv_timeout(wait).map(map_event)
    }
}

fn build_job(
    mode: BatchMode,
    inputs: Vec<PathBuf>,
    row_indices: Vec<usize>,
    params: BatchParams,
) -> Result<BatchJob, JobError> {
    let job = BatchJob::new(
        mode,
        inputs,
        params.output_dir,
        ExportFormat::from_label(&params.format),
        params.max_concurrency,
        row_indices,
    )?;
    Ok(match params.model {
        Some(model) => job.with_model(model),
        None => job,
    })
}

pub fn map_event(event: BatchEvent) -> Msg {
    match event {
        BatchEvent::Progress {
            job_id,
            display_slot,
            current,
            total,
        } => Msg::ItemProgress {
            job_id,
            slot: display_slot,
            current,
            total,
        },
        BatchEvent::Item { job_id, result } => Msg::ItemUpdated {
            job_id,
            slot: result.display_slot,
            status: map_status(result.status),
            message: result.message,
        },
        BatchEvent::Finished { job_id } => Msg::BatchFinished { job_id },
        BatchEvent::Stopped { job_id } => Msg::BatchStopped { job_id },
    }
}

fn map_status(status: ItemStatus) -> RowStatus {
    match status {
        ItemStatus::Pending => RowStatus::Pending,
        ItemStatus::Processing => RowStatus::Processing,
        ItemStatus::Success => RowStatus::Success,
        ItemStatus::NoContent => RowStatus::NoContent,
        ItemStatus::Error => RowStatus::Error,
        ItemStatus::UserStopped => RowStatus::UserStopped,
    }
}

/// One `snapocr batch` invocation.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub inputs: Vec<PathBuf>,
    pub params: BatchParams,
    /// Reprocess sources recorded as completed by earlier runs.
    pub force: bool,
}

/// Drives the table state machine until the batch ends, printing status
/// changes through `emit`. `stop_requested` is polled between events.
pub fn run_batch(
    runner: &mut EffectRunner,
    request: BatchRequest,
    stop_requested: &AtomicBool,
    emit: &mut dyn FnMut(&str),
) -> TableViewModel {
    let output_dir = request.params.output_dir.clone();
    let previous = load_completed_rows(&output_dir);
    let touched = request.inputs.clone();

    let mut state = AppState::new();
    let mut renderer = ConsoleRenderer::new();
    let mut inbox = VecDeque::from([Msg::FilesAdded(request.inputs)]);
    if !request.force {
        let restored: Vec<CompletedRow> = previous
            .iter()
            .filter(|row| touched.contains(&row.source))
            .cloned()
            .collect();
        if !restored.is_empty() {
            inbox.push_back(Msg::RestoreCompleted(restored));
        }
    }
    inbox.push_back(Msg::StartClicked(request.params));

    let mut started = false;
    let mut stop_sent = false;
    loop {
        while let Some(msg) = inbox.pop_front() {
            if matches!(msg, Msg::BatchStarted { .. }) {
                started = true;
            }
            let (next, effects) = update(std::mem::take(&mut state), msg);
            state = next;
            inbox.extend(runner.enqueue(effects));
            if state.consume_dirty() {
                for line in renderer.render(&state.view()) {
                    emit(&line);
                }
            }
        }

        if !started || state.active_job().is_none() {
            break;
        }
        if !stop_sent && stop_requested.load(Ordering::SeqCst) {
            stop_sent = true;
            inbox.push_back(Msg::StopClicked);
            continue;
        }
        inbox.push_back(runner.next_msg(EVENT_WAIT).unwrap_or(Msg::Tick));
    }

    if !started && state.view().last_error.is_none() {
        emit("nothing to process: every file already succeeded (use --force to redo)");
    }
    let view = state.view();
    emit(&summary_line(&view));

    save_completed_rows(&output_dir, &merge_completed(previous, &touched, state.completed_rows()));
    view
}

/// Current successes plus earlier ones for sources this run did not touch.
fn merge_completed(
    previous: Vec<CompletedRow>,
    touched: &[PathBuf],
    current: Vec<CompletedRow>,
) -> Vec<CompletedRow> {
    let mut merged: Vec<CompletedRow> = previous
        .into_iter()
        .filter(|old| !touched.contains(&old.source))
        .filter(|old| !current.iter().any(|row| row.source == old.source))
        .collect();
    merged.extend(current);
    merged
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use snapocr_engine::{
        BatchSettings, CancellationToken, FileExporter, ItemResult, OcrClient, OcrDocument,
        OcrError, OcrRequest, OcrResponse,
    };

    use super::*;

    struct CountingClient {
        calls: AtomicUsize,
        hang: bool,
    }

    #[async_trait::async_trait]
    impl OcrClient for CountingClient {
        async fn recognize(
            &self,
            _request: OcrRequest<'_>,
            cancel: &CancellationToken,
        ) -> OcrResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                cancel.cancelled().await;
                return Err(OcrError::cancelled());
            }
            Ok(OcrDocument {
                lines: vec!["recognized".to_string()],
                ..OcrDocument::default()
            })
        }
    }

    fn runner(runtime: &tokio::runtime::Runtime, client: Arc<CountingClient>) -> EffectRunner {
        let coordinator = Coordinator::new(
            runtime.handle().clone(),
            client,
            Arc::new(FileExporter::new()),
            BatchSettings {
                submit_delay: Duration::from_millis(5),
                slow_task_grace: Duration::from_millis(5),
                poll_interval: Duration::from_millis(5),
            },
        );
        EffectRunner::new(coordinator, BatchMode::Images)
    }

    fn inputs(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                fs::write(&path, b"image").expect("write input");
                path
            })
            .collect()
    }

    fn request(inputs: Vec<PathBuf>, out: &Path, force: bool) -> BatchRequest {
        BatchRequest {
            inputs,
            params: BatchParams {
                model: None,
                output_dir: out.to_path_buf(),
                format: "txt".to_string(),
                max_concurrency: 2,
            },
            force,
        }
    }

    fn client(hang: bool) -> Arc<CountingClient> {
        Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            hang,
        })
    }

    #[test]
    fn batch_runs_to_completion_and_resumes() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out");
        let files = inputs(dir.path(), &["one.png", "two.png"]);
        let client = client(false);
        let mut runner = runner(&runtime, client.clone());
        let never = AtomicBool::new(false);
        let mut lines = Vec::new();

        let view = run_batch(
            &mut runner,
            request(files.clone(), &out, false),
            &never,
            &mut |line: &str| lines.push(line.to_string()),
        );

        assert_eq!(view.counts.success, 2);
        assert!(out.join("one.txt").is_file());
        assert!(out.join("two.txt").is_file());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert!(lines.iter().any(|line| line.starts_with("done 2/2")));

        // Second run skips what already succeeded.
        let view = run_batch(
            &mut runner,
            request(files.clone(), &out, false),
            &never,
            &mut |_: &str| {},
        );
        assert_eq!(view.counts.success, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);

        let view = run_batch(&mut runner, request(files, &out, true), &never, &mut |_: &str| {});
        assert_eq!(view.counts.success, 2);
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn earlier_sources_outside_this_run_are_kept_but_not_shown() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out");
        let first = inputs(dir.path(), &["a.png"]);
        let second = inputs(dir.path(), &["b.png"]);
        let mut runner = runner(&runtime, client(false));
        let never = AtomicBool::new(false);

        run_batch(&mut runner, request(first.clone(), &out, false), &never, &mut |_: &str| {});
        let mut lines = Vec::new();
        let view = run_batch(
            &mut runner,
            request(second.clone(), &out, false),
            &never,
            &mut |line: &str| lines.push(line.to_string()),
        );

        assert_eq!(view.rows.len(), 1);
        assert_eq!(view.counts.success, 1);
        assert_eq!(view.counts.total(), 1);
        assert!(lines.iter().any(|line| line.starts_with("done 1/1")));

        let saved: Vec<PathBuf> = load_completed_rows(&out)
            .into_iter()
            .map(|row| row.source)
            .collect();
        assert_eq!(saved, vec![first[0].clone(), second[0].clone()]);
    }

    #[test]
    fn stop_request_marks_rows_user_stopped() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("out");
        let files = inputs(dir.path(), &["a.png", "b.png", "c.png"]);
        let mut runner = runner(&runtime, client(true));
        let stop = AtomicBool::new(true);

        let view = run_batch(&mut runner, request(files, &out, false), &stop, &mut |_: &str| {});

        assert_eq!(view.counts.user_stopped, 3);
        assert!(view.active_job.is_none());
        assert!(load_completed_rows(&out).is_empty());
    }

    #[test]
    fn invalid_concurrency_is_rejected() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let dir = tempfile::tempdir().expect("tempdir");
        let files = inputs(dir.path(), &["a.png"]);
        let mut runner = runner(&runtime, client(false));
        let mut req = request(files, &dir.path().join("out"), false);
        req.params.max_concurrency = 0;

        let view = run_batch(&mut runner, req, &AtomicBool::new(false), &mut |_: &str| {});

        assert!(view.last_error.is_some());
        assert_eq!(view.counts.pending, 1);
    }

    #[test]
    fn events_map_onto_messages() {
        let msg = map_event(BatchEvent::Item {
            job_id: 3,
            result: ItemResult {
                index: 0,
                display_slot: 5,
                status: ItemStatus::NoContent,
                message: "no text recognized".to_string(),
            },
        });
        assert_eq!(
            msg,
            Msg::ItemUpdated {
                job_id: 3,
                slot: 5,
                status: RowStatus::NoContent,
                message: "no text recognized".to_string(),
            }
        );
        assert_eq!(map_event(BatchEvent::Stopped { job_id: 3 }), Msg::BatchStopped { job_id: 3 });
    }

    #[test]
    fn merge_replaces_records_of_reprocessed_sources() {
        let row = |source: &str, message: &str| CompletedRow {
            source: PathBuf::from(source),
            message: message.to_string(),
        };
        let merged = merge_completed(
            vec![row("a.png", "old"), row("b.png", "old"), row("c.png", "old")],
            &[PathBuf::from("a.png"), PathBuf::from("c.png")],
            vec![row("a.png", "new")],
        );
        // c.png was reprocessed without success, so its old record goes.
        assert_eq!(merged, vec![row("b.png", "old"), row("a.png", "new")]);
    }
}
