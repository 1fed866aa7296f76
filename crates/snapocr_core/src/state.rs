use std::fmt;
use std::path::{Path, PathBuf};

use crate::view_model::{RowView, StatusCounts, TableViewModel};

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowStatus {
    Pending,
    Processing,
    Success,
    NoContent,
    Error,
    UserStopped,
}

impl RowStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RowStatus::Pending | RowStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Pending => "pending",
            RowStatus::Processing => "processing",
            RowStatus::Success => "success",
            RowStatus::NoContent => "no_content",
            RowStatus::Error => "error",
            RowStatus::UserStopped => "user_stopped",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Processing parameters chosen by the user for the next batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchParams {
    pub model: Option<String>,
    pub output_dir: PathBuf,
    pub format: String,
    pub max_concurrency: usize,
}

/// A row that finished successfully in an earlier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRow {
    pub source: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Row {
    pub(crate) source: PathBuf,
    pub(crate) status: RowStatus,
    pub(crate) message: String,
    pub(crate) progress: u8,
}

impl Row {
    fn pending(source: PathBuf) -> Self {
        Self {
            source,
            status: RowStatus::Pending,
            message: String::new(),
            progress: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppState {
    rows: Vec<Row>,
    session: SessionState,
    active_job: Option<JobId>,
    last_error: Option<String>,
    dirty: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> SessionState {
        self.session
    }

    pub fn active_job(&self) -> Option<JobId> {
        self.active_job
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn view(&self) -> TableViewModel {
        let mut counts = StatusCounts::default();
        let rows = self
            .rows
            .iter()
            .enumerate()
            .map(|(slot, row)| {
                counts.add(row.status);
                RowView {
                    slot,
                    source: row.source.display().to_string(),
                    status: row.status,
                    message: row.message.clone(),
                    progress: row.progress,
                }
            })
            .collect();
        TableViewModel {
            session: self.session,
            active_job: self.active_job,
            rows,
            counts,
            last_error: self.last_error.clone(),
            dirty: self.dirty,
        }
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Successful rows, for persisting between runs.
    pub fn completed_rows(&self) -> Vec<CompletedRow> {
        self.rows
            .iter()
            .filter(|row| row.status == RowStatus::Success)
            .map(|row| CompletedRow {
                source: row.source.clone(),
                message: row.message.clone(),
            })
            .collect()
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn contains(&self, source: &Path) -> bool {
        self.rows.iter().any(|row| row.source == source)
    }

    /// Appends rows for new sources; returns how many were added.
    pub(crate) fn add_sources(&mut self, sources: Vec<PathBuf>) -> usize {
        let mut added = 0;
        for source in sources {
            if self.contains(&source) {
                continue;
            }
            self.rows.push(Row::pending(source));
            added += 1;
        }
        if added > 0 {
            self.mark_dirty();
        }
        added
    }

    pub(crate) fn restore(&mut self, completed: Vec<CompletedRow>) {
        for entry in completed {
            match self.rows.iter_mut().find(|row| row.source == entry.source) {
                Some(row) => {
                    row.status = RowStatus::Success;
                    row.message = entry.message;
                    row.progress = 100;
                }
                None => self.rows.push(Row {
                    source: entry.source,
                    status: RowStatus::Success,
                    message: entry.message,
                    progress: 100,
                }),
            }
        }
        self.mark_dirty();
    }

    /// Resets every row that has not succeeded to pending and returns the
    /// sources with their display slots.
    pub(crate) fn prepare_start(&mut self) -> (Vec<PathBuf>, Vec<usize>) {
        let mut inputs = Vec::new();
        let mut slots = Vec::new();
        for (slot, row) in self.rows.iter_mut().enumerate() {
            if row.status == RowStatus::Success {
                continue;
            }
            row.status = RowStatus::Pending;
            row.message.clear();
            row.progress = 0;
            inputs.push(row.source.clone());
            slots.push(slot);
        }
        (inputs, slots)
    }

    pub(crate) fn begin_session(&mut self) {
        self.session = SessionState::Running;
        self.active_job = None;
        self.last_error = None;
        self.mark_dirty();
    }

    pub(crate) fn bind_job(&mut self, job_id: JobId) {
        self.active_job = Some(job_id);
        self.mark_dirty();
    }

    pub(crate) fn request_stop(&mut self) {
        self.session = SessionState::Stopping;
        self.mark_dirty();
    }

    fn accepts(&self, job_id: JobId) -> bool {
        self.active_job == Some(job_id)
    }

    pub(crate) fn apply_progress(&mut self, job_id: JobId, slot: usize, current: u32, total: u32) {
        if !self.accepts(job_id) {
            return;
        }
        let Some(row) = self.rows.get_mut(slot) else {
            return;
        };
        if row.status.is_terminal() {
            return;
        }
        let percent = if total == 0 {
            0
        } else {
            (u64::from(current.min(total)) * 100 / u64::from(total)) as u8
        };
        if row.progress != percent {
            row.progress = percent;
            self.mark_dirty();
        }
    }

    pub(crate) fn apply_item(
        &mut self,
        job_id: JobId,
        slot: usize,
        status: RowStatus,
        message: String,
    ) {
        if !self.accepts(job_id) {
            return;
        }
        let Some(row) = self.rows.get_mut(slot) else {
            return;
        };
        if row.status == RowStatus::UserStopped {
            return;
        }
        if row.status.is_terminal() && !status.is_terminal() {
            return;
        }
        row.status = status;
        row.message = message;
        if status.is_terminal() && status != RowStatus::UserStopped {
            row.progress = 100;
        }
        self.mark_dirty();
    }

    pub(crate) fn finish_job(&mut self, job_id: JobId, stopped: bool) {
        if !self.accepts(job_id) {
            return;
        }
        if stopped {
            for row in self.rows.iter_mut().filter(|row| !row.status.is_terminal()) {
                row.status = RowStatus::UserStopped;
                row.message = "stopped by user".to_string();
            }
        }
        self.session = SessionState::Idle;
        self.active_job = None;
        self.mark_dirty();
    }

    pub(crate) fn reject_start(&mut self, reason: String) {
        self.session = SessionState::Idle;
        self.active_job = None;
        self.last_error = Some(reason);
        self.mark_dirty();
    }

    pub(crate) fn clear_completed(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.status != RowStatus::Success);
        let removed = before - self.rows.len();
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }
}
