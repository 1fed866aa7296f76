use std::path::PathBuf;

use crate::{BatchParams, CompletedRow, JobId, RowStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// User picked files for the table.
    FilesAdded(Vec<PathBuf>),
    /// Restore rows that succeeded in an earlier run.
    RestoreCompleted(Vec<CompletedRow>),
    /// User clicked Start with the given parameters.
    StartClicked(BatchParams),
    /// The engine accepted the batch under this job id.
    BatchStarted { job_id: JobId },
    /// The engine refused the batch.
    BatchRejected { reason: String },
    /// User clicked Stop.
    StopClicked,
    /// Engine progress for one row.
    ItemProgress {
        job_id: JobId,
        slot: usize,
        current: u32,
        total: u32,
    },
    /// Engine status for one row.
    ItemUpdated {
        job_id: JobId,
        slot: usize,
        status: RowStatus,
        message: String,
    },
    BatchFinished { job_id: JobId },
    BatchStopped { job_id: JobId },
    /// User removed successful rows.
    ClearCompleted,
    /// UI/render tick to coalesce rendering.
    Tick,
    NoOp,
}
