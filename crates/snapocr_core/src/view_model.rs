use crate::{JobId, RowStatus, SessionState};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub success: usize,
    pub no_content: usize,
    pub error: usize,
    pub user_stopped: usize,
}

impl StatusCounts {
    pub(crate) fn add(&mut self, status: RowStatus) {
        let slot = match status {
            RowStatus::Pending => &mut self.pending,
            RowStatus::Processing => &mut self.processing,
            RowStatus::Success => &mut self.success,
            RowStatus::NoContent => &mut self.no_content,
            RowStatus::Error => &mut self.error,
            RowStatus::UserStopped => &mut self.user_stopped,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.processing
            + self.success
            + self.no_content
            + self.error
            + self.user_stopped
    }

    /// Rows that reached a final status.
    pub fn done(&self) -> usize {
        self.total() - self.pending - self.processing
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableViewModel {
    pub session: SessionState,
    pub active_job: Option<JobId>,
    pub rows: Vec<RowView>,
    pub counts: StatusCounts,
    pub last_error: Option<String>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowView {
    pub slot: usize,
    pub source: String,
    pub status: RowStatus,
    pub message: String,
    pub progress: u8,
}
