use snapocr_core::{RowStatus, RowView, SessionState, TableViewModel};

/// Remembers what was last printed per row so only changes produce output.
#[derive(Debug, Default)]
pub struct ConsoleRenderer {
    shown: Vec<Option<RowStatus>>,
    session: Option<SessionState>,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines describing rows whose status changed since the previous call.
    /// Progress-only changes are not printed.
    pub fn render(&mut self, view: &TableViewModel) -> Vec<String> {
        if self.shown.len() != view.rows.len() {
            self.shown.resize(view.rows.len(), None);
        }

        let mut lines = Vec::new();
        if self.session != Some(view.session) {
            if view.session == SessionState::Stopping {
                lines.push("stopping: waiting for running requests to wind down".to_string());
            }
            self.session = Some(view.session);
        }
        if let Some(reason) = &view.last_error {
            if view.session == SessionState::Idle && view.active_job.is_none() {
                lines.push(format!("batch rejected: {reason}"));
            }
        }

        for row in &view.rows {
            let shown = &mut self.shown[row.slot];
            if *shown == Some(row.status) {
                continue;
            }
            *shown = Some(row.status);
            if row.status == RowStatus::Pending {
                continue;
            }
            lines.push(row_line(row, view.rows.len()));
        }
        lines
    }
}

fn row_line(row: &RowView, total: usize) -> String {
    let width = total.to_string().len();
    let position = format!("[{:>width$}/{}]", row.slot + 1, total, width = width);
    if row.message.is_empty() {
        format!("{position} {:<12} {}", row.status.as_str(), row.source)
    } else {
        format!(
            "{position} {:<12} {} | {}",
            row.status.as_str(),
            row.source,
            row.message
        )
    }
}

pub fn summary_line(view: &TableViewModel) -> String {
    let counts = &view.counts;
    format!(
        "done {}/{}: success {}, no content {}, error {}, stopped {}",
        counts.done(),
        counts.total(),
        counts.success,
        counts.no_content,
        counts.error,
        counts.user_stopped
    )
}
