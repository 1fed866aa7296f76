use std::fmt;

use serde::Serialize;

pub type JobId = u64;

/// Which batch table a job was started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchMode {
    Images,
    Docs,
}

impl BatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchMode::Images => "images",
            BatchMode::Docs => "docs",
        }
    }
}

/// What the remote API is told the uploaded bytes are (`fileType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Document,
    Image,
}

const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "xps", "epub", "mobi", "fb2", "cbz"];

impl InputKind {
    pub fn from_path(path: &std::path::Path) -> Self {
        let is_document = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                DOCUMENT_EXTENSIONS
                    .iter()
                    .any(|doc| doc.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false);
        if is_document {
            InputKind::Document
        } else {
            InputKind::Image
        }
    }

    pub fn file_type(self) -> u8 {
        match self {
            InputKind::Document => 0,
            InputKind::Image => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    NoContent,
    Error,
    UserStopped,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ItemStatus::Pending | ItemStatus::Processing)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Success => "success",
            ItemStatus::NoContent => "no_content",
            ItemStatus::Error => "error",
            ItemStatus::UserStopped => "user_stopped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub index: usize,
    pub display_slot: usize,
    pub status: ItemStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Progress {
        job_id: JobId,
        display_slot: usize,
        current: u32,
        total: u32,
    },
    Item {
        job_id: JobId,
        result: ItemResult,
    },
    Finished {
        job_id: JobId,
    },
    Stopped {
        job_id: JobId,
    },
}

impl BatchEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            BatchEvent::Progress { job_id, .. }
            | BatchEvent::Item { job_id, .. }
            | BatchEvent::Finished { job_id }
            | BatchEvent::Stopped { job_id } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchEvent::Finished { .. } | BatchEvent::Stopped { .. })
    }
}

/// One positioned block of a structured-document result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutBlock {
    pub label: String,
    pub content: String,
    pub bbox: Option<Vec<f64>>,
    pub order: Option<i64>,
}

/// Successful OCR outcome, normalized across the remote result shapes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcrDocument {
    pub lines: Vec<String>,
    pub markdown: String,
    pub tables_html: Vec<String>,
    pub layout: Vec<LayoutBlock>,
    pub raw: serde_json::Value,
    pub debug_info: Option<String>,
}

impl OcrDocument {
    /// Plain text of the document: recognized lines, or the markdown body when
    /// the service only returned markdown.
    pub fn text(&self) -> String {
        if self.lines.is_empty() {
            self.markdown.trim().to_string()
        } else {
            self.lines.join("\n")
        }
    }

    pub fn has_content(&self) -> bool {
        !self.text().is_empty() || !self.tables_html.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrError {
    pub kind: OcrFailure,
    pub message: String,
    pub raw_response: Option<String>,
}

impl OcrError {
    pub fn new(kind: OcrFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_response: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }

    pub fn cancelled() -> Self {
        Self::new(OcrFailure::Cancelled, "task stopped by user")
    }

    /// Transient failures are the only ones worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, OcrFailure::Timeout | OcrFailure::Connect)
    }
}

impl fmt::Display for OcrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for OcrError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrFailure {
    MissingCredentials,
    Timeout,
    Connect,
    Network,
    HttpStatus(u16),
    Api { code: i64 },
    InvalidResponse,
    Cancelled,
}

impl fmt::Display for OcrFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcrFailure::MissingCredentials => write!(f, "missing credentials"),
            OcrFailure::Timeout => write!(f, "timeout"),
            OcrFailure::Connect => write!(f, "connection failure"),
            OcrFailure::Network => write!(f, "network error"),
            OcrFailure::HttpStatus(code) => write!(f, "http status {code}"),
            OcrFailure::Api { code } => write!(f, "api error code {code}"),
            OcrFailure::InvalidResponse => write!(f, "invalid response"),
            OcrFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

pub type OcrResponse = Result<OcrDocument, OcrError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn documents_are_classified_by_extension() {
        assert_eq!(InputKind::from_path(Path::new("a/b.PDF")), InputKind::Document);
        assert_eq!(InputKind::from_path(Path::new("book.epub")), InputKind::Document);
        assert_eq!(InputKind::from_path(Path::new("shot.png")), InputKind::Image);
        assert_eq!(InputKind::from_path(Path::new("no_extension")), InputKind::Image);
    }

    #[test]
    fn text_falls_back_to_markdown() {
        let doc = OcrDocument {
            markdown: "  # Title\n\nbody \n".to_string(),
            ..OcrDocument::default()
        };
        assert_eq!(doc.text(), "# Title\n\nbody");
        assert!(doc.has_content());
        assert!(!OcrDocument::default().has_content());
    }

    #[test]
    fn only_pending_and_processing_are_open() {
        assert!(!ItemStatus::Pending.is_terminal());
        assert!(!ItemStatus::Processing.is_terminal());
        assert!(ItemStatus::UserStopped.is_terminal());
        assert!(ItemStatus::NoContent.is_terminal());
    }
}
