//! Snapocr engine: remote OCR, batch pipeline, exporters and configuration.
mod config;
mod coordinator;
mod events;
mod export;
mod filename;
mod ocr;
mod parse;
mod persist;
mod tables;
mod translate;
mod tuning;
mod types;
mod worker;

pub use config::{
    AppConfig, BatchConfig, BatchDefaults, ConfigError, ModelEndpoint, PromptTemplate,
    TranslationConfig, MAX_CONCURRENCY, TOKEN_ENV_VAR,
};
pub use coordinator::{Coordinator, CoordinatorError};
pub use events::{ChannelEventSink, EventSink};
pub use export::{ExportError, ExportFormat, ExportRequest, Exporter, FileExporter};
pub use filename::{assign_output_stems, output_stem};
pub use ocr::{HttpOcrClient, OcrClient, OcrRequest, OcrSettings};
pub use parse::parse_ocr_payload;
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use tables::{html_tables, markdown_tables, tables_to_markdown, Grid};
pub use translate::{completions_url, TranslateError, TranslateSettings, TranslationClient};
pub use tuning::{
    builtin_profile, TuningError, TuningParams, PADDLE_OCR_VL, PP_OCR_V5, PP_STRUCTURE_V3,
};
pub use types::{
    BatchEvent, BatchMode, InputKind, ItemResult, ItemStatus, JobId, LayoutBlock, OcrDocument,
    OcrError, OcrFailure, OcrResponse,
};
pub use worker::{BatchJob, BatchSettings, BatchWorker, JobError, WorkerHandle, WorkerPhase};

/// Cancellation token threaded through every suspending operation.
pub use tokio_util::sync::CancellationToken;
