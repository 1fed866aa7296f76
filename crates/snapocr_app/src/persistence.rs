use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use snapocr_core::CompletedRow;
use snapocr_engine::{ensure_output_dir, AtomicFileWriter};
use snapocr_logging::{ocr_error, ocr_info, ocr_warn};

pub(crate) const STATE_FILENAME: &str = ".snapocr_state.ron";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRow {
    source: PathBuf,
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedState {
    /// RFC 3339 time of the last save.
    #[serde(default)]
    saved_utc: String,
    completed: Vec<PersistedRow>,
}

/// Rows that succeeded in earlier runs writing into `output_dir`. A missing
/// or unreadable state file yields an empty list.
pub(crate) fn load_completed_rows(output_dir: &Path) -> Vec<CompletedRow> {
    let path = output_dir.join(STATE_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Vec::new();
        }
        Err(err) => {
            ocr_warn!("Failed to read persisted state from {:?}: {}", path, err);
            return Vec::new();
        }
    };

    let state: PersistedState = match ron::from_str(&content) {
        Ok(state) => state,
        Err(err) => {
            ocr_warn!("Failed to parse persisted state from {:?}: {}", path, err);
            return Vec::new();
        }
    };

    ocr_info!(
        "Loaded {} completed rows from {:?} (saved {})",
        state.completed.len(),
        path,
        state.saved_utc
    );
    state
        .completed
        .into_iter()
        .map(|row| CompletedRow {
            source: row.source,
            message: row.message,
        })
        .collect()
}

pub(crate) fn save_completed_rows(output_dir: &Path, completed: &[CompletedRow]) {
    if let Err(err) = ensure_output_dir(output_dir) {
        ocr_error!("Failed to ensure output dir {:?}: {}", output_dir, err);
        return;
    }

    let state = PersistedState {
        saved_utc: Utc::now().to_rfc3339(),
        completed: completed
            .iter()
            .map(|row| PersistedRow {
                source: row.source.clone(),
                message: row.message.clone(),
            })
            .collect(),
    };

    let pretty = ron::ser::PrettyConfig::new();
    let content = match ron::ser::to_string_pretty(&state, pretty) {
        Ok(text) => text,
        Err(err) => {
            ocr_error!("Failed to serialize persisted state: {}", err);
            return;
        }
    };

    let writer = AtomicFileWriter::new(PathBuf::from(output_dir));
    if let Err(err) = writer.write(STATE_FILENAME, &content) {
        ocr_error!(
            "Failed to write persisted state to {:?}: {}",
            output_dir,
            err
        );
    }
}
