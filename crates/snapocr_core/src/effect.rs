use std::path::PathBuf;

use crate::BatchParams;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run a batch over `inputs`; `row_indices[i]` is the table slot of `inputs[i]`.
    StartBatch {
        inputs: Vec<PathBuf>,
        row_indices: Vec<usize>,
        params: BatchParams,
    },
    StopBatch,
}
