//! Snapocr core: pure state machine for the batch item table.
mod effect;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::Effect;
pub use msg::Msg;
pub use state::{AppState, BatchParams, CompletedRow, JobId, RowStatus, SessionState};
pub use update::update;
pub use view_model::{RowView, StatusCounts, TableViewModel};
