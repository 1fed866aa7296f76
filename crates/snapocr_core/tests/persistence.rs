use std::path::PathBuf;

use snapocr_core::{update, AppState, BatchParams, CompletedRow, Effect, Msg, RowStatus};

fn init_logging() {
    snapocr_logging::initialize_for_tests();
}

#[test]
fn completed_rows_can_be_restored_for_resume() {
    init_logging();
    let (state, _) = update(
        AppState::new(),
        Msg::FilesAdded(vec![PathBuf::from("scan1.png"), PathBuf::from("scan2.png")]),
    );
    let (state, _) = update(
        state,
        Msg::StartClicked(BatchParams {
            model: None,
            output_dir: PathBuf::from("out"),
            format: "md".to_string(),
            max_concurrency: 1,
        }),
    );
    let (state, _) = update(state, Msg::BatchStarted { job_id: 1 });
    let (state, _) = update(
        state,
        Msg::ItemUpdated {
            job_id: 1,
            slot: 1,
            status: RowStatus::Success,
            message: "exported: scan2.md".to_string(),
        },
    );
    let (state, _) = update(state, Msg::BatchFinished { job_id: 1 });

    let snapshot = state.completed_rows();
    assert_eq!(
        snapshot,
        vec![CompletedRow {
            source: PathBuf::from("scan2.png"),
            message: "exported: scan2.md".to_string(),
        }]
    );

    // A fresh session that lists the same files skips the restored one.
    let (state, _) = update(
        AppState::new(),
        Msg::FilesAdded(vec![PathBuf::from("scan1.png"), PathBuf::from("scan2.png")]),
    );
    let (state, _) = update(state, Msg::RestoreCompleted(snapshot));
    assert_eq!(state.view().counts.success, 1);
    let (_, effects) = update(
        state,
        Msg::StartClicked(BatchParams {
            model: None,
            output_dir: PathBuf::from("out"),
            format: "md".to_string(),
            max_concurrency: 1,
        }),
    );
    assert_eq!(
        effects,
        vec![Effect::StartBatch {
            inputs: vec![PathBuf::from("scan1.png")],
            row_indices: vec![0],
            params: BatchParams {
                model: None,
                output_dir: PathBuf::from("out"),
                format: "md".to_string(),
                max_concurrency: 1,
            },
        }]
    );
}

#[test]
fn restoring_unknown_sources_appends_rows() {
    init_logging();
    let (state, _) = update(
        AppState::new(),
        Msg::RestoreCompleted(vec![CompletedRow {
            source: PathBuf::from("old.png"),
            message: "exported: old.md".to_string(),
        }]),
    );
    let view = state.view();
    assert_eq!(view.rows.len(), 1);
    assert_eq!(view.rows[0].status, RowStatus::Success);
    assert_eq!(view.rows[0].progress, 100);
}
