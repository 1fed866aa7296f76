use crate::{AppState, Effect, Msg, SessionState};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: AppState, msg: Msg) -> (AppState, Vec<Effect>) {
    let effects = match msg {
        Msg::FilesAdded(paths) => {
            state.add_sources(paths);
            Vec::new()
        }
        Msg::RestoreCompleted(rows) => {
            if state.session() == SessionState::Idle && !rows.is_empty() {
                state.restore(rows);
            }
            Vec::new()
        }
        Msg::StartClicked(params) => {
            if state.session() != SessionState::Idle {
                return (state, Vec::new());
            }
            let (inputs, row_indices) = state.prepare_start();
            if inputs.is_empty() {
                return (state, Vec::new());
            }
            state.begin_session();
            vec![Effect::StartBatch {
                inputs,
                row_indices,
                params,
            }]
        }
        Msg::BatchStarted { job_id } => {
            if state.session() != SessionState::Idle {
                state.bind_job(job_id);
            }
            Vec::new()
        }
        Msg::BatchRejected { reason } => {
            state.reject_start(reason);
            Vec::new()
        }
        Msg::StopClicked => {
            if state.session() == SessionState::Running {
                state.request_stop();
                vec![Effect::StopBatch]
            } else {
                Vec::new()
            }
        }
        Msg::ItemProgress {
            job_id,
            slot,
            current,
            total,
        } => {
            state.apply_progress(job_id, slot, current, total);
            Vec::new()
        }
        Msg::ItemUpdated {
            job_id,
            slot,
            status,
            message,
        } => {
            state.apply_item(job_id, slot, status, message);
            Vec::new()
        }
        Msg::BatchFinished { job_id } => {
            state.finish_job(job_id, false);
            Vec::new()
        }
        Msg::BatchStopped { job_id } => {
            state.finish_job(job_id, true);
            Vec::new()
        }
        Msg::ClearCompleted => {
            if state.session() == SessionState::Idle {
                state.clear_completed();
            }
            Vec::new()
        }
        Msg::Tick | Msg::NoOp => Vec::new(),
    };

    (state, effects)
}
