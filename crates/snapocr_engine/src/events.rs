use std::sync::mpsc;

use crate::BatchEvent;

/// Receives batch events from worker tasks.
///
/// `emit` runs while the worker holds its item ledger, so that a status
/// write and its event stay in one order across tasks. Implementations must
/// not call [`WorkerHandle::item_statuses`](crate::WorkerHandle::item_statuses)
/// from inside `emit`; `stop` and `phase` are safe. Forward the event and
/// return.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BatchEvent);
}

pub struct ChannelEventSink {
    tx: mpsc::Sender<BatchEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<BatchEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: BatchEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}
