//! Delivery of sync events to the caller

use tokio::sync::mpsc;
use tracing::debug;
use treemirror_types::{OperationRecord, SubtreeFailure, SyncEvent};

/// Receives the events of a reconciliation pass as they happen
pub trait EventSink {
    /// Deliver one event
    fn emit(&mut self, event: SyncEvent);
}

impl EventSink for Vec<SyncEvent> {
    fn emit(&mut self, event: SyncEvent) {
        self.push(event);
    }
}

impl EventSink for mpsc::UnboundedSender<SyncEvent> {
    fn emit(&mut self, event: SyncEvent) {
        if self.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }
}

/// Adapter turning a closure into an [`EventSink`]
#[derive(Debug)]
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: FnMut(SyncEvent),
{
    fn emit(&mut self, event: SyncEvent) {
        (self.0)(event);
    }
}

/// Split collected events into completed operations and failures
pub fn split_events(events: Vec<SyncEvent>) -> (Vec<OperationRecord>, Vec<SubtreeFailure>) {
    let mut records = Vec::new();
    let mut failures = Vec::new();
    for event in events {
        match event {
            SyncEvent::Operation(record) => records.push(record),
            SyncEvent::Failure(failure) => failures.push(failure),
        }
    }
    (records, failures)
}
