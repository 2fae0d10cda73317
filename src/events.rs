//! Change notifications exchanged between traces.
//!
//! Notifications are plain messages. The model queues them and delivers them
//! in order: first to the formula traces subscribed to the emitting trace
//! (through their dependency edge), then to the outbox drained by external
//! observers.

use std::collections::VecDeque;

use crate::trace::TraceId;

/// A discrete change of one trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Output samples in `begin..end` changed (indices of the trace output).
    DataChanged {
        /// Emitting trace.
        trace: TraceId,
        /// First changed output index.
        begin: usize,
        /// One past the last changed output index.
        end: usize,
    },
    /// All samples were removed.
    Cleared(TraceId),
    /// Domain, reference impedance, source kind or output type changed.
    TypeChanged(TraceId),
    /// Trace was paused or resumed.
    PauseChanged(TraceId),
    /// Error/warning status changed.
    StatusChanged(TraceId),
    /// A formula source was bound.
    SourceAdded {
        /// Formula trace.
        consumer: TraceId,
        /// Newly bound source.
        source: TraceId,
    },
    /// A formula source was unbound.
    SourceRemoved {
        /// Formula trace.
        consumer: TraceId,
        /// Former source.
        source: TraceId,
    },
    /// Trace was destroyed; the handle is no longer valid.
    Deleted(TraceId),
}

impl TraceEvent {
    /// Trace the event is about.
    pub fn trace(&self) -> TraceId {
        match self {
            TraceEvent::DataChanged { trace, .. } => *trace,
            TraceEvent::Cleared(t)
            | TraceEvent::TypeChanged(t)
            | TraceEvent::PauseChanged(t)
            | TraceEvent::StatusChanged(t)
            | TraceEvent::Deleted(t) => *t,
            TraceEvent::SourceAdded { consumer, .. }
            | TraceEvent::SourceRemoved { consumer, .. } => *consumer,
        }
    }
}

/// FIFO of pending notifications.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<TraceEvent>,
}

impl EventQueue {
    /// Queue a notification.
    pub fn push(&mut self, event: TraceEvent) {
        self.pending.push_back(event);
    }

    /// Queue several notifications in order.
    pub fn extend(&mut self, events: impl IntoIterator<Item = TraceEvent>) {
        self.pending.extend(events);
    }

    /// Next notification to deliver.
    pub fn pop(&mut self) -> Option<TraceEvent> {
        self.pending.pop_front()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_order() {
        let mut q = EventQueue::default();
        q.push(TraceEvent::Cleared(TraceId(1)));
        q.extend([
            TraceEvent::TypeChanged(TraceId(2)),
            TraceEvent::Deleted(TraceId(3)),
        ]);
        assert_eq!(q.pop().map(|e| e.trace()), Some(TraceId(1)));
        assert_eq!(q.pop().map(|e| e.trace()), Some(TraceId(2)));
        assert_eq!(q.pop(), Some(TraceEvent::Deleted(TraceId(3))));
        assert!(q.is_empty());
    }
}
