//! Change notifications.
//!
//! Every committed write emits one [`ChangeEvent`] to all subscribers.
//! Events fire strictly after the outer transaction commits, so a
//! subscriber that turns around and calls `changes_since` observes the
//! write. Delivery is in-process over unbounded channels; durable
//! consumers should track their own cursor and poll `changes_since`.
//!
//! Subscribers must not re-enter write operations on the same database
//! from the delivery context before returning.

use std::cell::RefCell;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::document::Revision;
use crate::types::Sequence;

/// A committed write, as observed by the change feed.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// The stored revision (ids and deletion flag; no body).
    pub revision: Revision,

    /// The sequence assigned to the revision.
    pub sequence: Sequence,

    /// The peer a replicated revision came from; `None` for local
    /// writes. Replicators use this to skip echoing their own pulls.
    pub source: Option<String>,
}

/// Fan-out list of change subscribers.
///
/// Senders whose receiver has been dropped are pruned on emit.
#[derive(Default)]
pub(crate) struct ChangeNotifier {
    senders: RefCell<Vec<Sender<ChangeEvent>>>,
}

impl ChangeNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber and returns its receiving end.
    pub(crate) fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = unbounded();
        self.senders.borrow_mut().push(tx);
        rx
    }

    /// Delivers an event to every live subscriber.
    pub(crate) fn post(&self, event: ChangeEvent) {
        let mut senders = self.senders.borrow_mut();
        senders.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(
            sequence = event.sequence,
            subscribers = senders.len(),
            "change posted"
        );
    }

    /// Number of live subscribers (stale senders counted until the next
    /// emit).
    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.senders.borrow().len()
    }
}
