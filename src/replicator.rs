//! Replicator bookkeeping handles.
//!
//! The network replication state machine lives outside the core. What
//! the database tracks is which replicators are active - one per
//! `(remote, direction)` pair - so that repeated `replicate` calls reuse
//! the running instance, and durable checkpoints survive restarts (see
//! the replicator-checkpoint operations on
//! [`Vellum`](crate::Vellum)).

use std::cell::Cell;
use std::fmt;

use tracing::info;

use crate::types::create_docid;

/// An active replication session against one peer, in one direction.
///
/// Handles are compared by identity (`Rc::ptr_eq`), never by value: two
/// sessions against the same remote are distinct replicators.
pub struct Replicator {
    remote: String,
    push: bool,
    continuous: bool,
    session_id: String,
    running: Cell<bool>,
}

impl Replicator {
    /// Creates a handle for a not-yet-started session.
    pub fn new(remote: impl Into<String>, push: bool, continuous: bool) -> Self {
        Self {
            remote: remote.into(),
            push,
            continuous,
            session_id: format!("repl{}", create_docid()),
            running: Cell::new(false),
        }
    }

    /// The peer URL this replicator talks to.
    #[inline]
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// `true` for push (local -> remote), `false` for pull.
    #[inline]
    pub fn is_push(&self) -> bool {
        self.push
    }

    /// Whether the session keeps following the change feed after
    /// catching up.
    #[inline]
    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// Opaque id for this session's checkpoints and logs.
    #[inline]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the session has been started and not yet stopped.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Marks the session started. The driving state machine is the
    /// external collaborator; this only flips bookkeeping state.
    pub fn start(&self) {
        if !self.running.replace(true) {
            info!(
                remote = %self.remote,
                push = self.push,
                continuous = self.continuous,
                session = %self.session_id,
                "replicator started"
            );
        }
    }

    /// Marks the session stopped.
    pub fn stop(&self) {
        if self.running.replace(false) {
            info!(remote = %self.remote, session = %self.session_id, "replicator stopped");
        }
    }
}

impl fmt::Debug for Replicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("remote", &self.remote)
            .field("push", &self.push)
            .field("continuous", &self.continuous)
            .field("running", &self.running.get())
            .finish()
    }
}
