//! # Vellum
//!
//! Embedded, single-node JSON document database - documents versioned by
//! a tree of revisions, with the primitives bidirectional replication is
//! built from.
//!
//! Vellum stores JSON documents in SQLite. Every write produces a new
//! immutable revision; ancestry is preserved so peers can negotiate,
//! graft foreign histories, and detect conflicts. A dense, never-reused
//! sequence number orders all writes and drives the change feed.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use serde_json::json;
//! use vellum::{Config, Revision, Vellum};
//!
//! // Open or create a database
//! let db = Vellum::open("./vellum.db", Config::default())?;
//!
//! // Create a document
//! let candidate = Revision::with_body(Some("greeting".into()), json!({"text": "hi"}));
//! let (rev1, _) = db.put_revision(candidate, None)?;
//!
//! // Update it, naming the revision being replaced
//! let update = Revision::with_body(Some("greeting".into()), json!({"text": "hello"}));
//! let (rev2, _) = db.put_revision(update, rev1.rev_id.as_ref())?;
//!
//! // Follow the change feed
//! for change in db.changes_since(0, None)? {
//!     println!("{:?} @ {}", change.docid, change.sequence);
//! }
//!
//! // Clean up
//! db.close()?;
//! ```
//!
//! ## Key Concepts
//!
//! ### Revision
//!
//! A **revision** is one immutable version of a document, identified by
//! `(docid, rev_id)` and globally ordered by its sequence. The rev id is
//! `<generation>-<digest>`: the generation is the revision's depth in
//! the tree, the digest is opaque.
//!
//! ### Leaf and tombstone
//!
//! A **leaf** is a revision with no children (`current = 1`). Several
//! leaves on one document are an unresolved conflict. A deleted leaf is
//! a **tombstone**: the document reads as absent but its history
//! remains for replication.
//!
//! ### Change feed
//!
//! Every committed write emits a change event, and `changes_since`
//! replays current revisions beyond any sequence - the egress feed a
//! push replicator or view indexer consumes.
//!
//! ### Replication ingress
//!
//! `force_insert` grafts a foreign revision plus its ancestry into the
//! local tree, fabricating body-less stubs for intermediates the peer
//! didn't send. `find_missing_revisions` answers the peer's "which of
//! these do you lack?" negotiation.
//!
//! ## Threading
//!
//! A `Vellum` instance belongs to a single owning execution context; it
//! is not `Sync` and all operations are synchronous. See the crate-level
//! design notes on `Vellum` for how collaborators share one instance.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod changes;
mod config;
mod db;
mod document;
mod error;
mod query;
mod replicator;
mod types;
mod validation;

pub mod attachments;
pub mod storage;

// ============================================================================
// Public API re-exports
// ============================================================================

// Main database interface
pub use db::Vellum;

// Configuration
pub use config::{Config, DEFAULT_BUSY_TIMEOUT};

// Error handling
pub use error::{Result, Status, VellumError};

// Core types
pub use document::Revision;
pub use types::{RevId, Sequence};

// Change feed
pub use changes::ChangeEvent;

// Listings
pub use query::{AllDocsOptions, AllDocsPage, AllDocsRow, AllDocsRowValue};

// Replication bookkeeping
pub use replicator::Replicator;

// Validation
pub use validation::{ValidationContext, Validator};

// Attachment collaborator seam (for embedders installing a blob store)
pub use attachments::{AttachmentStore, NoopAttachments};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common Vellum usage.
///
/// ```rust
/// use vellum::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::db::Vellum;
    pub use crate::document::Revision;
    pub use crate::error::{Result, Status, VellumError};
    pub use crate::types::{RevId, Sequence};
}
