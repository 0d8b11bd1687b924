//! Write validation.
//!
//! Validators are ordered callbacks consulted on every write (`put` and
//! replication ingress alike). Each is handed the incoming revision and
//! a [`ValidationContext`] exposing the revision being replaced; the
//! first validator returning `false` aborts the write with the context's
//! status.
//!
//! ```rust,ignore
//! db.add_validation(Box::new(|rev, ctx| {
//!     if rev.deleted { return true; }  // always allow deletion
//!     let ok = rev.body.as_ref().is_some_and(|b| b.get("type").is_some());
//!     if !ok {
//!         ctx.set_error_message("documents must carry a type");
//!     }
//!     ok
//! }));
//! ```

use crate::db::Vellum;
use crate::document::Revision;

/// Default status for a rejected revision.
const DEFAULT_ERROR_TYPE: u16 = 403;

/// Default reason for a rejected revision.
const DEFAULT_ERROR_MESSAGE: &str = "invalid document";

/// A validation callback: `true` accepts the revision, `false` rejects
/// it with the context's status and message.
pub type Validator = Box<dyn Fn(&Revision, &mut ValidationContext<'_>) -> bool>;

/// Per-call state handed to each validator.
///
/// Owned by the write for the duration of the call; nothing is shared
/// across calls. The previous revision's body is loaded lazily on first
/// access.
pub struct ValidationContext<'a> {
    db: &'a Vellum,
    previous: Option<Revision>,
    loaded: bool,
    error_type: u16,
    error_message: String,
}

impl<'a> ValidationContext<'a> {
    pub(crate) fn new(db: &'a Vellum, previous: Option<Revision>) -> Self {
        Self {
            db,
            previous,
            loaded: false,
            error_type: DEFAULT_ERROR_TYPE,
            error_message: DEFAULT_ERROR_MESSAGE.to_string(),
        }
    }

    /// The revision being replaced, with its body, or `None` for a
    /// first insert.
    ///
    /// The body is fetched from storage on first access. If the fetch
    /// fails, the revision is reported as absent and the context status
    /// becomes 500.
    pub fn previous_revision(&mut self) -> Option<&Revision> {
        if !self.loaded {
            self.loaded = true;
            let mut previous = self.previous.take();
            if let Some(prev) = previous.as_mut() {
                if prev.body.is_none() {
                    if let Err(err) = self.db.load_body(prev, false) {
                        self.error_type = 500;
                        self.error_message = format!("failed to load previous revision: {err}");
                        previous = None;
                    }
                }
            }
            self.previous = previous;
        }
        self.previous.as_ref()
    }

    /// Status reported if the validator rejects (default 403). Values
    /// below 300 are clamped up to 300.
    pub fn set_error_type(&mut self, status: u16) {
        self.error_type = status.max(300);
    }

    /// Reason reported if the validator rejects (default "invalid
    /// document").
    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = message.into();
    }

    /// The currently configured rejection status.
    #[inline]
    pub fn error_type(&self) -> u16 {
        self.error_type
    }

    /// The currently configured rejection reason.
    #[inline]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}
