//! Error types for Vellum.
//!
//! Vellum reports failures through a single public enum, [`VellumError`],
//! whose variants follow the HTTP-style status taxonomy of the document
//! API: bad request, not found, conflict, validator rejection, storage
//! failure. [`VellumError::status`] yields the numeric code.
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use vellum::{Vellum, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let db = Vellum::open("./vellum.db", Config::default())?;
//!     // ... operations that may fail ...
//!     db.close()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias for Vellum operations.
pub type Result<T> = std::result::Result<T, VellumError>;

/// Success status of a write operation.
///
/// Mirrors the HTTP codes of the document API: `201 Created` for a new
/// revision, `200 OK` for a deletion (tombstone) or a plain read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// 200 OK - deletion succeeded, or a read completed.
    Ok,
    /// 201 Created - a new revision was stored.
    Created,
}

impl Status {
    /// Returns the numeric HTTP-style code.
    #[inline]
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
        }
    }
}

/// Top-level error enum for all Vellum operations.
///
/// This is the only error type returned by public APIs.
/// Use pattern matching or [`status()`](VellumError::status) to handle
/// specific cases.
#[derive(Debug, Error)]
pub enum VellumError {
    /// Malformed input: missing docid, ungrammatical revision id,
    /// non-object body, or an inconsistent argument combination.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No such document or revision.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stale or missing predecessor revision, or an attempt to create
    /// over a live leaf.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A validator rejected the revision.
    ///
    /// The status defaults to 403 but validators may override it with
    /// any code >= 300 via the validation context.
    #[error("Rejected ({status}): {message}")]
    Rejected {
        /// HTTP-style status chosen by the validator (>= 300).
        status: u16,
        /// Human-readable reason chosen by the validator.
        message: String,
    },

    /// The stored schema version is from an incompatible future release.
    #[error("Incompatible schema version {version} (this release understands < 100)")]
    SchemaIncompatible {
        /// The `user_version` found in the database file.
        version: i32,
    },

    /// Error from the SQLite storage engine.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A stored document body failed to parse as JSON.
    #[error("Corrupt document body: {0}")]
    Json(#[from] serde_json::Error),

    /// General I/O error (database file, attachment directory).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VellumError {
    /// Creates a bad-request error with the given reason.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest(reason.into())
    }

    /// Creates a not-found error with the given subject.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates a conflict error with the given reason.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }

    /// Creates a validator rejection, clamping the status to >= 300.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status: status.max(300),
            message: message.into(),
        }
    }

    /// Returns the HTTP-style status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Rejected { status, .. } => *status,
            Self::SchemaIncompatible { .. } => 500,
            Self::Storage(_) | Self::Json(_) | Self::Io(_) => 500,
        }
    }

    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a conflict error.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns true if this is a validator rejection.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Returns true if this is a storage-engine error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Ok.code(), 200);
        assert_eq!(Status::Created.code(), 201);
        assert_eq!(VellumError::bad_request("x").status(), 400);
        assert_eq!(VellumError::not_found("x").status(), 404);
        assert_eq!(VellumError::conflict("x").status(), 409);
        assert_eq!(VellumError::rejected(401, "x").status(), 401);
        assert_eq!(VellumError::SchemaIncompatible { version: 200 }.status(), 500);
    }

    #[test]
    fn test_rejected_clamps_low_status() {
        // Validators may only pick codes >= 300
        let err = VellumError::rejected(200, "nope");
        assert_eq!(err.status(), 300);
    }

    #[test]
    fn test_error_display() {
        let err = VellumError::conflict("document already exists");
        assert_eq!(err.to_string(), "Conflict: document already exists");

        let err = VellumError::rejected(403, "invalid document");
        assert_eq!(err.to_string(), "Rejected (403): invalid document");
    }

    #[test]
    fn test_predicates() {
        assert!(VellumError::not_found("doc").is_not_found());
        assert!(!VellumError::not_found("doc").is_conflict());
        assert!(VellumError::conflict("stale").is_conflict());
        assert!(VellumError::rejected(403, "no").is_rejected());
    }

    #[test]
    fn test_error_conversion_chain() {
        fn inner() -> Result<()> {
            let _: serde_json::Value = serde_json::from_str("{not json")?;
            Ok(())
        }

        let result = inner();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().status(), 500);
    }
}
