//! Core type definitions for Vellum identifiers and sequences.
//!
//! A revision id has the grammar `<generation>-<digest>`: the generation
//! is the depth of the revision in its document's tree (1 for a root),
//! the digest is an opaque token (currently a UUID). Revisions are
//! globally ordered by [`Sequence`], a dense integer assigned by the
//! storage engine's AUTOINCREMENT and never reused.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Global revision sequence number.
///
/// Dense, monotonically increasing, never reused across the life of the
/// store. `0` means "not yet assigned" - stored revisions always carry a
/// sequence >= 1. Forms the change-feed cursor.
pub type Sequence = u64;

/// A revision identifier: `<generation>-<digest>`.
///
/// The string is treated as opaque except for the leading generation
/// integer. Foreign rev ids received over replication are stored as-is.
///
/// # Example
/// ```
/// use vellum::RevId;
///
/// let rev = RevId::new("3-deadbeef");
/// assert_eq!(rev.generation(), Some(3));
/// assert_eq!(rev.digest(), Some("deadbeef"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevId(String);

impl RevId {
    /// Wraps a revision id string. No grammar check is performed here;
    /// operations that need the generation parse it on demand.
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the leading generation integer.
    ///
    /// Returns `None` if the id is ungrammatical: no `-` separator, a
    /// non-numeric prefix, or a generation of zero.
    pub fn generation(&self) -> Option<u64> {
        let (gen, _) = self.0.split_once('-')?;
        match gen.parse::<u64>() {
            Ok(n) if n > 0 => Some(n),
            _ => None,
        }
    }

    /// Returns the opaque digest portion after the first `-`, if any.
    pub fn digest(&self) -> Option<&str> {
        self.0.split_once('-').map(|(_, d)| d)
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RevId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RevId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for RevId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generates a fresh docid: a hyphenated lowercase UUID.
#[inline]
pub(crate) fn create_docid() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a fresh revision digest: an unhyphenated lowercase UUID.
///
/// Digests only need to be unique; the compact form keeps rev ids short.
#[inline]
pub(crate) fn create_rev_digest() -> String {
    Uuid::new_v4().simple().to_string()
}
