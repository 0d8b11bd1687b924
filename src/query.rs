//! Listing options and result rows.
//!
//! `get_all_docs` pages over the current non-deleted leaves of every
//! document, ordered by docid.

use serde::Serialize;
use serde_json::Value;

use crate::types::Sequence;

/// Options for `get_all_docs`.
#[derive(Clone, Debug, Default)]
pub struct AllDocsOptions {
    /// Maximum number of rows to return; `None` means unbounded.
    pub limit: Option<u64>,

    /// Number of leading rows to skip.
    pub skip: u64,

    /// Reverse the docid ordering.
    pub descending: bool,

    /// Attach each row's expanded document body.
    pub include_docs: bool,

    /// Report the database's latest sequence alongside the page.
    pub update_seq: bool,
}

impl AllDocsOptions {
    /// Creates options with defaults (no paging, ascending, ids only).
    pub fn new() -> Self {
        Self::default()
    }
}

/// One row of a `get_all_docs` page.
#[derive(Clone, Debug, Serialize)]
pub struct AllDocsRow {
    /// The document's external id.
    pub id: String,

    /// Listing key; equals `id`.
    pub key: String,

    /// The winning revision id.
    pub value: AllDocsRowValue,

    /// Expanded body, present when `include_docs` was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// The `value` column of a listing row.
#[derive(Clone, Debug, Serialize)]
pub struct AllDocsRowValue {
    /// The winning revision id.
    pub rev: String,
}

/// A page of `get_all_docs` results.
#[derive(Clone, Debug, Serialize)]
pub struct AllDocsPage {
    /// Row count of this page. Note: reflects the page, not the number
    /// of documents in the database.
    pub total_rows: u64,

    /// The skip that produced this page.
    pub offset: u64,

    /// Latest database sequence, present when `update_seq` was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_seq: Option<Sequence>,

    /// The rows, in docid order.
    pub rows: Vec<AllDocsRow>,
}
