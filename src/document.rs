//! Document revisions and body handling.
//!
//! A [`Revision`] is the opaque value the store hands out: the document's
//! external id, the revision id, the deletion flag, the global sequence,
//! and an optional JSON body. Stored bodies never contain the reserved
//! keys `_id`, `_rev`, or `_attachments` - those are stripped before
//! serialization and synthesized again on read.

use serde_json::{Map, Value};

use crate::error::{Result, VellumError};
use crate::types::{RevId, Sequence};

/// JSON keys owned by the store rather than the application.
pub(crate) const RESERVED_KEYS: [&str; 3] = ["_id", "_rev", "_attachments"];

/// One revision of a document.
///
/// Candidates handed to `put_revision` carry no `rev_id` (the store
/// assigns one) and a sequence of 0. Revisions returned by the store
/// always carry both ids and the assigned sequence; the body is present
/// only where the operation loads it.
#[derive(Clone, Debug)]
pub struct Revision {
    /// External document id. `None` on a candidate that wants a
    /// generated docid.
    pub docid: Option<String>,

    /// Revision id, `<generation>-<digest>`. `None` on a candidate.
    pub rev_id: Option<RevId>,

    /// Deletion flag; a current deleted revision is a tombstone leaf.
    pub deleted: bool,

    /// Global sequence, 0 until the revision is stored.
    pub sequence: Sequence,

    /// JSON body. `None` for tombstones, ancestry stubs, compacted
    /// revisions, and listings that do not load bodies.
    pub body: Option<Value>,
}

impl Revision {
    /// Creates a candidate revision with a body for `put_revision`.
    pub fn with_body(docid: Option<String>, body: Value) -> Self {
        Self {
            docid,
            rev_id: None,
            deleted: false,
            sequence: 0,
            body: Some(body),
        }
    }

    /// Creates a deletion candidate (tombstone) for `put_revision`.
    pub fn deletion(docid: impl Into<String>) -> Self {
        Self {
            docid: Some(docid.into()),
            rev_id: None,
            deleted: true,
            sequence: 0,
            body: None,
        }
    }

    /// Creates a fully-identified revision, as used by `force_insert`.
    pub fn new(docid: impl Into<String>, rev_id: impl Into<RevId>, deleted: bool) -> Self {
        Self {
            docid: Some(docid.into()),
            rev_id: Some(rev_id.into()),
            deleted,
            sequence: 0,
            body: None,
        }
    }

    /// Builds a revision from a JSON object carrying underscore fields.
    ///
    /// Extracts `_id`, `_rev`, and `_deleted` into the struct and keeps
    /// the remaining properties (including any `_attachments`) as the
    /// body. Fails with a bad-request error if the value is not an
    /// object.
    pub fn from_properties(mut value: Value) -> Result<Self> {
        let obj = value
            .as_object_mut()
            .ok_or_else(|| VellumError::bad_request("document body must be a JSON object"))?;

        let docid = obj
            .remove("_id")
            .and_then(|v| v.as_str().map(String::from));
        let rev_id = obj
            .remove("_rev")
            .and_then(|v| v.as_str().map(RevId::from));
        let deleted = obj
            .remove("_deleted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        Ok(Self {
            docid,
            rev_id,
            deleted,
            sequence: 0,
            body: Some(value),
        })
    }

    /// Parses the generation from the revision id, or 0 if absent.
    pub fn generation(&self) -> u64 {
        self.rev_id
            .as_ref()
            .and_then(RevId::generation)
            .unwrap_or(0)
    }

    /// Returns the `_attachments` dictionary from the body, if any.
    pub(crate) fn attachments_dict(&self) -> Option<&Map<String, Value>> {
        self.body
            .as_ref()
            .and_then(|b| b.get("_attachments"))
            .and_then(Value::as_object)
    }
}

/// Strips the reserved keys from a body object and serializes the rest.
///
/// Returns the canonical stored bytes. An empty body serializes as `{}`.
/// Fails with a bad-request error if the body is not a JSON object.
pub(crate) fn strip_and_serialize(body: &Value) -> Result<Vec<u8>> {
    let obj = body
        .as_object()
        .ok_or_else(|| VellumError::bad_request("document body must be a JSON object"))?;

    let stripped: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(serde_json::to_vec(&Value::Object(stripped))?)
}

/// Expands stored body bytes into the read-side property object.
///
/// Splices `_id`, `_rev`, the `_attachments` dictionary (always present,
/// possibly empty), and `_deleted: true` for tombstones over the stored
/// properties. `json` is `None` for tombstones, stubs, and compacted
/// revisions; the result then carries only the reserved keys.
pub(crate) fn expand_body(
    json: Option<&[u8]>,
    docid: &str,
    rev_id: &RevId,
    deleted: bool,
    attachments: Map<String, Value>,
) -> Result<Value> {
    let mut obj: Map<String, Value> = match json {
        Some(bytes) if !bytes.is_empty() => {
            match serde_json::from_slice::<Value>(bytes)? {
                Value::Object(m) => m,
                _ => Map::new(),
            }
        }
        _ => Map::new(),
    };

    obj.insert("_id".into(), Value::String(docid.to_string()));
    obj.insert("_rev".into(), Value::String(rev_id.to_string()));
    if deleted {
        obj.insert("_deleted".into(), Value::Bool(true));
    }
    obj.insert("_attachments".into(), Value::Object(attachments));

    Ok(Value::Object(obj))
}
