//! Attachment collaborator seam.
//!
//! Attachment *content* lives outside the core, in a blob store rooted
//! at the sibling attachment directory. The core only keeps metadata
//! rows (`attachments` table) and invokes the collaborator at three
//! points: when a write carries an `_attachments` dictionary, when
//! compaction wants unreferenced blobs collected, and when a read asks
//! for content. [`AttachmentStore`] is that surface; the default
//! [`NoopAttachments`] accepts and stores nothing.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::storage::SqlEngine;
use crate::types::Sequence;

/// The blob-store collaborator surface, as invoked by the core.
pub trait AttachmentStore {
    /// Handles the `_attachments` dictionary of a freshly inserted
    /// revision. Runs inside the write transaction; an error aborts and
    /// rolls back the write with the error's status.
    ///
    /// `parent_sequence` is 0 for a root; stub entries in the dictionary
    /// refer to the parent revision's attachments.
    fn ingest(
        &self,
        engine: &SqlEngine,
        attachments: Option<&Map<String, Value>>,
        sequence: Sequence,
        parent_sequence: Sequence,
    ) -> Result<()>;

    /// Deletes blobs no longer referenced by any metadata row. Invoked
    /// by compaction, outside any transaction. Returns the number of
    /// blobs collected.
    fn garbage_collect(&self, engine: &SqlEngine) -> Result<usize>;

    /// Fetches the content for a digest key, or `None` if the store has
    /// no blob for it.
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Default collaborator: accepts every dictionary, stores nothing.
///
/// With this store installed, `_attachments` always reads back `{}`.
#[derive(Debug, Default)]
pub struct NoopAttachments;

impl AttachmentStore for NoopAttachments {
    fn ingest(
        &self,
        _engine: &SqlEngine,
        attachments: Option<&Map<String, Value>>,
        sequence: Sequence,
        _parent_sequence: Sequence,
    ) -> Result<()> {
        if let Some(atts) = attachments {
            if !atts.is_empty() {
                debug!(sequence, count = atts.len(), "no attachment store installed; dictionary ignored");
            }
        }
        Ok(())
    }

    fn garbage_collect(&self, _engine: &SqlEngine) -> Result<usize> {
        Ok(0)
    }

    fn read(&self, _key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Builds the `_attachments` dictionary for a stored revision from its
/// metadata rows.
///
/// Entries carry `content_type`, `digest` (hex of the content key),
/// `length`, and `stub: true`. When `with_content` is set and the store
/// yields the blob, `data` (base64) replaces the stub marker.
pub(crate) fn attachments_for_sequence(
    engine: &SqlEngine,
    sequence: Sequence,
    store: &dyn AttachmentStore,
    with_content: bool,
) -> Result<Map<String, Value>> {
    let rows = engine.query_rows(
        "SELECT filename, key, type, length FROM attachments WHERE sequence = ?1 \
         ORDER BY filename",
        [sequence as i64],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        },
    )?;

    let mut dict = Map::new();
    for (filename, key, content_type, length) in rows {
        let mut meta = Map::new();
        if let Some(content_type) = content_type {
            meta.insert("content_type".into(), Value::String(content_type));
        }
        meta.insert("digest".into(), Value::String(hex(&key)));
        meta.insert("length".into(), Value::from(length));

        let content = if with_content { store.read(&key)? } else { None };
        match content {
            Some(bytes) => {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine as _;
                meta.insert("data".into(), Value::String(STANDARD.encode(bytes)));
            }
            None => {
                meta.insert("stub".into(), Value::Bool(true));
            }
        }

        dict.insert(filename, Value::Object(meta));
    }
    Ok(dict)
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
