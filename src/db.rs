//! Vellum main struct and lifecycle operations.
//!
//! The [`Vellum`] struct is the primary interface for interacting with
//! the database. It provides methods for:
//!
//! - Opening and closing the database file
//! - Reading and writing document revisions
//! - Grafting foreign revision histories (replication ingress)
//! - Querying the change feed and listing documents
//! - Replication checkpoints and active-replicator bookkeeping
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use serde_json::json;
//! use vellum::{Config, Revision, Vellum};
//!
//! let db = Vellum::open("./vellum.db", Config::default())?;
//!
//! let candidate = Revision::with_body(Some("greeting".into()), json!({"text": "hi"}));
//! let (stored, status) = db.put_revision(candidate, None)?;
//! assert_eq!(status.code(), 201);
//!
//! let doc = db.get_document("greeting", None)?.unwrap();
//! assert_eq!(doc.body.unwrap()["text"], "hi");
//!
//! db.close()?;
//! ```
//!
//! # Threading
//!
//! A `Vellum` instance is owned by a single execution context: the
//! SQLite connection, the transaction bookkeeping, and the replicator
//! list are all single-threaded state. Components that share a database
//! - view indexers, replicators - either run on the owning context or
//! serialize their calls onto it.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crossbeam_channel::Receiver;
use rusqlite::{params, params_from_iter};
use tracing::{debug, info, instrument};

use crate::attachments::{attachments_for_sequence, AttachmentStore, NoopAttachments};
use crate::changes::{ChangeEvent, ChangeNotifier};
use crate::config::Config;
use crate::document::{expand_body, strip_and_serialize, Revision};
use crate::error::{Result, Status, VellumError};
use crate::query::{AllDocsOptions, AllDocsPage, AllDocsRow, AllDocsRowValue};
use crate::replicator::Replicator;
use crate::storage::schema::{self, SCHEMA_V1};
use crate::storage::SqlEngine;
use crate::types::{create_docid, create_rev_digest, RevId, Sequence};
use crate::validation::{ValidationContext, Validator};

/// The main Vellum database handle.
///
/// Create an instance with [`Vellum::open()`] and release it with
/// [`Vellum::close()`] (or [`Vellum::delete_database()`] to remove the
/// files). All revision-store operations live on this type.
pub struct Vellum {
    /// SQLite adapter; owns the connection and transaction nesting.
    engine: SqlEngine,

    /// Path of the database file.
    path: PathBuf,

    /// Sibling directory holding attachment content.
    attachments_path: PathBuf,

    /// Configuration used to open this database.
    config: Config,

    /// Blob-store collaborator; [`NoopAttachments`] until one is
    /// installed.
    attachments: Box<dyn AttachmentStore>,

    /// Ordered write validators.
    validations: Vec<Validator>,

    /// Change-feed subscribers.
    notifier: ChangeNotifier,

    /// Active replicators, one per (remote, direction).
    replicators: Vec<Rc<Replicator>>,
}

/// One `revs` row, as the tree-walking operations see it.
struct RevRow {
    sequence: i64,
    parent: Option<i64>,
    rev_id: RevId,
    deleted: bool,
}

impl RevRow {
    fn to_revision(&self, docid: &str) -> Revision {
        Revision {
            docid: Some(docid.to_string()),
            rev_id: Some(self.rev_id.clone()),
            deleted: self.deleted,
            sequence: self.sequence as Sequence,
            body: None,
        }
    }
}

impl std::fmt::Debug for Vellum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vellum")
            .field("path", &self.path)
            .field("validations", &self.validations.len())
            .field("replicators", &self.replicators.len())
            .finish_non_exhaustive()
    }
}

impl Vellum {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens or creates a database at the specified path.
    ///
    /// A fresh file gets the full version-1 schema. Foreign keys are
    /// enforced on every open. The sibling attachment directory
    /// (`<stem> attachments/`) is created beside the file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid (see [`Config::validate`])
    /// - The stored schema version is 100 or later (future release)
    /// - Any schema statement or pragma fails
    ///
    /// In every failure case the engine is closed again before
    /// returning; the caller never holds a partially opened database.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        info!("Opening database");
        let engine = SqlEngine::open(&path, &config)?;

        if let Err(err) = Self::prepare_schema(&engine) {
            let _ = engine.close();
            return Err(err);
        }

        let attachments_path = attachments_directory(&path);
        if let Err(err) = std::fs::create_dir_all(&attachments_path) {
            let _ = engine.close();
            return Err(err.into());
        }

        info!("Database opened");
        Ok(Self {
            engine,
            path,
            attachments_path,
            config,
            attachments: Box::new(NoopAttachments),
            validations: Vec::new(),
            notifier: ChangeNotifier::new(),
            replicators: Vec::new(),
        })
    }

    /// Verifies (or installs) the schema on a just-opened engine.
    fn prepare_schema(engine: &SqlEngine) -> Result<()> {
        engine.execute_batch("PRAGMA foreign_keys = ON")?;

        let version: i32 = engine
            .query_row("PRAGMA user_version", [], |row| row.get(0))?
            .unwrap_or(0);

        if version == 0 {
            debug!("fresh database; installing schema version 1");
            engine.begin_transaction()?;
            let installed = engine.execute_batch(SCHEMA_V1);
            engine.end_transaction(installed.is_ok())?;
            installed?;
        } else if !schema::is_compatible(version) {
            return Err(VellumError::SchemaIncompatible { version });
        }
        Ok(())
    }

    /// Reports whether a database file is present at `path`.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().is_file()
    }

    /// Closes the database, stopping replicator bookkeeping and
    /// releasing the engine. Consumes the handle.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing database");
        for replicator in &self.replicators {
            replicator.stop();
        }
        self.engine.close()
    }

    /// Closes the database, then removes the file and the attachment
    /// directory.
    #[instrument(skip(self))]
    pub fn delete_database(self) -> Result<()> {
        info!("Deleting database");
        let Vellum {
            engine,
            path,
            attachments_path,
            replicators,
            ..
        } = self;

        for replicator in &replicators {
            replicator.stop();
        }
        engine.close()?;
        std::fs::remove_file(&path)?;
        if attachments_path.exists() {
            std::fs::remove_dir_all(&attachments_path)?;
        }
        Ok(())
    }

    /// Returns the path of the database file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the sibling attachment directory.
    #[inline]
    pub fn attachments_path(&self) -> &Path {
        &self.attachments_path
    }

    /// Returns the configuration used to open this database.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Installs the attachment content collaborator.
    pub fn set_attachment_store(&mut self, store: Box<dyn AttachmentStore>) {
        self.attachments = store;
    }

    /// Appends a validator to the ordered registry consulted on every
    /// write.
    pub fn add_validation(&mut self, validator: Validator) {
        self.validations.push(validator);
    }

    /// Registers a change-feed subscriber.
    ///
    /// Events are delivered after the writing transaction commits.
    /// Subscribers must not re-enter write operations on this database
    /// from the delivery context.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Fetches a revision of a document.
    ///
    /// With `rev_id`, returns that revision from any branch of the
    /// tree. Without, returns the current non-deleted leaf with the
    /// lexicographically greatest rev id, or `None` for a missing or
    /// deleted document.
    ///
    /// The body is expanded: `_id`, `_rev`, an `_attachments` dictionary
    /// (metadata only; always present), and `_deleted: true` on a
    /// tombstone.
    #[instrument(skip(self))]
    pub fn get_document(&self, docid: &str, rev_id: Option<&RevId>) -> Result<Option<Revision>> {
        let Some(doc_id) = self.doc_numeric_id(docid)? else {
            return Ok(None);
        };

        let row = match rev_id {
            Some(rev) => self
                .engine
                .query_row(
                    "SELECT sequence, deleted, json FROM revs \
                     WHERE doc_id = ?1 AND revid = ?2 LIMIT 1",
                    params![doc_id, rev.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, bool>(1)?,
                            row.get::<_, Option<Vec<u8>>>(2)?,
                        ))
                    },
                )?
                .map(|(seq, deleted, json)| (seq, rev.clone(), deleted, json)),
            None => self.engine.query_row(
                "SELECT sequence, revid, deleted, json FROM revs \
                 WHERE doc_id = ?1 AND current = 1 AND deleted = 0 \
                 ORDER BY revid DESC LIMIT 1",
                params![doc_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        RevId::new(row.get::<_, String>(1)?),
                        row.get::<_, bool>(2)?,
                        row.get::<_, Option<Vec<u8>>>(3)?,
                    ))
                },
            )?,
        };

        let Some((sequence, rev_id, deleted, json)) = row else {
            return Ok(None);
        };

        let attachments = attachments_for_sequence(
            &self.engine,
            sequence as Sequence,
            self.attachments.as_ref(),
            false,
        )?;
        let body = expand_body(json.as_deref(), docid, &rev_id, deleted, attachments)?;

        Ok(Some(Revision {
            docid: Some(docid.to_string()),
            rev_id: Some(rev_id),
            deleted,
            sequence: sequence as Sequence,
            body: Some(body),
        }))
    }

    /// Fills in the body of a revision identified by `(docid, rev_id)`.
    ///
    /// A revision that already carries a body and a sequence is left
    /// untouched. With `with_attachments`, content the installed
    /// attachment store can produce is inlined base64 into the
    /// `_attachments` entries.
    ///
    /// # Errors
    ///
    /// Not-found (404) if no such revision exists; storage errors
    /// otherwise. The body may still expand to only the reserved keys
    /// if the revision was compacted.
    pub fn load_body(&self, rev: &mut Revision, with_attachments: bool) -> Result<()> {
        if rev.body.is_some() && rev.sequence > 0 {
            return Ok(());
        }

        let docid = rev
            .docid
            .clone()
            .ok_or_else(|| VellumError::bad_request("revision carries no docid"))?;
        let rev_id = rev
            .rev_id
            .clone()
            .ok_or_else(|| VellumError::bad_request("revision carries no rev id"))?;

        let doc_id = self
            .doc_numeric_id(&docid)?
            .ok_or_else(|| VellumError::not_found(format!("document {docid}")))?;

        let (sequence, json) = self
            .engine
            .query_row(
                "SELECT sequence, json FROM revs WHERE doc_id = ?1 AND revid = ?2 LIMIT 1",
                params![doc_id, rev_id.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<Vec<u8>>>(1)?)),
            )?
            .ok_or_else(|| VellumError::not_found(format!("revision {docid}/{rev_id}")))?;

        rev.sequence = sequence as Sequence;
        let attachments = attachments_for_sequence(
            &self.engine,
            rev.sequence,
            self.attachments.as_ref(),
            with_attachments,
        )?;
        rev.body = Some(expand_body(
            json.as_deref(),
            &docid,
            &rev_id,
            rev.deleted,
            attachments,
        )?);
        Ok(())
    }

    /// Returns every revision of a document, newest sequence first.
    /// Bodies are not loaded. An unknown document yields an empty list.
    pub fn get_all_revisions(&self, docid: &str) -> Result<Vec<Revision>> {
        let Some(doc_id) = self.doc_numeric_id(docid)? else {
            return Ok(Vec::new());
        };
        let rows = self.rev_rows_for_doc(doc_id)?;
        Ok(rows.iter().map(|row| row.to_revision(docid)).collect())
    }

    /// Walks parent pointers from `rev` back to its root.
    ///
    /// Returns revisions leaf-first. An unknown document or rev id
    /// yields an empty list.
    pub fn get_revision_history(&self, rev: &Revision) -> Result<Vec<Revision>> {
        let docid = rev
            .docid
            .as_deref()
            .ok_or_else(|| VellumError::bad_request("revision carries no docid"))?;
        let rev_id = rev
            .rev_id
            .as_ref()
            .ok_or_else(|| VellumError::bad_request("revision carries no rev id"))?;

        let Some(doc_id) = self.doc_numeric_id(docid)? else {
            return Ok(Vec::new());
        };
        let rows = self.rev_rows_for_doc(doc_id)?;

        let mut history = Vec::new();
        let mut cursor = rows.iter().find(|row| row.rev_id == *rev_id);
        while let Some(row) = cursor {
            history.push(row.to_revision(docid));
            cursor = row
                .parent
                .and_then(|parent| rows.iter().find(|r| r.sequence == parent));
        }
        Ok(history)
    }

    /// Returns up to `limit` current revisions - live leaves and
    /// tombstones - with a sequence greater than `last_sequence`, in
    /// ascending sequence order. This is the replicator egress feed.
    pub fn changes_since(
        &self,
        last_sequence: Sequence,
        limit: Option<u64>,
    ) -> Result<Vec<Revision>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        self.engine.query_rows(
            "SELECT sequence, docid, revid, deleted FROM revs, docs \
             WHERE sequence > ?1 AND current = 1 AND revs.doc_id = docs.doc_id \
             ORDER BY sequence LIMIT ?2",
            params![last_sequence as i64, limit],
            |row| {
                Ok(Revision {
                    docid: Some(row.get(1)?),
                    rev_id: Some(RevId::new(row.get::<_, String>(2)?)),
                    deleted: row.get(3)?,
                    sequence: row.get::<_, i64>(0)? as Sequence,
                    body: None,
                })
            },
        )
    }

    /// Number of documents whose winning leaf is live (not deleted).
    pub fn document_count(&self) -> Result<u64> {
        let count: i64 = self
            .engine
            .query_row(
                "SELECT COUNT(DISTINCT doc_id) FROM revs WHERE current = 1 AND deleted = 0",
                [],
                |row| row.get(0),
            )?
            .unwrap_or(0);
        Ok(count as u64)
    }

    /// The greatest sequence ever assigned, or 0 for an empty store.
    pub fn last_sequence(&self) -> Result<Sequence> {
        let max: Option<i64> = self
            .engine
            .query_row("SELECT MAX(sequence) FROM revs", [], |row| row.get(0))?
            .flatten();
        Ok(max.unwrap_or(0) as Sequence)
    }

    /// Removes from `revs` every `(docid, rev_id)` pair present in local
    /// storage; what remains is what the caller must fetch from the
    /// peer. This is the replication negotiation primitive.
    pub fn find_missing_revisions(&self, revs: &mut Vec<(String, RevId)>) -> Result<()> {
        if revs.is_empty() {
            return Ok(());
        }

        let revid_args: Vec<&str> = revs.iter().map(|(_, r)| r.as_str()).collect();
        let docid_args: Vec<&str> = revs.iter().map(|(d, _)| d.as_str()).collect();
        let sql = format!(
            "SELECT docid, revid FROM revs, docs \
             WHERE revid IN ({}) AND docid IN ({}) AND revs.doc_id = docs.doc_id",
            sql_placeholders(revid_args.len()),
            sql_placeholders(docid_args.len()),
        );

        let found = self.engine.query_rows(
            &sql,
            params_from_iter(revid_args.iter().chain(docid_args.iter())),
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        let found: std::collections::HashSet<(String, String)> = found.into_iter().collect();

        revs.retain(|(docid, rev_id)| {
            !found.contains(&(docid.clone(), rev_id.as_str().to_owned()))
        });
        Ok(())
    }

    /// Pages over the current non-deleted leaves of all documents,
    /// ordered by docid.
    ///
    /// A document with conflicting leaves appears once, under its
    /// winning (lexicographically greatest) rev id; `limit` and `skip`
    /// count documents, not leaves. Note that `total_rows` reflects the
    /// returned page, not the table.
    #[instrument(skip(self, options))]
    pub fn get_all_docs(&self, options: &AllDocsOptions) -> Result<AllDocsPage> {
        let update_seq = if options.update_seq {
            Some(self.last_sequence()?)
        } else {
            None
        };

        let order = if options.descending { "DESC" } else { "ASC" };
        // Conflicting leaves collapse to one row per document before the
        // page window applies; the bare columns resolve from the row
        // carrying MAX(revid).
        let sql = format!(
            "SELECT docid, MAX(revid), sequence, json FROM revs, docs \
             WHERE current = 1 AND deleted = 0 AND revs.doc_id = docs.doc_id \
             GROUP BY revs.doc_id ORDER BY docid {order} LIMIT ?1 OFFSET ?2"
        );
        let limit = options.limit.map(|l| l as i64).unwrap_or(-1);

        let raw = self.engine.query_rows(
            &sql,
            params![limit, options.skip as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                ))
            },
        )?;

        let mut rows = Vec::with_capacity(raw.len());
        for (docid, revid, sequence, json) in raw {
            let rev_id = RevId::new(revid);
            let doc = if options.include_docs {
                let attachments = attachments_for_sequence(
                    &self.engine,
                    sequence as Sequence,
                    self.attachments.as_ref(),
                    false,
                )?;
                Some(expand_body(json.as_deref(), &docid, &rev_id, false, attachments)?)
            } else {
                None
            };

            rows.push(AllDocsRow {
                id: docid.clone(),
                key: docid,
                value: AllDocsRowValue {
                    rev: rev_id.to_string(),
                },
                doc,
            });
        }

        Ok(AllDocsPage {
            total_rows: rows.len() as u64,
            offset: options.skip,
            update_seq,
            rows,
        })
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Stores a new revision of a document.
    ///
    /// The candidate must not carry a rev id; the store assigns
    /// `<generation + 1>-<fresh digest>`. `prev_rev_id` names the
    /// revision being replaced, or `None` to create (or resurrect over a
    /// tombstone). The whole operation runs in one transaction and rolls
    /// back on any failure, leaving the store untouched.
    ///
    /// Returns the stored revision (docid, rev id, and sequence filled
    /// in) and [`Status::Created`] for a write or [`Status::Ok`] for a
    /// deletion. A change event with no source fires after commit.
    ///
    /// # Errors
    ///
    /// - 400: a rev id on the candidate, `prev_rev_id` without a docid,
    ///   a deletion without `prev_rev_id`, an ungrammatical
    ///   `prev_rev_id`, or a non-object body
    /// - 404: `prev_rev_id` given but the document has no current
    ///   revision at all
    /// - 409: `prev_rev_id` is stale, or a create hit a live leaf
    /// - validator status (>= 300) on rejection
    #[instrument(skip(self, rev, prev_rev_id), fields(docid = ?rev.docid))]
    pub fn put_revision(
        &self,
        rev: Revision,
        prev_rev_id: Option<&RevId>,
    ) -> Result<(Revision, Status)> {
        if rev.rev_id.is_some() {
            return Err(VellumError::bad_request(
                "candidate revision must not carry a rev id",
            ));
        }
        if prev_rev_id.is_some() && rev.docid.is_none() {
            return Err(VellumError::bad_request("prev_rev_id given without a docid"));
        }
        if rev.deleted && prev_rev_id.is_none() {
            return Err(VellumError::bad_request("deletion requires prev_rev_id"));
        }

        self.engine.begin_transaction()?;
        let result = self.put_revision_inner(rev, prev_rev_id);
        let ended = self.engine.end_transaction(result.is_ok());

        let (stored, status) = result?;
        ended?;
        self.notifier.post(ChangeEvent {
            revision: bare(&stored),
            sequence: stored.sequence,
            source: None,
        });
        Ok((stored, status))
    }

    /// The transactional body of [`put_revision`](Self::put_revision).
    fn put_revision_inner(
        &self,
        mut rev: Revision,
        prev_rev_id: Option<&RevId>,
    ) -> Result<(Revision, Status)> {
        let docid = match rev.docid.clone() {
            Some(docid) => docid,
            None => {
                let docid = create_docid();
                rev.docid = Some(docid.clone());
                docid
            }
        };
        let doc_id = self.doc_numeric_id_or_insert(&docid)?;

        let mut parent_sequence: i64 = 0;
        let previous;
        let first_insert;

        if let Some(prev_id) = prev_rev_id {
            let current_match: Option<i64> = self.engine.query_row(
                "SELECT sequence FROM revs \
                 WHERE doc_id = ?1 AND revid = ?2 AND current = 1 LIMIT 1",
                params![doc_id, prev_id.as_str()],
                |row| row.get(0),
            )?;
            match current_match {
                Some(sequence) => parent_sequence = sequence,
                None => {
                    // Distinguish a stale predecessor from a missing doc
                    let any_current: Option<i64> = self.engine.query_row(
                        "SELECT sequence FROM revs WHERE doc_id = ?1 AND current = 1 LIMIT 1",
                        params![doc_id],
                        |row| row.get(0),
                    )?;
                    return Err(if any_current.is_some() {
                        VellumError::conflict(format!(
                            "{prev_id} is not a current revision of {docid}"
                        ))
                    } else {
                        VellumError::not_found(format!("document {docid}"))
                    });
                }
            }
            previous = Some(Revision::new(&docid, prev_id.clone(), false));
            first_insert = false;
        } else {
            // A live current leaf on any branch blocks the create, even
            // when a conflicting tombstone outranks it by revid
            let live: Option<i64> = self.engine.query_row(
                "SELECT sequence FROM revs \
                 WHERE doc_id = ?1 AND current = 1 AND deleted = 0 LIMIT 1",
                params![doc_id],
                |row| row.get(0),
            )?;
            if live.is_some() {
                return Err(VellumError::conflict(format!("document {docid} already exists")));
            }

            let tombstone: Option<i64> = self.engine.query_row(
                "SELECT sequence FROM revs \
                 WHERE doc_id = ?1 AND current = 1 ORDER BY revid DESC LIMIT 1",
                params![doc_id],
                |row| row.get(0),
            )?;
            if let Some(sequence) = tombstone {
                // Resurrection: retire the winning tombstone, new root below
                self.engine
                    .execute("UPDATE revs SET current = 0 WHERE sequence = ?1", [sequence])?;
            }
            previous = None;
            first_insert = true;
        }

        self.run_validators(&rev, previous, first_insert)?;

        let generation = match prev_rev_id {
            Some(prev_id) => prev_id.generation().ok_or_else(|| {
                VellumError::bad_request(format!("invalid revision id: {prev_id}"))
            })?,
            None => 0,
        };
        let new_rev_id = RevId::new(format!("{}-{}", generation + 1, create_rev_digest()));

        let attachments_dict = rev.attachments_dict().cloned();
        let json: Option<Vec<u8>> = if rev.deleted {
            None
        } else {
            match rev.body.as_ref() {
                Some(body) => Some(strip_and_serialize(body)?),
                None => Some(b"{}".to_vec()),
            }
        };

        self.engine.execute(
            "INSERT INTO revs (doc_id, revid, parent, current, deleted, json) \
             VALUES (?1, ?2, ?3, 1, ?4, ?5)",
            params![
                doc_id,
                new_rev_id.as_str(),
                (parent_sequence > 0).then_some(parent_sequence),
                rev.deleted,
                json,
            ],
        )?;
        let sequence = self.engine.last_insert_rowid();

        if parent_sequence > 0 {
            self.engine
                .execute("UPDATE revs SET current = 0 WHERE sequence = ?1", [parent_sequence])?;
        }

        self.attachments.ingest(
            &self.engine,
            attachments_dict.as_ref(),
            sequence as Sequence,
            parent_sequence.max(0) as Sequence,
        )?;

        info!(
            docid = %docid,
            rev = %new_rev_id,
            sequence,
            deleted = rev.deleted,
            "revision stored"
        );
        rev.rev_id = Some(new_rev_id);
        rev.sequence = sequence as Sequence;

        let status = if rev.deleted { Status::Ok } else { Status::Created };
        Ok((rev, status))
    }

    /// Grafts a foreign revision and its ancestry into the tree.
    ///
    /// `history` lists rev ids newest-first, starting with `rev`'s own
    /// id. Ancestors already present locally are adopted as-is; missing
    /// intermediates become body-less stubs with `current = 0`; the leaf
    /// is inserted in full with `current = 1`. No existing leaf is
    /// retired, so a graft may introduce a conflict.
    ///
    /// On success `rev.sequence` holds the leaf's sequence, a change
    /// event carrying `source` fires after commit, and the status is
    /// 201.
    #[instrument(skip(self, rev, history, source), fields(docid = ?rev.docid, depth = history.len()))]
    pub fn force_insert(
        &self,
        rev: &mut Revision,
        history: &[RevId],
        source: Option<String>,
    ) -> Result<Status> {
        let docid = rev
            .docid
            .clone()
            .ok_or_else(|| VellumError::bad_request("revision carries no docid"))?;
        let rev_id = rev
            .rev_id
            .clone()
            .ok_or_else(|| VellumError::bad_request("revision carries no rev id"))?;
        if history.is_empty() {
            return Err(VellumError::bad_request("history must not be empty"));
        }
        if history[0] != rev_id {
            return Err(VellumError::bad_request(
                "history must start with the revision's own id",
            ));
        }

        self.engine.begin_transaction()?;
        let result = self.force_insert_inner(rev, &docid, history);
        let ended = self.engine.end_transaction(result.is_ok());

        rev.sequence = result?;
        ended?;
        self.notifier.post(ChangeEvent {
            revision: bare(rev),
            sequence: rev.sequence,
            source,
        });
        Ok(Status::Created)
    }

    /// The transactional body of [`force_insert`](Self::force_insert).
    /// Returns the leaf's sequence.
    fn force_insert_inner(
        &self,
        rev: &Revision,
        docid: &str,
        history: &[RevId],
    ) -> Result<Sequence> {
        let doc_id = self.doc_numeric_id_or_insert(docid)?;
        let local = self.rev_rows_for_doc(doc_id)?;

        if !self.validations.is_empty() {
            // Common ancestor: the newest history entry present locally
            let ancestor = history[1..]
                .iter()
                .find_map(|h| local.iter().find(|row| row.rev_id == *h))
                .map(|row| row.to_revision(docid));
            self.run_validators(rev, ancestor, false)?;
        }

        let mut parent_sequence: i64 = 0;
        let mut leaf_sequence: i64 = 0;

        // Walk oldest to newest so each row's parent already exists
        for (index, history_rev) in history.iter().enumerate().rev() {
            if let Some(row) = local.iter().find(|row| row.rev_id == *history_rev) {
                parent_sequence = row.sequence;
                if index == 0 {
                    leaf_sequence = row.sequence;
                }
                continue;
            }

            let is_leaf = index == 0;
            let json: Option<Vec<u8>> = if is_leaf {
                rev.body.as_ref().map(strip_and_serialize).transpose()?
            } else {
                None
            };
            let deleted = is_leaf && rev.deleted;

            self.engine.execute(
                "INSERT INTO revs (doc_id, revid, parent, current, deleted, json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    doc_id,
                    history_rev.as_str(),
                    (parent_sequence > 0).then_some(parent_sequence),
                    is_leaf,
                    deleted,
                    json,
                ],
            )?;
            let sequence = self.engine.last_insert_rowid();

            if is_leaf {
                leaf_sequence = sequence;
                self.attachments.ingest(
                    &self.engine,
                    rev.attachments_dict(),
                    sequence as Sequence,
                    parent_sequence.max(0) as Sequence,
                )?;
            }
            parent_sequence = sequence;
        }

        info!(
            docid = %docid,
            rev = %history[0],
            sequence = leaf_sequence,
            "foreign history grafted"
        );
        Ok(leaf_sequence as Sequence)
    }

    /// Runs the validator registry against a candidate.
    ///
    /// `first_insert` marks the no-predecessor paths (first insert and
    /// resurrection), where a rejection reports plain 403 regardless of
    /// the context's override.
    fn run_validators(
        &self,
        new_rev: &Revision,
        previous: Option<Revision>,
        first_insert: bool,
    ) -> Result<()> {
        if self.validations.is_empty() {
            return Ok(());
        }

        let mut ctx = ValidationContext::new(self, previous);
        for validator in &self.validations {
            if !validator(new_rev, &mut ctx) {
                let status = if first_insert { 403 } else { ctx.error_type() };
                debug!(status, message = ctx.error_message(), "validator rejected revision");
                return Err(VellumError::rejected(status, ctx.error_message().to_string()));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Reclaims body bytes of non-current revisions, collects
    /// unreferenced attachment blobs, and vacuums the file.
    ///
    /// History structure is preserved: every revision row (and thus
    /// every ancestry walk) survives compaction. The three steps run
    /// under no single transaction.
    #[instrument(skip(self))]
    pub fn compact(&self) -> Result<()> {
        info!("Compacting database");
        self.engine
            .execute("UPDATE revs SET json = null WHERE current = 0", [])?;

        let collected = self.attachments.garbage_collect(&self.engine)?;
        if collected > 0 {
            info!(collected, "unreferenced attachment blobs collected");
        }

        self.engine.execute_batch("VACUUM")?;
        info!("Compaction finished");
        Ok(())
    }

    // =========================================================================
    // Replication Bookkeeping
    // =========================================================================

    /// Reads the checkpoint recorded for a `(remote, direction)` pair.
    pub fn last_sequence_with_remote(&self, remote: &str, push: bool) -> Result<Option<String>> {
        let checkpoint: Option<Option<String>> = self.engine.query_row(
            "SELECT last_sequence FROM replicators WHERE remote = ?1 AND push = ?2",
            params![remote, push],
            |row| row.get(0),
        )?;
        Ok(checkpoint.flatten())
    }

    /// Records (upserts) the checkpoint for a `(remote, direction)`
    /// pair.
    pub fn set_last_sequence(&self, last_sequence: &str, remote: &str, push: bool) -> Result<()> {
        self.engine.execute(
            "INSERT OR REPLACE INTO replicators (remote, push, last_sequence) \
             VALUES (?1, ?2, ?3)",
            params![remote, push, last_sequence],
        )?;
        Ok(())
    }

    /// Finds the active replicator for a `(remote, direction)` pair.
    pub fn active_replicator(&self, remote: &str, push: bool) -> Option<Rc<Replicator>> {
        self.replicators
            .iter()
            .find(|r| r.remote() == remote && r.is_push() == push)
            .cloned()
    }

    /// Returns the active replicator for the pair, or constructs one,
    /// tracks it, and starts it.
    pub fn replicate(&mut self, remote: &str, push: bool, continuous: bool) -> Rc<Replicator> {
        if let Some(existing) = self.active_replicator(remote, push) {
            return existing;
        }
        let replicator = Rc::new(Replicator::new(remote, push, continuous));
        self.replicators.push(Rc::clone(&replicator));
        replicator.start();
        replicator
    }

    /// Forgets a replicator that reported stopping. Removal is by
    /// identity.
    pub fn replicator_did_stop(&mut self, replicator: &Rc<Replicator>) {
        replicator.stop();
        self.replicators.retain(|r| !Rc::ptr_eq(r, replicator));
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Looks up the dense numeric id for a docid.
    fn doc_numeric_id(&self, docid: &str) -> Result<Option<i64>> {
        self.engine.query_row(
            "SELECT doc_id FROM docs WHERE docid = ?1",
            params![docid],
            |row| row.get(0),
        )
    }

    /// Looks up the numeric id for a docid, inserting the docs row on
    /// first use.
    fn doc_numeric_id_or_insert(&self, docid: &str) -> Result<i64> {
        if let Some(doc_id) = self.doc_numeric_id(docid)? {
            return Ok(doc_id);
        }
        self.engine
            .execute("INSERT INTO docs (docid) VALUES (?1)", params![docid])?;
        Ok(self.engine.last_insert_rowid())
    }

    /// Fetches every revision row of a document, newest sequence first.
    fn rev_rows_for_doc(&self, doc_id: i64) -> Result<Vec<RevRow>> {
        self.engine.query_rows(
            "SELECT sequence, parent, revid, deleted FROM revs \
             WHERE doc_id = ?1 ORDER BY sequence DESC",
            params![doc_id],
            |row| {
                Ok(RevRow {
                    sequence: row.get(0)?,
                    parent: row.get(1)?,
                    rev_id: RevId::new(row.get::<_, String>(2)?),
                    deleted: row.get(3)?,
                })
            },
        )
    }
}

/// A body-less copy of a revision, as carried by change events.
fn bare(rev: &Revision) -> Revision {
    Revision {
        docid: rev.docid.clone(),
        rev_id: rev.rev_id.clone(),
        deleted: rev.deleted,
        sequence: rev.sequence,
        body: None,
    }
}

/// The sibling attachment directory: `<path_without_extension> attachments`.
fn attachments_directory(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    match path.parent() {
        Some(parent) => parent.join(format!("{stem} attachments")),
        None => PathBuf::from(format!("{stem} attachments")),
    }
}

/// `?, ?, ...` for an IN clause of `count` values.
fn sql_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
