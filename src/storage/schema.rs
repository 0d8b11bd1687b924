//! Database schema definitions and versioning.
//!
//! The schema is installed in one batch on a fresh store and versioned
//! through SQLite's `user_version` pragma. Version 0 means "empty file,
//! install everything"; versions at or above
//! [`MIN_INCOMPATIBLE_VERSION`] belong to a future release and the store
//! refuses to open them.
//!
//! # Table Layout
//!
//! ```text
//! docs         docid <-> dense numeric doc_id
//! revs         the revision tree: one row per revision, parent pointers
//!              by sequence, AUTOINCREMENT guarantees never-reused
//!              monotonic sequences
//! views        view descriptors for the (external) map/reduce engine
//! maps         emitted map rows, keys ordered by the JSON collation
//! attachments  per-revision attachment metadata; content lives in the
//!              sibling attachment store
//! replicators  per-peer checkpoints keyed by (remote, push)
//! ```

use rusqlite::Connection;

/// Schema version written to `user_version` after install.
pub const SCHEMA_VERSION: i32 = 1;

/// Stored versions at or above this belong to an incompatible future
/// release.
pub const MIN_INCOMPATIBLE_VERSION: i32 = 100;

/// The complete version-1 schema.
///
/// `revs.sequence` is `INTEGER PRIMARY KEY AUTOINCREMENT`: SQLite then
/// allocates rowids monotonically and never reuses them, even after row
/// deletion. Cascades remove a document's revisions, their attachments,
/// and their map rows together.
pub const SCHEMA_V1: &str = "
    CREATE TABLE docs (
        doc_id INTEGER PRIMARY KEY,
        docid TEXT UNIQUE NOT NULL);
    CREATE INDEX docs_docid ON docs(docid);

    CREATE TABLE revs (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_id INTEGER NOT NULL REFERENCES docs(doc_id) ON DELETE CASCADE,
        revid TEXT NOT NULL,
        parent INTEGER REFERENCES revs(sequence) ON DELETE SET NULL,
        current BOOLEAN,
        deleted BOOLEAN DEFAULT 0,
        json BLOB);
    CREATE INDEX revs_by_id ON revs(revid, doc_id);
    CREATE INDEX revs_current ON revs(doc_id, current);
    CREATE INDEX revs_parent ON revs(parent);

    CREATE TABLE views (
        view_id INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        version TEXT,
        lastsequence INTEGER DEFAULT 0);
    CREATE INDEX views_by_name ON views(name);

    CREATE TABLE maps (
        view_id INTEGER NOT NULL REFERENCES views(view_id) ON DELETE CASCADE,
        sequence INTEGER NOT NULL REFERENCES revs(sequence) ON DELETE CASCADE,
        key TEXT NOT NULL COLLATE JSON,
        value TEXT);
    CREATE INDEX maps_keys ON maps(view_id, key COLLATE JSON);

    CREATE TABLE attachments (
        sequence INTEGER NOT NULL REFERENCES revs(sequence) ON DELETE CASCADE,
        filename TEXT NOT NULL,
        key BLOB NOT NULL,
        type TEXT,
        length INTEGER NOT NULL);
    CREATE INDEX attachments_by_sequence ON attachments(sequence, filename);

    CREATE TABLE replicators (
        remote TEXT NOT NULL,
        push BOOLEAN,
        last_sequence TEXT,
        UNIQUE (remote, push));

    PRAGMA user_version = 1;
";

/// Reads the stored schema version (`PRAGMA user_version`).
pub fn user_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Returns true if a stored version is readable by this release.
#[inline]
pub fn is_compatible(version: i32) -> bool {
    version < MIN_INCOMPATIBLE_VERSION
}
