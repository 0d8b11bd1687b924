//! Thin synchronous adapter over the SQLite engine.
//!
//! [`SqlEngine`] owns the connection and exposes exactly what the
//! revision store needs: parameterized update/query, last-insert-id,
//! affected-row counts, and reference-counted nested transactions.
//! Busy waits on the engine's internal lock are bounded by the
//! configured timeout; there are no implicit retries above that.
//!
//! # Transaction Nesting
//!
//! `begin_transaction` increments a depth counter and opens the real
//! transaction on the 0 -> 1 transition. `end_transaction(ok)` records
//! `!ok` in a sticky failure flag; on the 1 -> 0 transition it commits
//! if the flag is clear, otherwise rolls back. The flag can only be set
//! by callers, never cleared; it resets when the outermost level ends.
//! Cross-depth partial rollback is not supported.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Params, Row};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::storage::collation::register_json_collation;

/// Synchronous wrapper around one SQLite connection.
///
/// Deliberately not `Sync`: the connection and the transaction state are
/// single-threaded, matching the one-owning-context model of the store.
pub struct SqlEngine {
    conn: Connection,
    path: PathBuf,
    txn_depth: Cell<u32>,
    txn_failed: Cell<bool>,
}

impl SqlEngine {
    /// Opens (or creates) the database file and prepares the connection:
    /// bounds busy waits and registers the `JSON` collation.
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(config.busy_timeout)?;
        register_json_collation(&conn)?;

        debug!(path = %path.display(), "SQL engine opened");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            txn_depth: Cell::new(0),
            txn_failed: Cell::new(false),
        })
    }

    /// Closes the connection, reporting any failure to flush.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| err)?;
        Ok(())
    }

    /// Returns the path of the database file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Executes a parameterized update; returns the affected-row count.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    /// Executes a batch of semicolon-separated statements without
    /// parameters (pragmas, DDL).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Runs a query expected to yield at most one row, mapping it with
    /// `f`. Returns `None` when the query yields no rows.
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        Ok(self.conn.query_row(sql, params, f).optional()?)
    }

    /// Runs a query and maps every row with `f`, in cursor order.
    pub fn query_rows<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }

    /// The rowid assigned by the most recent successful INSERT.
    #[inline]
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Rows changed by the most recent UPDATE/INSERT/DELETE.
    #[inline]
    pub fn changes(&self) -> u64 {
        self.conn.changes() as u64
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Enters a (possibly nested) transaction level.
    pub fn begin_transaction(&self) -> Result<()> {
        let depth = self.txn_depth.get();
        if depth == 0 {
            self.conn.execute_batch("BEGIN")?;
            self.txn_failed.set(false);
        }
        self.txn_depth.set(depth + 1);
        Ok(())
    }

    /// Leaves one transaction level.
    ///
    /// `ok = false` marks the whole nesting as failed; the mark is
    /// sticky. When the outermost level ends, the transaction commits if
    /// no level failed, otherwise rolls back. Returns whether the
    /// nesting is still (or ended) clean.
    pub fn end_transaction(&self, ok: bool) -> Result<bool> {
        let depth = self.txn_depth.get();
        if depth == 0 {
            warn!("end_transaction called outside a transaction");
            return Ok(false);
        }

        if !ok {
            self.txn_failed.set(true);
        }

        let depth = depth - 1;
        self.txn_depth.set(depth);

        if depth > 0 {
            return Ok(!self.txn_failed.get());
        }

        let failed = self.txn_failed.get();
        self.txn_failed.set(false);
        if failed {
            self.conn.execute_batch("ROLLBACK")?;
            debug!("transaction rolled back");
        } else {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(!failed)
    }

    /// True while at least one transaction level is open.
    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.txn_depth.get() > 0
    }
}

impl std::fmt::Debug for SqlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlEngine")
            .field("path", &self.path)
            .field("txn_depth", &self.txn_depth.get())
            .finish_non_exhaustive()
    }
}
