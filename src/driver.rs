//! Database driver seam and the SQLite implementation.
//!
//! The source only ever talks to a [`Driver`]: connect, execute, fetch one
//! row at a time, release the result and close. A driver is expected to keep
//! at most one batch of rows buffered, whatever the size of the result.
//!
//! [`SqliteDriver`] runs the active query once into a temporary table and
//! pages that snapshot by rowid. Changes made to the source tables while a
//! result is open are not seen by it, no lock is held between fetches and
//! every page is a keyed seek. The snapshot is dropped on release. Every
//! statement run is guarded by an optional deadline enforced through SQLite's
//! progress handler.

// used for the bundled relational driver
use rusqlite::{Connection, ErrorCode, OpenFlags, params};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, SourceError};
use crate::value::{Row, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Name of the driver the configuration asks for.
    pub driver: String,
    /// Host, DSN or (for SQLite) a path or `file:` URI.
    pub database: String,
    pub credentials: Option<Credentials>,
    pub read_only: bool,
    /// Deadline applied to each individual driver call.
    pub timeout: Option<Duration>,
}

impl ConnectionTarget {
    pub fn sqlite(database: impl Into<String>) -> Self {
        Self {
            driver: SqliteDriver::NAME.to_string(),
            database: database.into(),
            credentials: None,
            read_only: false,
            timeout: None,
        }
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub trait Driver {
    type Connection;
    type Results;

    /// The driver name configurations refer to.
    fn name(&self) -> &str;
    fn connect(&self, target: &ConnectionTarget) -> Result<Self::Connection>;
    fn execute(&self, connection: &mut Self::Connection, sql: &str, batch_size: usize) -> Result<Self::Results>;
    /// `Ok(None)` is the normal end of data, errors are reported separately.
    fn fetch_next(&self, connection: &mut Self::Connection, results: &mut Self::Results) -> Result<Option<Row>>;
    fn release(&self, connection: &mut Self::Connection, results: Self::Results);
    fn close(&self, connection: Self::Connection) -> Result<()>;
}

// ------------- SQLite -------------
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub const NAME: &'static str = "sqlite";
}

pub struct SqliteConnection {
    db: Connection,
    timeout: Option<Duration>,
    deadline: Arc<Mutex<Option<Instant>>>,
    // names the snapshot tables of this connection
    snapshots: u64,
}

impl SqliteConnection {
    fn arm(&self) -> Armed<'_> {
        if let (Some(timeout), Ok(mut deadline)) = (self.timeout, self.deadline.lock()) {
            *deadline = Some(Instant::now() + timeout);
        }
        Armed(&self.deadline)
    }
}

// Clears the deadline when the guarded call returns.
struct Armed<'a>(&'a Mutex<Option<Instant>>);
impl Drop for Armed<'_> {
    fn drop(&mut self) {
        if let Ok(mut deadline) = self.0.lock() {
            *deadline = None;
        }
    }
}

pub struct SqliteResults {
    snapshot: String,
    page_sql: String,
    columns: Arc<Vec<String>>,
    buffer: VecDeque<Row>,
    last_rowid: i64,
    fetched: u64,
    batch_size: usize,
    done: bool,
}

impl SqliteResults {
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn classify(e: rusqlite::Error, sql: &str, fetching: bool) -> SourceError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::OperationInterrupted => {
            SourceError::Timeout(format!("statement exceeded its deadline: {sql}"))
        }
        _ if fetching => SourceError::Fetch(e.to_string()),
        _ => SourceError::query(e.to_string(), sql),
    }
}

impl SqliteDriver {
    fn load_page(&self, connection: &SqliteConnection, results: &mut SqliteResults) -> Result<()> {
        let _armed = connection.arm();
        let sql = results.page_sql.as_str();
        let mut statement = connection.db.prepare_cached(sql).map_err(|e| classify(e, sql, true))?;
        let mut rows = statement
            .query(params![results.last_rowid, results.batch_size as i64])
            .map_err(|e| classify(e, sql, true))?;
        let width = results.columns.len();
        let mut fetched = 0;
        while let Some(row) = rows.next().map_err(|e| classify(e, sql, true))? {
            // column 0 is the snapshot rowid
            results.last_rowid = row.get(0).map_err(|e| classify(e, sql, true))?;
            let mut values = Vec::with_capacity(width);
            for i in 1..=width {
                values.push(Value::from(row.get_ref(i).map_err(|e| classify(e, sql, true))?));
            }
            results.buffer.push_back(Row::new(Arc::clone(&results.columns), values));
            fetched += 1;
        }
        results.fetched += fetched as u64;
        results.done = fetched < results.batch_size;
        debug!(snapshot = %results.snapshot, fetched = results.fetched, "page loaded");
        Ok(())
    }
}

impl Driver for SqliteDriver {
    type Connection = SqliteConnection;
    type Results = SqliteResults;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn connect(&self, target: &ConnectionTarget) -> Result<SqliteConnection> {
        // never create: a missing source database is a connection failure
        let access = if target.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let flags = access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if target.credentials.is_some() {
            debug!(database = %target.database, "sqlite ignores credentials");
        }
        let db = Connection::open_with_flags(&target.database, flags)
            .map_err(|e| SourceError::Connection(format!("{}: {e}", target.database)))?;
        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        if let Some(timeout) = target.timeout {
            db.busy_timeout(timeout)
                .map_err(|e| SourceError::Connection(e.to_string()))?;
            let watched = Arc::clone(&deadline);
            db.progress_handler(
                1_000,
                Some(move || {
                    watched
                        .lock()
                        .map(|d| d.is_some_and(|t| Instant::now() >= t))
                        .unwrap_or(false)
                }),
            );
        }
        Ok(SqliteConnection { db, timeout: target.timeout, deadline, snapshots: 0 })
    }

    fn execute(&self, connection: &mut SqliteConnection, sql: &str, batch_size: usize) -> Result<SqliteResults> {
        let inner = sql.trim().trim_end_matches(';');
        connection.snapshots += 1;
        let snapshot = format!("sqlsource_result_{}", connection.snapshots);
        let _armed = connection.arm();
        // the query's own column names, the snapshot may rename duplicates
        let columns = {
            let statement = connection.db.prepare(inner).map_err(|e| classify(e, sql, false))?;
            statement.column_names().into_iter().map(String::from).collect::<Vec<_>>()
        };
        connection
            .db
            .execute_batch(&format!("create temp table {snapshot} as {inner};"))
            .map_err(|e| classify(e, sql, false))?;
        debug!(snapshot = %snapshot, "result captured");
        Ok(SqliteResults {
            page_sql: format!("select _rowid_, * from temp.{snapshot} where _rowid_ > ?1 order by _rowid_ limit ?2"),
            snapshot,
            columns: Arc::new(columns),
            buffer: VecDeque::with_capacity(batch_size),
            last_rowid: 0,
            fetched: 0,
            batch_size: batch_size.max(1),
            done: false,
        })
    }

    fn fetch_next(&self, connection: &mut SqliteConnection, results: &mut SqliteResults) -> Result<Option<Row>> {
        if results.buffer.is_empty() && !results.done {
            self.load_page(connection, results)?;
        }
        Ok(results.buffer.pop_front())
    }

    fn release(&self, connection: &mut SqliteConnection, results: SqliteResults) {
        if let Err(e) = connection.db.execute_batch(&format!("drop table if exists temp.{};", results.snapshot)) {
            warn!(snapshot = %results.snapshot, error = %e, "snapshot not dropped");
        }
        debug!(fetched = results.fetched, dropped = results.buffer.len(), "result released");
    }

    fn close(&self, connection: SqliteConnection) -> Result<()> {
        connection
            .db
            .close()
            .map_err(|(_, e)| SourceError::Connection(format!("close failed: {e}")))
    }
}
