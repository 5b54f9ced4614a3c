//! The batched row cursor.
//!
//! A [`SqlSource`] owns one connection and at most one open result. A pass
//! looks like this:
//!
//! ```text
//! start(migration) -> criteria substituted, query executed, first row primed
//! current()        -> the row last yielded, None once the pass is over
//! advance()        -> fetch -> limit check -> dedup -> prepare, until a row is yielded
//! ```
//!
//! Rows skipped by the key map or rejected by the prepare hook count as
//! ignored; yielded rows count as processed. The open result is released as
//! soon as the pass ends, whichever way it ends, and the connection is closed
//! by [`SqlSource::close`] or on drop.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::criteria::{Criteria, QueryTemplate};
use crate::driver::{ConnectionTarget, Driver};
use crate::error::{Result, SourceError};
use crate::key::KeySchema;
use crate::map::KeyMap;
use crate::migration::{AcceptAll, Migration, PrepareRow};
use crate::value::{Fields, Row, Value};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOptions {
    /// Fetch hint handed to the driver, rows buffered at most.
    pub batch_size: usize,
    /// Whether [`SqlSource::count`] may reuse a previous result.
    pub cache_counts: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, cache_counts: false }
    }
}

/// Everything describing what to read.
#[derive(Debug, Clone)]
pub struct SourceDefinition {
    pub query: String,
    pub count_query: String,
    pub fields: Fields,
    pub key: KeySchema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Unopened,
    Open,
    Exhausted,
    /// The item limit was reached before the result was exhausted.
    Limited,
    Failed,
}

impl CursorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Limited | Self::Failed)
    }
}

pub struct SqlSource<D: Driver> {
    driver: D,
    target: ConnectionTarget,
    template: QueryTemplate,
    count_query: String,
    fields: Fields,
    key: KeySchema,
    options: SourceOptions,
    key_map: Arc<dyn KeyMap>,
    prepare: Box<dyn PrepareRow>,
    // per source
    connection: Option<D::Connection>,
    cached_count: Option<u64>,
    // per pass
    results: Option<D::Results>,
    active_query: Option<String>,
    state: CursorState,
    current: Option<Row>,
    item_limit: u64,
    high_water_field: Option<String>,
    high_water_mark: Option<Value>,
    num_processed: u64,
    num_ignored: u64,
}

impl<D: Driver> SqlSource<D> {
    pub fn new(
        driver: D,
        target: ConnectionTarget,
        definition: SourceDefinition,
        options: SourceOptions,
        key_map: Arc<dyn KeyMap>,
    ) -> Result<Self> {
        let template = QueryTemplate::new(definition.query)?;
        if options.batch_size == 0 {
            return Err(SourceError::Configuration("batch size must be positive".into()));
        }
        if definition.count_query.trim().is_empty() {
            return Err(SourceError::Configuration("count query is empty".into()));
        }
        Ok(Self {
            driver,
            target,
            template,
            count_query: definition.count_query,
            fields: definition.fields,
            key: definition.key,
            options,
            key_map,
            prepare: Box::new(AcceptAll),
            connection: None,
            cached_count: None,
            results: None,
            active_query: None,
            state: CursorState::Unopened,
            current: None,
            item_limit: 0,
            high_water_field: None,
            high_water_mark: None,
            num_processed: 0,
            num_ignored: 0,
        })
    }

    /// Installs the per-row hook run after the dedup check.
    pub fn with_prepare(mut self, prepare: impl PrepareRow + 'static) -> Self {
        self.prepare = Box::new(prepare);
        self
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }
    pub fn key_schema(&self) -> &KeySchema {
        &self.key
    }
    pub fn options(&self) -> &SourceOptions {
        &self.options
    }
    pub fn state(&self) -> CursorState {
        self.state
    }
    /// The query of the current pass, after substitution.
    pub fn active_query(&self) -> Option<&str> {
        self.active_query.as_deref()
    }
    pub fn num_processed(&self) -> u64 {
        self.num_processed
    }
    pub fn num_ignored(&self) -> u64 {
        self.num_ignored
    }
    /// Greatest high-water field value among the rows yielded this pass.
    pub fn high_water_mark(&self) -> Option<&Value> {
        self.high_water_mark.as_ref()
    }
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn check_driver(&self) -> Result<()> {
        if self.target.driver.eq_ignore_ascii_case(self.driver.name()) {
            Ok(())
        } else {
            Err(SourceError::Configuration(format!(
                "driver '{}' is not available, this build provides '{}'",
                self.target.driver,
                self.driver.name()
            )))
        }
    }

    fn open(&self) -> Result<D::Connection> {
        self.check_driver()?;
        self.driver.connect(&self.target).inspect_err(|e| {
            if !e.is_fatal() {
                warn!(database = %self.target.database, error = %e, "could not connect");
            }
        })
    }

    /// Establishes the main connection unless one is already open.
    pub fn connect(&mut self) -> Result<()> {
        if self.connection.is_none() {
            let connection = self.open()?;
            debug!(database = %self.target.database, "connected");
            self.connection = Some(connection);
        }
        Ok(())
    }

    // ------------- counting -------------
    /// Runs the count query over a connection of its own, closed before returning.
    /// A failure is never reported as zero rows.
    pub fn compute_count(&self) -> Result<u64> {
        let mut connection = self.open()?;
        let counted = self.run_count(&mut connection);
        if let Err(e) = self.driver.close(connection) {
            warn!(error = %e, "count connection did not close cleanly");
        }
        counted
    }

    fn run_count(&self, connection: &mut D::Connection) -> Result<u64> {
        let sql = self.count_query.as_str();
        let mut results = self.driver.execute(connection, sql, 1)?;
        let first = self.driver.fetch_next(connection, &mut results);
        self.driver.release(connection, results);
        let row = first?.ok_or_else(|| SourceError::query("count query returned no rows", sql))?;
        match row.values().first().and_then(Value::as_i64) {
            Some(n) if n >= 0 => Ok(n as u64),
            _ => Err(SourceError::query(
                format!("count query returned {:?} instead of a non-negative integer", row.values().first()),
                sql,
            )),
        }
    }

    /// Like [`SqlSource::compute_count`], reusing the last result when counts may be cached.
    pub fn count(&mut self, refresh: bool) -> Result<u64> {
        if self.options.cache_counts && !refresh {
            if let Some(n) = self.cached_count {
                return Ok(n);
            }
        }
        let n = self.compute_count()?;
        if self.options.cache_counts {
            self.cached_count = Some(n);
        }
        Ok(n)
    }

    // ------------- iteration -------------
    /// Begins a pass: substitutes the criteria, executes the query and primes the first row.
    pub fn start(&mut self, migration: &dyn Migration) -> Result<()> {
        self.release_results();
        self.current = None;
        self.num_processed = 0;
        self.num_ignored = 0;
        self.high_water_mark = None;
        self.state = CursorState::Unopened;

        let id_list = migration.id_list();
        let high_water_field = migration.high_water_field();
        let high_water = migration.high_water();
        let criteria = Criteria::resolve(
            id_list.as_deref(),
            high_water_field.as_ref().zip(high_water.as_deref()),
            &self.key,
        );
        let sql = self.template.substitute(&criteria);
        self.item_limit = migration.item_limit().unwrap_or(0);
        self.high_water_field = high_water_field.map(|f| f.name);
        info!(query = %sql, limit = self.item_limit, "starting pass");
        self.active_query = Some(sql);

        if let Err(e) = self.execute_active() {
            self.state = CursorState::Failed;
            return Err(e);
        }
        self.state = CursorState::Open;
        self.advance()
    }

    fn execute_active(&mut self) -> Result<()> {
        self.connect()?;
        let (Some(connection), Some(sql)) = (self.connection.as_mut(), self.active_query.as_deref()) else {
            return Err(SourceError::Connection("no connection available".into()));
        };
        self.results = Some(self.driver.execute(connection, sql, self.options.batch_size)?);
        Ok(())
    }

    /// Moves to the next eligible row. Once the pass is over this leaves
    /// [`SqlSource::current`] empty; a failed fetch additionally returns the error.
    pub fn advance(&mut self) -> Result<()> {
        self.current = None;
        if self.state != CursorState::Open {
            return Ok(());
        }
        match self.next_eligible() {
            Ok(Some(row)) => {
                self.current = Some(row);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.finish(CursorState::Failed);
                Err(e)
            }
        }
    }

    fn fetch_raw(&mut self) -> Result<Option<Row>> {
        match (self.connection.as_mut(), self.results.as_mut()) {
            (Some(connection), Some(results)) => self.driver.fetch_next(connection, results),
            _ => Err(SourceError::Fetch("no open result".into())),
        }
    }

    fn next_eligible(&mut self) -> Result<Option<Row>> {
        loop {
            let Some(mut row) = self.fetch_raw()? else {
                self.finish(CursorState::Exhausted);
                return Ok(None);
            };
            if self.item_limit > 0 && self.num_processed >= self.item_limit {
                self.finish(CursorState::Limited);
                return Ok(None);
            }
            let key = self.key.source_key(&row)?;
            if let Some(entry) = self.key_map.lookup(&key)? {
                if !entry.needs_update {
                    self.num_ignored += 1;
                    debug!(key = %key, "already migrated, skipping");
                    continue;
                }
            }
            if !self.prepare.prepare_row(&mut row) {
                self.num_ignored += 1;
                debug!(key = %key, "rejected by prepare hook");
                continue;
            }
            self.num_processed += 1;
            self.track_high_water(&row);
            return Ok(Some(row));
        }
    }

    fn track_high_water(&mut self, row: &Row) {
        let Some(value) = self.high_water_field.as_deref().and_then(|f| row.get(f)) else {
            return;
        };
        if value.is_null() {
            return;
        }
        let higher = match &self.high_water_mark {
            Some(mark) => value.high_water_cmp(mark).is_gt(),
            None => true,
        };
        if higher {
            self.high_water_mark = Some(value.clone());
        }
    }

    fn release_results(&mut self) {
        if let Some(results) = self.results.take() {
            if let Some(connection) = self.connection.as_mut() {
                self.driver.release(connection, results);
            }
        }
    }

    fn finish(&mut self, state: CursorState) {
        self.release_results();
        self.state = state;
        info!(
            state = ?state,
            processed = self.num_processed,
            ignored = self.num_ignored,
            "pass finished"
        );
    }

    /// The row last yielded by [`SqlSource::advance`].
    pub fn current(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Releases any open result and closes the main connection.
    pub fn close(&mut self) -> Result<()> {
        self.release_results();
        if self.state == CursorState::Open {
            self.state = CursorState::Exhausted;
        }
        self.current = None;
        match self.connection.take() {
            Some(connection) => {
                debug!(database = %self.target.database, "closing");
                self.driver.close(connection)
            }
            None => Ok(()),
        }
    }
}

impl<D: Driver> Drop for SqlSource<D> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "source did not close cleanly");
        }
    }
}

/// The unsubstituted query template.
impl<D: Driver> fmt::Display for SqlSource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.template)
    }
}
