#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::{Connection, params};
use sqlsource::driver::{ConnectionTarget, Driver, SqliteDriver};
use sqlsource::error::{Result, SourceError};
use sqlsource::key::KeySchema;
use sqlsource::map::{KeyMap, MemoryKeyMap};
use sqlsource::source::{SourceDefinition, SourceOptions, SqlSource};
use sqlsource::value::{Fields, Row, Value};

pub const TEMPLATE: &str = "SELECT id, name, modified FROM t WHERE :criteria ORDER BY id";

/// A shared in-memory database living as long as the returned connection.
pub fn seed(name: &str, rows: &[(i64, &str, &str)]) -> (Connection, String) {
    let uri = format!("file:{name}?mode=memory&cache=shared");
    let db = Connection::open(&uri).expect("open seed database");
    db.execute_batch("create table t (id integer primary key, name text not null, modified text not null);")
        .expect("schema");
    for (id, name, modified) in rows {
        db.execute("insert into t (id, name, modified) values (?1, ?2, ?3)", params![id, name, modified])
            .expect("insert");
    }
    (db, uri)
}

pub fn three_rows() -> Vec<(i64, &'static str, &'static str)> {
    vec![(1, "Alice", "2019-12-31"), (2, "Bob", "2020-01-02"), (3, "Carol", "2020-03-01")]
}

pub fn definition(query: &str) -> SourceDefinition {
    SourceDefinition {
        query: query.to_string(),
        count_query: "select count(*) from t".to_string(),
        fields: Fields::new()
            .with("id", "Identifier")
            .with("name", "Display name")
            .with("modified", "Last change"),
        key: KeySchema::single("id"),
    }
}

pub fn sqlite_source(uri: &str, options: SourceOptions, map: Arc<dyn KeyMap>) -> SqlSource<SqliteDriver> {
    SqlSource::new(SqliteDriver, ConnectionTarget::sqlite(uri), definition(TEMPLATE), options, map)
        .expect("valid source")
}

pub fn plain_source(uri: &str) -> SqlSource<SqliteDriver> {
    sqlite_source(uri, SourceOptions::default(), Arc::new(MemoryKeyMap::new()))
}

/// Drains the current pass, returning the ids yielded.
pub fn drain<D: Driver>(source: &mut SqlSource<D>) -> Vec<i64> {
    let mut ids = Vec::new();
    while let Some(row) = source.current() {
        ids.push(row.get("id").and_then(Value::as_i64).expect("integer id"));
        source.advance().expect("advance");
    }
    ids
}

pub fn id_key(id: i64) -> sqlsource::key::SourceKey {
    sqlsource::key::SourceKey::new(vec![("id".to_string(), Value::Integer(id))])
}

// ------------- ScriptedDriver -------------
/// Driver serving a fixed list of ids, with failures injected where asked.
#[derive(Clone, Default)]
pub struct ScriptedDriver {
    pub ids: Vec<i64>,
    pub fail_connect: bool,
    pub fail_fetch_at: Option<usize>,
    pub count: Option<Value>,
    pub connects: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    pub fetches: Arc<AtomicUsize>,
}

pub struct ScriptedResults {
    rows: VecDeque<Row>,
    served: usize,
}

impl ScriptedDriver {
    pub fn serving(ids: impl IntoIterator<Item = i64>) -> Self {
        Self { ids: ids.into_iter().collect(), ..Self::default() }
    }
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Driver for ScriptedDriver {
    type Connection = ();
    type Results = ScriptedResults;

    fn name(&self) -> &str {
        "scripted"
    }
    fn connect(&self, _target: &ConnectionTarget) -> Result<()> {
        if self.fail_connect {
            return Err(SourceError::Connection("scripted refusal".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn execute(&self, _connection: &mut (), sql: &str, _batch_size: usize) -> Result<ScriptedResults> {
        let rows = if sql.to_lowercase().contains("count(") {
            let columns = Arc::new(vec!["count".to_string()]);
            self.count.iter().map(|v| Row::new(Arc::clone(&columns), vec![v.clone()])).collect()
        } else {
            let columns = Arc::new(vec!["id".to_string(), "name".to_string()]);
            self.ids
                .iter()
                .map(|id| Row::new(Arc::clone(&columns), vec![Value::Integer(*id), Value::from(format!("row {id}"))]))
                .collect()
        };
        Ok(ScriptedResults { rows, served: 0 })
    }
    fn fetch_next(&self, _connection: &mut (), results: &mut ScriptedResults) -> Result<Option<Row>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch_at == Some(results.served) {
            return Err(SourceError::Fetch("scripted network drop".into()));
        }
        results.served += 1;
        Ok(results.rows.pop_front())
    }
    fn release(&self, _connection: &mut (), _results: ScriptedResults) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
    fn close(&self, _connection: ()) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn scripted_target() -> ConnectionTarget {
    let mut target = ConnectionTarget::sqlite("scripted");
    target.driver = "scripted".to_string();
    target
}

pub fn scripted_source(driver: ScriptedDriver, map: Arc<dyn KeyMap>) -> SqlSource<ScriptedDriver> {
    SqlSource::new(
        driver,
        scripted_target(),
        definition("select id, name from remote where :criteria"),
        SourceOptions::default(),
        map,
    )
    .expect("valid source")
}
