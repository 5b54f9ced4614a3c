//! sqlsource – a batched, resumable row source feeding a migration pipeline.
//!
//! A source is a templated SQL query plus what the pipeline knows about
//! earlier passes. Each pass:
//! * substitutes the `:criteria` placeholder of the template with an id-list
//!   filter, a high-water comparison or `1=1` (see [`criteria`]),
//! * pulls rows one at a time from a [`driver::Driver`] that buffers at most a
//!   batch of them,
//! * skips rows the [`map::KeyMap`] already knows about (unless flagged for
//!   update) and rows the [`migration::PrepareRow`] hook rejects,
//! * stops at the migration's item limit and reports processed/ignored counts.
//!
//! ## Modules
//! * [`source`] – The cursor itself, [`source::SqlSource`].
//! * [`criteria`] – Query template validation and criteria substitution.
//! * [`driver`] – The driver seam and the bundled SQLite driver.
//! * [`map`] – Source key map, in memory or persisted in SQLite.
//! * [`migration`] – What the orchestrator provides: high water, limits, id lists, the prepare hook.
//! * [`key`] – Column references, key schemas and source keys.
//! * [`value`] – Values, rows and field descriptors.
//! * [`settings`] – Configuration loading.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use rusqlite::Connection;
//! use sqlsource::driver::{ConnectionTarget, SqliteDriver};
//! use sqlsource::key::KeySchema;
//! use sqlsource::map::MemoryKeyMap;
//! use sqlsource::migration::MigrationContext;
//! use sqlsource::source::{SourceDefinition, SourceOptions, SqlSource};
//! use sqlsource::value::Fields;
//!
//! let uri = "file:quickstart?mode=memory&cache=shared";
//! let seed = Connection::open(uri).unwrap();
//! seed.execute_batch("create table t (id integer primary key, name text); insert into t (name) values ('a'), ('b');").unwrap();
//! let definition = SourceDefinition {
//!     query: "select id, name from t where :criteria order by id".into(),
//!     count_query: "select count(*) from t".into(),
//!     fields: Fields::new().with("id", "Identifier").with("name", "Name"),
//!     key: KeySchema::single("id"),
//! };
//! let mut source = SqlSource::new(
//!     SqliteDriver,
//!     ConnectionTarget::sqlite(uri),
//!     definition,
//!     SourceOptions::default(),
//!     Arc::new(MemoryKeyMap::new()),
//! ).unwrap();
//! assert_eq!(source.compute_count().unwrap(), 2);
//! source.start(&MigrationContext::new()).unwrap();
//! let mut names = Vec::new();
//! while let Some(row) = source.current() {
//!     names.push(row.get("name").unwrap().to_text());
//!     source.advance().unwrap();
//! }
//! assert_eq!(names, ["a", "b"]);
//! ```

pub mod criteria;
pub mod driver;
pub mod error;
pub mod key;
pub mod map;
pub mod migration;
pub mod settings;
pub mod source;
pub mod value;

pub use error::{Result, SourceError};
