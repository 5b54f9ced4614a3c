//! Settings read through the `config` crate: a file (format picked by its
//! extension) layered with `SQLSOURCE__SECTION__KEY` environment variables.
//!
//! ```toml
//! [database]
//! path = "legacy.db"
//!
//! [source]
//! query = "select n.id, n.title, n.changed from node n where :criteria order by n.id"
//! count_query = "select count(*) from node"
//! fields = [{ name = "id", description = "Node id" }, { name = "title", description = "Title" }]
//! key = [{ name = "id", alias = "n" }]
//!
//! [migration]
//! name = "nodes"
//! high_water_field = { name = "changed", alias = "n" }
//! ```

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

use crate::driver::{ConnectionTarget, Credentials, SqliteDriver};
use crate::error::Result;
use crate::key::{ColumnRef, KeySchema};
use crate::migration::MigrationContext;
use crate::source::{DEFAULT_BATCH_SIZE, SourceDefinition, SourceOptions};
use crate::value::Fields;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub source: SourceSettings,
    #[serde(default)]
    pub migration: MigrationSettings,
    #[serde(default)]
    pub map: MapSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_driver")]
    pub driver: String,
    pub path: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSetting {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    pub query: String,
    pub count_query: String,
    #[serde(default)]
    pub fields: Vec<FieldSetting>,
    #[serde(default)]
    pub key: Vec<ColumnRef>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub cache_counts: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_migration")]
    pub name: String,
    #[serde(default)]
    pub id_list: Option<String>,
    #[serde(default)]
    pub item_limit: Option<u64>,
    #[serde(default)]
    pub high_water_field: Option<ColumnRef>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self { name: default_migration(), id_list: None, item_limit: None, high_water_field: None }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MapSettings {
    /// Where the key map lives, in memory when absent.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_driver() -> String {
    SqliteDriver::NAME.to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_migration() -> String {
    "default".to_string()
}

impl Settings {
    /// Reads `path` (optional) and the environment on top of it.
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("SQLSOURCE").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn target(&self) -> ConnectionTarget {
        let db = &self.database;
        let credentials = db.user.as_ref().map(|user| Credentials {
            user: user.clone(),
            password: db.password.clone().unwrap_or_default(),
        });
        ConnectionTarget {
            driver: db.driver.clone(),
            database: db.path.clone(),
            credentials,
            read_only: db.read_only,
            timeout: db.timeout_ms.map(Duration::from_millis),
        }
    }

    pub fn definition(&self) -> Result<SourceDefinition> {
        Ok(SourceDefinition {
            query: self.source.query.clone(),
            count_query: self.source.count_query.clone(),
            fields: self
                .source
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.description.clone()))
                .collect::<Fields>(),
            key: KeySchema::new(self.source.key.clone())?,
        })
    }

    pub fn options(&self) -> SourceOptions {
        SourceOptions { batch_size: self.source.batch_size, cache_counts: self.source.cache_counts }
    }

    /// The migration side of a pass, given the high water persisted by the last one.
    pub fn migration(&self, high_water: Option<String>) -> MigrationContext {
        let m = &self.migration;
        MigrationContext {
            high_water,
            high_water_field: m.high_water_field.clone(),
            item_limit: m.item_limit,
            id_list: m.id_list.clone(),
        }
    }
}
