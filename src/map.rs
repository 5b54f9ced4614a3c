//! Source key to destination map, consulted to skip rows already migrated.

// used for the persisted map
use rusqlite::{Connection, OptionalExtension, params};

// a fast hash for the in-memory map
use seahash::SeaHasher;

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, SourceError};
use crate::key::SourceKey;

pub type KeyHasher = BuildHasherDefault<SeaHasher>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapEntry {
    pub destination: Option<String>,
    /// A migrated row flagged for reprocessing.
    pub needs_update: bool,
}

pub trait KeyMap {
    fn lookup(&self, key: &SourceKey) -> Result<Option<MapEntry>>;
}

fn locked<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|e| SourceError::Lock(format!("{what}: {e}")))
}

// ------------- MemoryKeyMap -------------
#[derive(Debug, Default)]
pub struct MemoryKeyMap {
    kept: Mutex<HashMap<SourceKey, MapEntry, KeyHasher>>,
}

impl MemoryKeyMap {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&self, key: SourceKey, entry: MapEntry) -> Result<()> {
        locked(&self.kept, "memory key map")?.insert(key, entry);
        Ok(())
    }
    /// Returns whether the key was mapped at all.
    pub fn mark_for_update(&self, key: &SourceKey) -> Result<bool> {
        Ok(match locked(&self.kept, "memory key map")?.get_mut(key) {
            Some(entry) => {
                entry.needs_update = true;
                true
            }
            None => false,
        })
    }
    pub fn len(&self) -> Result<usize> {
        Ok(locked(&self.kept, "memory key map")?.len())
    }
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl KeyMap for MemoryKeyMap {
    fn lookup(&self, key: &SourceKey) -> Result<Option<MapEntry>> {
        Ok(locked(&self.kept, "memory key map")?.get(key).cloned())
    }
}

// ------------- SqliteKeyMap -------------
pub struct SqliteKeyMap {
    db: Mutex<Connection>,
}

fn map_err(e: rusqlite::Error) -> SourceError {
    SourceError::KeyMap(e.to_string())
}

impl SqliteKeyMap {
    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path).map_err(map_err)?)
    }
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory().map_err(map_err)?)
    }
    pub fn new(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(
                "
            create table if not exists KeyMap (
                SourceKey text not null,
                DestinationKey text null,
                NeedsUpdate integer not null default 0,
                constraint unique_and_referenceable_SourceKey primary key (
                    SourceKey
                )
            );
            create table if not exists HighWater (
                Migration text not null,
                HighWater text not null,
                constraint referenceable_Migration primary key (
                    Migration
                )
            );
            ",
            )
            .map_err(map_err)?;
        Ok(Self { db: Mutex::new(connection) })
    }
    /// Records a processed row, clearing any pending update flag.
    pub fn save(&self, key: &SourceKey, destination: Option<&str>) -> Result<()> {
        let db = locked(&self.db, "key map")?;
        db.prepare_cached(
            "
            insert into KeyMap (
                SourceKey,
                DestinationKey,
                NeedsUpdate
            ) values (?, ?, 0)
            on conflict (SourceKey) do update set
                DestinationKey = excluded.DestinationKey,
                NeedsUpdate = 0
            ",
        )
        .and_then(|mut s| s.execute(params![key.to_json(), destination]))
        .map_err(map_err)?;
        Ok(())
    }
    pub fn mark_for_update(&self, key: &SourceKey) -> Result<bool> {
        let db = locked(&self.db, "key map")?;
        let changed = db
            .prepare_cached("update KeyMap set NeedsUpdate = 1 where SourceKey = ?")
            .and_then(|mut s| s.execute(params![key.to_json()]))
            .map_err(map_err)?;
        Ok(changed > 0)
    }
    pub fn mark_all_for_update(&self) -> Result<usize> {
        let db = locked(&self.db, "key map")?;
        db.execute("update KeyMap set NeedsUpdate = 1", []).map_err(map_err)
    }
    pub fn len(&self) -> Result<u64> {
        let db = locked(&self.db, "key map")?;
        db.query_row("select count(*) from KeyMap", [], |r| r.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(map_err)
    }
    pub fn high_water(&self, migration: &str) -> Result<Option<String>> {
        let db = locked(&self.db, "key map")?;
        db.prepare_cached("select HighWater from HighWater where Migration = ?")
            .and_then(|mut s| s.query_row(params![migration], |r| r.get(0)).optional())
            .map_err(map_err)
    }
    pub fn save_high_water(&self, migration: &str, value: &str) -> Result<()> {
        let db = locked(&self.db, "key map")?;
        db.prepare_cached(
            "
            insert into HighWater (
                Migration,
                HighWater
            ) values (?, ?)
            on conflict (Migration) do update set
                HighWater = excluded.HighWater
            ",
        )
        .and_then(|mut s| s.execute(params![migration, value]))
        .map_err(map_err)?;
        Ok(())
    }
}

impl KeyMap for SqliteKeyMap {
    fn lookup(&self, key: &SourceKey) -> Result<Option<MapEntry>> {
        let db = locked(&self.db, "key map")?;
        db.prepare_cached(
            "
            select DestinationKey, NeedsUpdate
                from KeyMap
                where SourceKey = ?
            ",
        )
        .and_then(|mut s| {
            s.query_row(params![key.to_json()], |r| {
                Ok(MapEntry { destination: r.get(0)?, needs_update: r.get::<_, i64>(1)? != 0 })
            })
            .optional()
        })
        .map_err(map_err)
    }
}
