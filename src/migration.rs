//! What the source needs to know about the migration driving it.

use crate::key::ColumnRef;
use crate::value::Row;

/// The orchestrator side of a pass. Queried once per [`crate::source::SqlSource::start`].
pub trait Migration {
    /// Highest value seen by the last successful pass, if any.
    fn high_water(&self) -> Option<String>;
    fn high_water_field(&self) -> Option<ColumnRef>;
    /// `None` or zero means unlimited.
    fn item_limit(&self) -> Option<u64>;
    /// Comma separated list of key values restricting the pass.
    fn id_list(&self) -> Option<String>;
}

/// Per-row hook run after the dedup check. Returning `false` skips the row.
pub trait PrepareRow {
    fn prepare_row(&mut self, _row: &mut Row) -> bool {
        true
    }
}

/// Default hook, accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;
impl PrepareRow for AcceptAll {}

impl<F> PrepareRow for F
where
    F: FnMut(&mut Row) -> bool,
{
    fn prepare_row(&mut self, row: &mut Row) -> bool {
        self(row)
    }
}

// ------------- MigrationContext -------------
#[derive(Debug, Clone, Default)]
pub struct MigrationContext {
    pub high_water: Option<String>,
    pub high_water_field: Option<ColumnRef>,
    pub item_limit: Option<u64>,
    pub id_list: Option<String>,
}

impl MigrationContext {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_high_water(mut self, field: ColumnRef, value: Option<String>) -> Self {
        self.high_water_field = Some(field);
        self.high_water = value;
        self
    }
    pub fn with_item_limit(mut self, limit: u64) -> Self {
        self.item_limit = Some(limit);
        self
    }
    pub fn with_id_list(mut self, ids: impl Into<String>) -> Self {
        self.id_list = Some(ids.into());
        self
    }
}

impl Migration for MigrationContext {
    fn high_water(&self) -> Option<String> {
        self.high_water.clone()
    }
    fn high_water_field(&self) -> Option<ColumnRef> {
        self.high_water_field.clone()
    }
    fn item_limit(&self) -> Option<u64> {
        self.item_limit
    }
    fn id_list(&self) -> Option<String> {
        self.id_list.clone()
    }
}
