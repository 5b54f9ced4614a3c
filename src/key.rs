use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SourceError};
use crate::value::{Row, Value};

// ------------- ColumnRef -------------
/// A column named in the source query, optionally qualified by the table
/// alias it is selected through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), alias: None }
    }
    pub fn aliased(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self { name: name.into(), alias: Some(alias.into()) }
    }
    /// The column as it has to be written inside the query text.
    pub fn qualified(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{alias}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

// ------------- KeySchema -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema(Vec<ColumnRef>);

impl KeySchema {
    pub fn new(fields: Vec<ColumnRef>) -> Result<Self> {
        if fields.is_empty() {
            return Err(SourceError::Configuration(
                "a source key needs at least one field".into(),
            ));
        }
        Ok(Self(fields))
    }
    pub fn single(name: impl Into<String>) -> Self {
        Self(vec![ColumnRef::new(name)])
    }
    /// Only the first field is ever used as an id-list filter target.
    pub fn first(&self) -> &ColumnRef {
        &self.0[0]
    }
    pub fn fields(&self) -> &[ColumnRef] {
        &self.0
    }
    pub fn source_key(&self, row: &Row) -> Result<SourceKey> {
        let mut parts = Vec::with_capacity(self.0.len());
        for field in &self.0 {
            let value = row.get(&field.name).ok_or_else(|| {
                SourceError::Configuration(format!(
                    "key field '{}' is not among the result columns {:?}",
                    field.name,
                    row.columns()
                ))
            })?;
            parts.push((field.name.clone(), value.clone()));
        }
        Ok(SourceKey(parts))
    }
}

// ------------- SourceKey -------------
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey(Vec<(String, Value)>);

impl SourceKey {
    pub fn new(parts: Vec<(String, Value)>) -> Self {
        Self(parts)
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
    pub fn parts(&self) -> &[(String, Value)] {
        &self.0
    }
    /// Stable text form, used as the primary key of the persisted map.
    pub fn to_json(&self) -> String {
        let object: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(name, value)| {
                (name.clone(), serde_json::to_value(value).unwrap_or(serde_json::Value::Null))
            })
            .collect();
        serde_json::Value::Object(object).to_string()
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(n, v)| format!("{n}={v}")).collect();
        write!(f, "{}", parts.join(","))
    }
}
