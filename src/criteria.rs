//! Substitution of the dynamic filter into a templated source query.
//!
//! A template carries exactly one `:criteria` token. Before every pass it is
//! replaced by one of three clauses, first match wins:
//! * an explicit id list, `<first key field> IN (<ids>)`
//! * a high-water comparison, `<field> > '<value>'`
//! * the neutral `1=1`, so a trailing `AND ...` in the template still composes

use lazy_static::lazy_static;
use regex::{NoExpand, Regex};
use std::fmt;

use crate::error::{Result, SourceError};
use crate::key::{ColumnRef, KeySchema};

pub const PLACEHOLDER: &str = ":criteria";

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r":criteria\b").expect("placeholder regex");
}

// ------------- Criteria -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criteria {
    IdList { field: ColumnRef, ids: String },
    HighWater { field: ColumnRef, value: String },
    All,
}

impl Criteria {
    pub fn resolve(
        id_list: Option<&str>,
        high_water: Option<(&ColumnRef, &str)>,
        key: &KeySchema,
    ) -> Criteria {
        if let Some(ids) = id_list.map(str::trim).filter(|ids| !ids.is_empty()) {
            return Criteria::IdList { field: key.first().clone(), ids: ids.to_string() };
        }
        match high_water {
            Some((field, value)) if !value.is_empty() => {
                Criteria::HighWater { field: field.clone(), value: value.to_string() }
            }
            _ => Criteria::All,
        }
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criteria::IdList { field, ids } => write!(f, "{} IN ({ids})", field.qualified()),
            // compared as a string, quotes inside the value are doubled
            Criteria::HighWater { field, value } => {
                write!(f, "{} > '{}'", field.qualified(), value.replace('\'', "''"))
            }
            Criteria::All => write!(f, "1=1"),
        }
    }
}

// ------------- QueryTemplate -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate(String);

impl QueryTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        match PLACEHOLDER_RE.find_iter(&template).count() {
            1 => Ok(Self(template)),
            0 => Err(SourceError::Configuration(format!(
                "query template has no {PLACEHOLDER} placeholder: {template}"
            ))),
            n => Err(SourceError::Configuration(format!(
                "query template has {n} {PLACEHOLDER} placeholders, expected exactly one: {template}"
            ))),
        }
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
    pub fn substitute(&self, criteria: &Criteria) -> String {
        PLACEHOLDER_RE.replace(&self.0, NoExpand(&criteria.to_string())).into_owned()
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
