//! SQL statements with named, typed parameters.

use rusqlite::types::{ToSql, Value as SqlValue};

use super::error::Error;
use super::value::{Timestamp, Value};

/// A SQL statement whose parameters are referenced as `@name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<(String, Value)>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind `value` to `@name`, replacing any earlier binding of the same name.
    #[must_use]
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        let name = format!("@{}", name.trim_start_matches('@'));
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    pub(crate) fn resolve(&self, commit_ts: Option<Timestamp>) -> Result<BoundParams, Error> {
        let values = self
            .params
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.resolve(commit_ts)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(BoundParams(values))
    }
}

/// Parameters resolved to SQLite values, ready to pass to rusqlite.
pub(crate) struct BoundParams(Vec<(String, SqlValue)>);

impl BoundParams {
    pub(crate) fn as_named(&self) -> Vec<(&str, &dyn ToSql)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}
