//! Row mutations applied atomically at commit.

use rusqlite::types::ToSql;
use rusqlite::Connection;

use super::error::Error;
use super::schema::{primary_key_columns, quote_ident};
use super::value::{Timestamp, Value};

/// How a mutation treats an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    /// Fail with `AlreadyExists` if the row exists.
    Insert,
    /// Fail with `NotFound` if the row does not exist.
    Update,
    /// Insert, or overwrite the listed columns of an existing row.
    InsertOrUpdate,
}

/// A write to one row. Columns not listed keep their current values.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    op: MutationOp,
    table: String,
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Mutation {
    pub fn insert(table: &str, columns: &[&str], values: Vec<Value>) -> Self {
        Self::new(MutationOp::Insert, table, columns, values)
    }

    pub fn update(table: &str, columns: &[&str], values: Vec<Value>) -> Self {
        Self::new(MutationOp::Update, table, columns, values)
    }

    pub fn insert_or_update(table: &str, columns: &[&str], values: Vec<Value>) -> Self {
        Self::new(MutationOp::InsertOrUpdate, table, columns, values)
    }

    fn new(op: MutationOp, table: &str, columns: &[&str], values: Vec<Value>) -> Self {
        Self {
            op,
            table: table.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            values,
        }
    }

    pub fn op(&self) -> MutationOp {
        self.op
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Apply to `conn` inside the caller's transaction.
    pub(crate) fn apply(&self, conn: &Connection, commit_ts: Timestamp) -> Result<(), Error> {
        if self.columns.len() != self.values.len() {
            return Err(Error::InvalidArgument(format!(
                "mutation on {} has {} columns but {} values",
                self.table,
                self.columns.len(),
                self.values.len()
            )));
        }

        let pk = primary_key_columns(conn, &self.table)
            .map_err(|e| Error::sqlite(format!("read schema of {}", self.table), e))?;
        if pk.is_empty() {
            return Err(Error::NotFound(format!("table {}", self.table)));
        }
        for key_col in &pk {
            if !self.columns.iter().any(|c| c.eq_ignore_ascii_case(key_col)) {
                return Err(Error::InvalidArgument(format!(
                    "mutation on {} is missing primary key column {key_col}",
                    self.table
                )));
            }
        }

        let values = self
            .values
            .iter()
            .map(|v| v.resolve(Some(commit_ts)))
            .collect::<Result<Vec<_>, _>>()?;
        let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();

        let sql = self.to_sql(&pk);
        let context = format!("{:?} {}", self.op, self.table);
        let changed = conn
            .execute(&sql, params.as_slice())
            .map_err(|e| Error::sqlite(context, e))?;

        if self.op == MutationOp::Update && changed == 0 {
            return Err(Error::NotFound(format!(
                "row {} in table {}",
                self.key_display(&pk),
                self.table
            )));
        }
        Ok(())
    }

    fn to_sql(&self, pk: &[String]) -> String {
        let is_key = |c: &str| pk.iter().any(|k| k.eq_ignore_ascii_case(c));
        let table = quote_ident(&self.table);
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=self.columns.len()).map(|i| format!("?{i}")).collect();

        match self.op {
            MutationOp::Insert => format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            ),
            MutationOp::InsertOrUpdate => {
                let updates: Vec<String> = self
                    .columns
                    .iter()
                    .filter(|c| !is_key(c))
                    .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
                    .collect();
                let conflict: Vec<String> = pk.iter().map(|k| quote_ident(k)).collect();
                let action = if updates.is_empty() {
                    "DO NOTHING".to_string()
                } else {
                    format!("DO UPDATE SET {}", updates.join(", "))
                };
                format!(
                    "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) {action}",
                    columns.join(", "),
                    placeholders.join(", "),
                    conflict.join(", ")
                )
            }
            MutationOp::Update => {
                let mut sets = Vec::new();
                let mut filters = Vec::new();
                for (idx, column) in self.columns.iter().enumerate() {
                    let clause = format!("{} = ?{}", quote_ident(column), idx + 1);
                    if is_key(column) {
                        filters.push(clause);
                    } else {
                        sets.push(clause);
                    }
                }
                if sets.is_empty() {
                    // Nothing to change; still report a missing row.
                    format!(
                        "UPDATE {table} SET {0} = {0} WHERE {1}",
                        columns[0],
                        filters.join(" AND ")
                    )
                } else {
                    format!(
                        "UPDATE {table} SET {} WHERE {}",
                        sets.join(", "),
                        filters.join(" AND ")
                    )
                }
            }
        }
    }

    fn key_display(&self, pk: &[String]) -> String {
        let parts: Vec<String> = pk
            .iter()
            .filter_map(|k| {
                self.columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(k))
                    .map(|i| self.values[i].to_string())
            })
            .collect();
        format!("({})", parts.join(", "))
    }
}
