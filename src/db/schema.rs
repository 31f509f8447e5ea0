//! Schema browsing helpers.
//!
//! Table listings returned by the adapters and the preview statements run
//! when the user opens a table.

use crate::db::BackendKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of relation returned by a table listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Table,
    View,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::View => write!(f, "view"),
        }
    }
}

/// A table or view visible on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Schema name (None for SQLite).
    pub schema: Option<String>,

    /// Relation name.
    pub name: String,

    pub kind: TableKind,
}

impl TableEntry {
    /// Creates a SQLite-style entry with no schema.
    pub fn new(name: impl Into<String>, kind: TableKind) -> Self {
        Self {
            schema: None,
            name: name.into(),
            kind,
        }
    }

    /// Returns the name qualified by its schema, quoted for use in SQL.
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl fmt::Display for TableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Which end of a table a preview reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewEnd {
    #[default]
    First,
    Last,
}

/// Quotes an identifier with double quotes, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a possibly schema-qualified table name (`schema.table`).
fn quote_table(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
            format!("{}.{}", quote_ident(schema), quote_ident(name))
        }
        _ => quote_ident(table),
    }
}

/// Builds a preview query for the first or last `limit` rows of a table.
///
/// The last-rows form orders by `rowid` on SQLite and by the first column on
/// PostgreSQL, then re-sorts ascending so rows read in natural order.
pub fn preview_sql(backend: BackendKind, table: &str, limit: u32, end: PreviewEnd) -> String {
    let table = quote_table(table);
    match end {
        PreviewEnd::First => format!("SELECT * FROM {table} LIMIT {limit}"),
        PreviewEnd::Last => match backend {
            BackendKind::Sqlite => format!(
                "SELECT * FROM {table} WHERE rowid IN (SELECT rowid FROM {table} ORDER BY rowid DESC LIMIT {limit}) ORDER BY rowid ASC"
            ),
            BackendKind::Postgres => format!(
                "SELECT * FROM (SELECT * FROM {table} ORDER BY 1 DESC LIMIT {limit}) AS preview ORDER BY 1 ASC"
            ),
        },
    }
}
