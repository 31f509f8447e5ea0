//! Query result types for sqldesk.
//!
//! Defines the structures used to represent statement classification and
//! query results from either backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a statement's outcome is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Produces a result set that is fetched eagerly.
    #[default]
    RowReturning,
    /// Reports an affected-row count and is committed right away.
    RowAffecting,
}

impl StatementKind {
    /// Classifies SQL text.
    ///
    /// A statement is row-returning if and only if its text, trimmed and
    /// case-folded, starts with `select`. Everything else is row-affecting.
    pub fn classify(sql: &str) -> Self {
        let head = sql.trim_start().get(..6);
        match head {
            Some(prefix) if prefix.eq_ignore_ascii_case("select") => Self::RowReturning,
            _ => Self::RowAffecting,
        }
    }

    /// Returns true for row-returning statements.
    pub fn returns_rows(&self) -> bool {
        matches!(self, Self::RowReturning)
    }
}

/// Represents the result of executing a SQL statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column metadata for the result set (empty for row-affecting statements).
    pub columns: Vec<ColumnInfo>,

    /// Rows of data (empty for row-affecting statements).
    pub rows: Vec<Row>,

    /// Rows fetched, or rows affected for row-affecting statements.
    pub row_count: u64,

    /// Wall-clock time from task start until the result was ready.
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,

    /// Whether `row_count` counts fetched rows or affected rows.
    pub kind: StatementKind,
}

impl QueryResult {
    /// Creates a row-returning result with the given columns and rows.
    pub fn with_rows(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        let row_count = rows.len() as u64;
        Self {
            columns,
            rows,
            row_count,
            elapsed: Duration::ZERO,
            kind: StatementKind::RowReturning,
        }
    }

    /// Creates a row-affecting result.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            row_count: rows_affected,
            kind: StatementKind::RowAffecting,
            ..Self::default()
        }
    }

    /// Sets the elapsed time.
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Returns true if the result set is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Renders every cell as text, row by row.
    pub fn text_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(Value::to_display_string).collect())
            .collect()
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Column data type as reported by the backend.
    pub data_type: String,
}

impl ColumnInfo {
    /// Creates a new column info with the given name and type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A row of data from a query result.
pub type Row = Vec<Value>;

/// Represents a single value from a database query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text/string value.
    String(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// A value whose type the adapter cannot decode; holds the type name.
    Unsupported(String),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Converts the value to its text representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::Unsupported(type_name) => format!("<{type_name}>"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Serde support for Duration, as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
