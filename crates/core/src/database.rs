use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{DatabaseConfig, DriverKind};

/// A single value as returned by a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl CellValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::UInt(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => f.write_str(text),
                Err(_) => {
                    f.write_str("0x")?;
                    for byte in bytes {
                        write!(f, "{byte:02x}")?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Values are positional and line up with [`QueryResult::columns`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryRow {
    pub values: Vec<CellValue>,
}

impl QueryRow {
    #[must_use]
    pub fn new(values: Vec<CellValue>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&CellValue> {
        self.values.get(index)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
    pub rows_affected: Option<u64>,
}

impl QueryResult {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<QueryRow>) -> Self {
        Self {
            columns,
            rows,
            rows_affected: None,
        }
    }

    #[must_use]
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
        }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DatabaseError {
    message: String,
}

impl DatabaseError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An open connection. Shared between the session and in-flight commands,
/// so every method takes `&self`.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    fn driver(&self) -> DriverKind;

    /// Human-readable schema description for generation prompts.
    async fn schema(&self) -> Result<String, DatabaseError>;

    async fn execute(&self, sql: &str) -> Result<QueryResult, DatabaseError>;

    async fn close(&self) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection and verifies it is reachable.
    async fn connect(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseConnection>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::{CellValue, QueryResult, QueryRow};

    #[test]
    fn null_renders_as_keyword() {
        assert_eq!(CellValue::Null.to_string(), "NULL");
        assert!(CellValue::from(None::<&str>).is_null());
    }

    #[test]
    fn scalar_values_render_plainly() {
        assert_eq!(CellValue::Int(-4).to_string(), "-4");
        assert_eq!(CellValue::UInt(7).to_string(), "7");
        assert_eq!(CellValue::Float(1.5).to_string(), "1.5");
        assert_eq!(CellValue::Bool(true).to_string(), "true");
        assert_eq!(CellValue::from("alice").to_string(), "alice");
    }

    #[test]
    fn bytes_render_as_text_or_hex() {
        assert_eq!(CellValue::Bytes(b"plain".to_vec()).to_string(), "plain");
        assert_eq!(CellValue::Bytes(vec![0xff, 0x01]).to_string(), "0xff01");
    }

    #[test]
    fn affected_result_carries_no_rows() {
        let result = QueryResult::affected(3);
        assert!(result.is_empty());
        assert_eq!(result.rows_affected, Some(3));

        let result = QueryResult::new(
            vec!["id".to_string()],
            vec![QueryRow::new(vec![CellValue::Int(1)])],
        );
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0].get(0), Some(&CellValue::Int(1)));
        assert_eq!(result.rows[0].get(1), None);
    }
}
