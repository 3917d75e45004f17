//! The read-only data store seam.
//!
//! The search pipeline only ever hands the store a compiled query text and
//! its positional parameters, and reads back ordered rows. The `PostGIS`
//! implementation lives in `sensor_map_database`; tests use in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sensor_map_search_models::BoundValue;

/// A single column value as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// SQL `NULL`.
    Null,
    /// Boolean column.
    Bool(bool),
    /// Any integer column.
    Int(i64),
    /// Any floating point column.
    Float(f64),
    /// Text, or anything the store could only render as text.
    Text(String),
    /// Timestamp column.
    Timestamp(DateTime<Utc>),
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Timestamp(v) => f.write_str(&v.to_rfc3339()),
        }
    }
}

/// A row with its columns in the order the store returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreRow {
    /// `(column name, value)` pairs in select order.
    pub columns: Vec<(String, CellValue)>,
}

impl StoreRow {
    /// Creates a row from ordered `(name, value)` pairs.
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, CellValue)>,
        S: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Column values in order.
    pub fn values(&self) -> impl Iterator<Item = &CellValue> {
        self.columns.iter().map(|(_, value)| value)
    }
}

/// An opaque data store failure.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StoreError {
    /// Creates an error with a message only.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying driver error.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// A read-only store able to run compiled search queries.
#[async_trait]
pub trait SensorStore: Send + Sync {
    /// Runs `text` with `params` bound to `$1..$n` in order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails to execute the query.
    async fn query(&self, text: &str, params: &[BoundValue]) -> Result<Vec<StoreRow>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_stringify_plainly() {
        let ts = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        assert_eq!(CellValue::Null.to_string(), "");
        assert_eq!(CellValue::Int(42).to_string(), "42");
        assert_eq!(CellValue::Float(0.5).to_string(), "0.5");
        assert_eq!(CellValue::Text("a b".to_string()).to_string(), "a b");
        assert_eq!(
            CellValue::Timestamp(ts).to_string(),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn row_lookup_preserves_order() {
        let row = StoreRow::new([("b", CellValue::Int(1)), ("a", CellValue::Int(2))]);
        assert_eq!(row.column_names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(row.get("a"), Some(&CellValue::Int(2)));
        assert_eq!(row.get("missing"), None);
    }
}
