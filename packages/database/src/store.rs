//! [`SensorStore`] implementation over a `switchy_database` connection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sensor_map_search::store::{CellValue, SensorStore, StoreError, StoreRow};
use sensor_map_search_models::BoundValue;
use switchy_database::{Database, DatabaseValue};

/// Read-only sensor store backed by `PostGIS`.
pub struct PostgisStore {
    db: Arc<dyn Database>,
}

impl PostgisStore {
    /// Wraps an open database connection.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SensorStore for PostgisStore {
    async fn query(&self, text: &str, params: &[BoundValue]) -> Result<Vec<StoreRow>, StoreError> {
        let values: Vec<DatabaseValue> = params.iter().copied().map(to_database_value).collect();
        log::trace!("PostGIS query with {} params: {text}", values.len());

        let rows = self
            .db
            .query_raw_params(text, &values)
            .await
            .map_err(|e| StoreError::with_source("PostGIS query failed", e))?;
        log::debug!("PostGIS query returned {} rows", rows.len());

        Ok(rows
            .into_iter()
            .map(|row| {
                StoreRow::new(
                    row.columns
                        .into_iter()
                        .map(|(name, value)| (name, to_cell_value(value))),
                )
            })
            .collect())
    }
}

/// Converts a bound parameter to the driver's value type.
#[must_use]
pub fn to_database_value(value: BoundValue) -> DatabaseValue {
    match value {
        BoundValue::Float(v) => DatabaseValue::Real64(v),
        BoundValue::Timestamp(ts) => DatabaseValue::DateTime(ts.naive_utc()),
    }
}

/// Converts a driver value to a store cell.
///
/// Column types this store does not model (geometry, intervals, ...) fall
/// back to the driver's textual rendering.
#[must_use]
pub fn to_cell_value(value: DatabaseValue) -> CellValue {
    match value {
        DatabaseValue::Null => CellValue::Null,
        DatabaseValue::String(s) => CellValue::Text(s),
        DatabaseValue::Bool(b) => CellValue::Bool(b),
        DatabaseValue::Int32(v) => CellValue::Int(i64::from(v)),
        DatabaseValue::Int64(v) => CellValue::Int(v),
        DatabaseValue::Real64(v) => CellValue::Float(v),
        DatabaseValue::DateTime(naive) => {
            CellValue::Timestamp(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        }
        other => {
            log::debug!("Rendering unmodelled column value as text: {other:?}");
            CellValue::Text(format!("{other:?}"))
        }
    }
}
