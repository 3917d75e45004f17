//! Result rendering.
//!
//! Feature mode passes the store's aggregated collection through, keeping
//! the `features: null` vs. populated distinction intact. Export mode writes
//! plain comma-joined lines: values are stringified as-is with no quoting,
//! which is what existing consumers of the export expect.

use std::io::Write;

use sensor_map_search_models::{FeatureCollection, ResultEnvelope, TemporalDomain};

use crate::compile::FEATURE_COLLECTION_COLUMN;
use crate::store::{CellValue, StoreRow};

/// Errors raised while rendering store output.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The aggregated collection is not a valid feature collection.
    #[error("Failed to decode feature collection: {0}")]
    Decode(#[from] serde_json::Error),

    /// The aggregate column holds something other than JSON text.
    #[error("Unexpected value in feature_collection column: {0:?}")]
    UnexpectedValue(CellValue),

    /// A CSV record could not be written.
    #[error("Failed to write CSV record: {0}")]
    Csv(#[from] csv::Error),

    /// The export sink failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Extracts the feature collection from the features-mode aggregate row.
///
/// No row, a `NULL` aggregate, a zero count, or an empty feature list all
/// render as `features: None` with `points_count: 0`.
///
/// # Errors
///
/// Returns [`RenderError`] if the aggregate cannot be decoded.
pub fn render_features(rows: &[StoreRow]) -> Result<FeatureCollection, RenderError> {
    let cell = rows
        .first()
        .and_then(|row| row.get(FEATURE_COLLECTION_COLUMN));

    let mut collection = match cell {
        None | Some(CellValue::Null) => return Ok(FeatureCollection::empty()),
        Some(CellValue::Text(json)) => serde_json::from_str::<FeatureCollection>(json)?,
        Some(other) => return Err(RenderError::UnexpectedValue(other.clone())),
    };

    if collection.points_count == 0 || collection.features.as_ref().is_none_or(Vec::is_empty) {
        return Ok(FeatureCollection::empty());
    }

    collection.cluster_count = 0;
    Ok(collection)
}

/// Wraps rendered results and the dictionary into a success envelope.
#[must_use]
pub const fn envelope(domain: TemporalDomain, results: FeatureCollection) -> ResultEnvelope {
    ResultEnvelope::ok(domain, results)
}

/// Writes the export to `sink`: a header, then one line per row, each
/// ending with `\n`. Fields are written unquoted.
///
/// The header lists the first row's column names in order. With no rows
/// the header comes from `fallback_columns`, so an empty export is still a
/// valid header-only file. The sink is flushed and closed afterwards.
///
/// # Errors
///
/// Returns [`RenderError`] if writing or flushing fails.
pub fn write_csv<W: Write>(
    sink: W,
    rows: &[StoreRow],
    fallback_columns: &[&str],
) -> Result<(), RenderError> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Never)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(sink);

    match rows.first() {
        Some(row) => writer.write_record(row.column_names())?,
        None => writer.write_record(fallback_columns)?,
    }
    for row in rows {
        writer.write_record(row.values().map(ToString::to_string))?;
    }

    writer.flush()?;
    drop(writer);
    Ok(())
}
