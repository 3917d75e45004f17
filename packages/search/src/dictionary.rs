//! Temporal dictionary resolver.
//!
//! The dictionary is always computed from the spatial predicate alone, so
//! the `{min, max}` range reported for a viewport does not shrink when the
//! current time filter excludes rows.

use sensor_map_config::SearchConfig;
use sensor_map_search_models::{QueryParams, TemporalDomain};

use crate::compile::{DOMAIN_MAX_COLUMN, DOMAIN_MIN_COLUMN, QueryCompiler};
use crate::predicate::PredicateDescriptor;
use crate::store::{CellValue, SensorStore, StoreRow};
use crate::{SearchError, run_plan};

/// The default time range for a request that names no dates:
/// `[min, min + window_ms]`, or `None` for an empty domain.
#[must_use]
pub fn default_range(domain: &TemporalDomain, window_ms: i64) -> Option<(i64, i64)> {
    domain
        .min
        .map(|min| (min, min.saturating_add(window_ms)))
}

/// Reads a domain from the dictionary query's single result row.
///
/// Missing rows, `NULL` aggregates and non-integer cells all yield an empty
/// domain; resolving a domain never fails on shape.
#[must_use]
pub fn domain_from_rows(rows: &[StoreRow]) -> TemporalDomain {
    let Some(row) = rows.first() else {
        return TemporalDomain::EMPTY;
    };

    match (
        millis(row.get(DOMAIN_MIN_COLUMN)),
        millis(row.get(DOMAIN_MAX_COLUMN)),
    ) {
        (Some(min), Some(max)) => TemporalDomain::new(min, max),
        _ => TemporalDomain::EMPTY,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(cell: Option<&CellValue>) -> Option<i64> {
    match cell? {
        CellValue::Int(v) => Some(*v),
        CellValue::Float(v) if v.is_finite() => Some(v.round() as i64),
        CellValue::Timestamp(ts) => Some(ts.timestamp_millis()),
        CellValue::Text(s) => s.trim().parse().ok(),
        CellValue::Null | CellValue::Bool(_) | CellValue::Float(_) => None,
    }
}

/// Resolves the temporal domain of a spatial predicate against a store.
#[derive(Debug, Clone, Copy)]
pub struct TemporalDictionaryResolver {
    compiler: QueryCompiler,
    window_ms: i64,
}

impl TemporalDictionaryResolver {
    /// Creates a resolver for the configured window width.
    #[must_use]
    pub const fn new(config: SearchConfig) -> Self {
        Self {
            compiler: QueryCompiler::new(config),
            window_ms: config.time_window_ms,
        }
    }

    /// Queries the `{min, max}` timestamp of rows matching `spatial`.
    ///
    /// `user_args` is only carried into error context.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] if the query fails to compile or the store
    /// fails.
    pub async fn resolve(
        &self,
        store: &dyn SensorStore,
        spatial: &PredicateDescriptor,
        user_args: &QueryParams,
    ) -> Result<TemporalDomain, SearchError> {
        let plan = self.compiler.compile_domain(spatial)?;
        log::debug!("Resolving temporal dictionary: {}", plan.format_for_logging());

        let rows = run_plan(store, &plan, user_args).await?;
        let domain = domain_from_rows(&rows);

        if domain.is_empty() {
            log::debug!("No readings inside viewport; temporal dictionary is empty");
        }
        Ok(domain)
    }

    /// The default range for this resolver's window width.
    #[must_use]
    pub fn default_range(&self, domain: &TemporalDomain) -> Option<(i64, i64)> {
        default_range(domain, self.window_ms)
    }
}
