//! Query compiler.
//!
//! Both output modes share one inner `SELECT`: the `rows` plan *is* that
//! select, and the `features` plan wraps it unchanged in a `jsonb`
//! aggregation. Identical predicates therefore select identical rows, and
//! `pointsCount` in a feature collection equals the row count of the flat
//! export for the same request.

use std::fmt::Write as _;

use sensor_map_config::SearchConfig;
use sensor_map_search_models::BoundValue;

use crate::predicate::{PredicateDescriptor, Predicates, TIMESTAMP_COLUMN};

/// Columns of the flat select, in output order.
pub const SELECT_COLUMNS: [&str; 8] = [
    "sensordata.logger_id",
    "sensordata.measurement_number",
    "sensordata.timestamp",
    "sensordata.rc_temperature",
    "sensordata.mag_x",
    "sensordata.mag_y",
    "sensordata.mag_z",
    "loggers.point",
];

/// Name of the geometry column, excluded from feature properties.
pub const GEOMETRY_COLUMN: &str = "point";

/// Result column holding the aggregated feature collection.
pub const FEATURE_COLLECTION_COLUMN: &str = "feature_collection";

/// Result columns of the dictionary query.
pub const DOMAIN_MIN_COLUMN: &str = "min_ms";
/// See [`DOMAIN_MIN_COLUMN`].
pub const DOMAIN_MAX_COLUMN: &str = "max_ms";

const FROM_CLAUSE: &str =
    "FROM sensordata JOIN loggers ON sensordata.logger_id = loggers.logger_id";

/// Errors raised while compiling predicates into a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// No predicates were supplied; the spatial predicate is mandatory.
    #[error("Cannot compile a query without predicates")]
    Empty,

    /// A clause template's placeholder count disagrees with its values.
    #[error("Clause {clause} has {placeholders} placeholders but {values} bound values")]
    PlaceholderMismatch {
        /// The offending template.
        clause: String,
        /// Number of `?` placeholders found.
        placeholders: usize,
        /// Number of bound values supplied.
        values: usize,
    },
}

/// Which shape of result the query should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// A single row holding an aggregated `GeoJSON` feature collection.
    Features,
    /// One flat row per matching reading.
    Rows,
}

/// Compiled query text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// SQL text using `$1..$n` placeholders.
    pub text: String,
    /// Value for each placeholder, `params[k - 1]` binding `$k`.
    pub params: Vec<BoundValue>,
}

impl QueryPlan {
    /// Renders the query with parameters substituted, for log output only.
    /// Never execute the result.
    #[must_use]
    pub fn format_for_logging(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut chars = self.text.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            match digits
                .parse::<usize>()
                .ok()
                .and_then(|k| k.checked_sub(1))
                .and_then(|i| self.params.get(i))
            {
                Some(value) => {
                    let _ = write!(out, "{value}");
                }
                None => {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
        }

        out
    }
}

/// Output names of [`SELECT_COLUMNS`], as the store reports them.
#[must_use]
pub fn row_column_names() -> Vec<&'static str> {
    SELECT_COLUMNS
        .iter()
        .map(|c| c.rsplit_once('.').map_or(*c, |(_, name)| name))
        .collect()
}

/// Compiles predicates into query plans.
#[derive(Debug, Clone, Copy)]
pub struct QueryCompiler {
    config: SearchConfig,
}

impl QueryCompiler {
    /// Creates a compiler using the configured public CRS for output
    /// geometry.
    #[must_use]
    pub const fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Compiles `predicates` for the requested output mode.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if there are no predicates or a template's
    /// placeholders do not match its values.
    pub fn compile(
        &self,
        predicates: &Predicates,
        mode: OutputMode,
    ) -> Result<QueryPlan, CompileError> {
        let rows = Self::compile_rows(predicates)?;
        Ok(match mode {
            OutputMode::Rows => rows,
            OutputMode::Features => QueryPlan {
                text: self.wrap_features(&rows.text),
                params: rows.params,
            },
        })
    }

    /// Compiles the dictionary query: the timestamp domain, as epoch
    /// milliseconds, of rows matching only `spatial`.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if the template's placeholders do not match
    /// its values.
    pub fn compile_domain(&self, spatial: &PredicateDescriptor) -> Result<QueryPlan, CompileError> {
        let (clauses, params) = number_placeholders(std::slice::from_ref(spatial))?;
        let text = format!(
            "SELECT (EXTRACT(EPOCH FROM MIN({TIMESTAMP_COLUMN})) * 1000)::bigint AS {DOMAIN_MIN_COLUMN}, \
             (EXTRACT(EPOCH FROM MAX({TIMESTAMP_COLUMN})) * 1000)::bigint AS {DOMAIN_MAX_COLUMN} \
             {FROM_CLAUSE} WHERE {}",
            clauses.join(" AND ")
        );
        Ok(QueryPlan { text, params })
    }

    fn compile_rows(predicates: &Predicates) -> Result<QueryPlan, CompileError> {
        let (clauses, params) = number_placeholders(&predicates.descriptors)?;

        let mut text = format!(
            "SELECT {} {FROM_CLAUSE} WHERE {}",
            SELECT_COLUMNS.join(", "),
            clauses.join(" AND ")
        );
        if let Some(order_by) = &predicates.order_by {
            let _ = write!(text, " ORDER BY {order_by}");
        }

        Ok(QueryPlan { text, params })
    }

    fn wrap_features(&self, inner: &str) -> String {
        format!(
            "SELECT (jsonb_build_object(\
             'type', 'FeatureCollection', \
             'features', jsonb_agg(fc.feature), \
             'pointsCount', COUNT(*), \
             'clusterCount', 0))::text AS {FEATURE_COLLECTION_COLUMN} \
             FROM (SELECT jsonb_build_object(\
             'type', 'Feature', \
             'geometry', ST_AsGeoJSON(ST_Transform(s.{GEOMETRY_COLUMN}, {srid}))::jsonb, \
             'properties', to_jsonb(s) - '{GEOMETRY_COLUMN}') AS feature \
             FROM ({inner}) AS s) AS fc",
            srid = self.config.public_srid,
        )
    }
}

/// Replaces each `?` with `$k`, numbering across all descriptors in order,
/// and concatenates their bound values.
fn number_placeholders(
    descriptors: &[PredicateDescriptor],
) -> Result<(Vec<String>, Vec<BoundValue>), CompileError> {
    if descriptors.is_empty() {
        return Err(CompileError::Empty);
    }

    let mut clauses = Vec::with_capacity(descriptors.len());
    let mut params = Vec::new();

    for descriptor in descriptors {
        let placeholders = descriptor.clause_template.matches('?').count();
        if placeholders != descriptor.bound_values.len() {
            return Err(CompileError::PlaceholderMismatch {
                clause: descriptor.clause_template.clone(),
                placeholders,
                values: descriptor.bound_values.len(),
            });
        }

        let mut values = descriptor.bound_values.iter().copied();
        let mut clause = String::with_capacity(descriptor.clause_template.len() + 8);
        for c in descriptor.clause_template.chars() {
            if c != '?' {
                clause.push(c);
            } else if let Some(value) = values.next() {
                params.push(value);
                let _ = write!(clause, "${}", params.len());
            }
        }
        clauses.push(clause);
    }

    Ok((clauses, params))
}
