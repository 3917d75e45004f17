//! Predicate builder.
//!
//! Turns request parameters into an ordered list of clause templates with
//! their bound values. Templates mark each bound value with an anonymous
//! `?`; the query compiler numbers them, so the Nth placeholder always
//! refers to the Nth value of the concatenated [`Predicates::params`].

use chrono::{DateTime, Utc};
use sensor_map_config::SearchConfig;
use sensor_map_search_models::{
    BoundValue, BoundingBox, QueryParams, SortOrder, TemporalDomain, ValidationError,
};

use crate::dictionary;

/// Stored timestamp column all temporal clauses filter and sort on.
pub const TIMESTAMP_COLUMN: &str = "sensordata.timestamp";

/// A clause template plus the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateDescriptor {
    /// SQL fragment with one `?` per bound value.
    pub clause_template: String,
    /// Values for the template's placeholders, in order.
    pub bound_values: Vec<BoundValue>,
}

/// The full set of predicates for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicates {
    /// Clauses joined with `AND`; the spatial clause is always first.
    pub descriptors: Vec<PredicateDescriptor>,
    /// `ORDER BY` expression, present only with a temporal clause.
    pub order_by: Option<String>,
}

impl Predicates {
    /// The positional parameter list: every descriptor's bound values,
    /// concatenated in order.
    #[must_use]
    pub fn params(&self) -> Vec<BoundValue> {
        self.descriptors
            .iter()
            .flat_map(|d| d.bound_values.iter().copied())
            .collect()
    }
}

/// Validates the four spatial bounds of `params`.
///
/// # Errors
///
/// Returns [`ValidationError`] if any bound is missing or non-finite, or if
/// either axis is inverted or degenerate.
pub fn validate_bounds(params: &QueryParams) -> Result<BoundingBox, ValidationError> {
    let minlng = finite_bound("minlng", params.minlng)?;
    let minlat = finite_bound("minlat", params.minlat)?;
    let maxlng = finite_bound("maxlng", params.maxlng)?;
    let maxlat = finite_bound("maxlat", params.maxlat)?;

    if minlng >= maxlng {
        return Err(ValidationError::InvertedBounds {
            axis: "longitude",
            min: minlng,
            max: maxlng,
        });
    }
    if minlat >= maxlat {
        return Err(ValidationError::InvertedBounds {
            axis: "latitude",
            min: minlat,
            max: maxlat,
        });
    }

    Ok(BoundingBox::new(minlng, minlat, maxlng, maxlat))
}

fn finite_bound(name: &'static str, value: Option<f64>) -> Result<f64, ValidationError> {
    match value {
        None => Err(ValidationError::MissingBound { name }),
        Some(v) if !v.is_finite() => Err(ValidationError::NonFiniteBound { name, value: v }),
        Some(v) => Ok(v),
    }
}

/// Builds predicate descriptors for a [`SearchConfig`].
#[derive(Debug, Clone, Copy)]
pub struct PredicateBuilder {
    config: SearchConfig,
}

impl PredicateBuilder {
    /// Creates a builder using the given CRS identifiers and window width.
    #[must_use]
    pub const fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Builds only the spatial clause: an envelope in the public CRS,
    /// reprojected to the storage CRS, intersected with the stored point.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the bounds are invalid.
    pub fn spatial(&self, params: &QueryParams) -> Result<PredicateDescriptor, ValidationError> {
        let bbox = validate_bounds(params)?;
        Ok(PredicateDescriptor {
            clause_template: format!(
                "(loggers.point && ST_Transform(ST_MakeEnvelope(?, ?, ?, ?, {}), {}))",
                self.config.public_srid, self.config.storage_srid
            ),
            bound_values: vec![
                BoundValue::Float(bbox.west),
                BoundValue::Float(bbox.south),
                BoundValue::Float(bbox.east),
                BoundValue::Float(bbox.north),
            ],
        })
    }

    /// Resolves the effective time range: the explicit dates when any were
    /// given, otherwise the default window anchored at the domain hint.
    #[must_use]
    pub fn time_range(
        &self,
        params: &QueryParams,
        domain_hint: Option<&TemporalDomain>,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        if !params.has_no_time_range() {
            return (params.from_date, params.to_date);
        }

        domain_hint
            .and_then(|domain| dictionary::default_range(domain, self.config.time_window_ms))
            .and_then(|(from, to)| {
                Some((
                    DateTime::from_timestamp_millis(from)?,
                    DateTime::from_timestamp_millis(to)?,
                ))
            })
            .map_or((None, None), |(from, to)| (Some(from), Some(to)))
    }

    /// Builds all predicates for `params`.
    ///
    /// The spatial clause comes first. A temporal clause follows when the
    /// effective time range (see [`Self::time_range`]) has at least one
    /// end; ordering is attached only then.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the bounds are invalid.
    pub fn build(
        &self,
        params: &QueryParams,
        domain_hint: Option<&TemporalDomain>,
    ) -> Result<Predicates, ValidationError> {
        let mut descriptors = vec![self.spatial(params)?];

        let temporal = match self.time_range(params, domain_hint) {
            (Some(from), Some(to)) => Some(PredicateDescriptor {
                clause_template: format!("({TIMESTAMP_COLUMN} BETWEEN ? AND ?)"),
                bound_values: vec![BoundValue::Timestamp(from), BoundValue::Timestamp(to)],
            }),
            (Some(from), None) => Some(PredicateDescriptor {
                clause_template: format!("({TIMESTAMP_COLUMN} >= ?)"),
                bound_values: vec![BoundValue::Timestamp(from)],
            }),
            (None, Some(to)) => Some(PredicateDescriptor {
                clause_template: format!("({TIMESTAMP_COLUMN} <= ?)"),
                bound_values: vec![BoundValue::Timestamp(to)],
            }),
            (None, None) => None,
        };

        let order_by = temporal.as_ref().map(|_| {
            let order: SortOrder = params.sort_order.unwrap_or_default();
            format!("{TIMESTAMP_COLUMN} {order}")
        });
        descriptors.extend(temporal);

        Ok(Predicates {
            descriptors,
            order_by,
        })
    }
}
