#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! HTTP request and response types for the sensor map server.
//!
//! Query strings arrive as loosely typed text. [`SearchQueryParams`] keeps
//! them as strings so that parsing failures become structured
//! [`ValidationError`]s instead of opaque extractor rejections.

use chrono::{DateTime, NaiveDateTime, Utc};
use sensor_map_search_models::{FeatureSource, QueryParams, SortOrder, ValidationError};
use serde::{Deserialize, Serialize};

/// Query parameters for the search endpoint, as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SearchQueryParams {
    /// Map zoom level.
    pub zoom: Option<String>,
    /// Western longitude boundary.
    pub minlng: Option<String>,
    /// Southern latitude boundary.
    pub minlat: Option<String>,
    /// Eastern longitude boundary.
    pub maxlng: Option<String>,
    /// Northern latitude boundary.
    pub maxlat: Option<String>,
    /// Lower time bound: epoch milliseconds or RFC 3339.
    pub from_date: Option<String>,
    /// Upper time bound: epoch milliseconds or RFC 3339.
    pub to_date: Option<String>,
    /// `ASC` or `DESC`.
    pub sort_order: Option<String>,
    /// Free-text filter (reserved).
    pub q: Option<String>,
    /// Subject filter (reserved).
    pub q_subject: Option<String>,
    /// Feature source (reserved).
    pub source: Option<String>,
}

impl TryFrom<&SearchQueryParams> for QueryParams {
    type Error = ValidationError;

    /// Parses raw query-string values.
    ///
    /// Bounds that are present but not numeric become `NaN` so the
    /// predicate builder reports them as non-finite. Bounds themselves are
    /// not validated here.
    fn try_from(raw: &SearchQueryParams) -> Result<Self, Self::Error> {
        let sort_order = non_empty(raw.sort_order.as_deref())
            .map(|s| {
                s.parse::<SortOrder>()
                    .map_err(|_| ValidationError::InvalidSortOrder(s.to_string()))
            })
            .transpose()?;

        let source = non_empty(raw.source.as_deref())
            .map(|s| {
                s.parse::<FeatureSource>()
                    .map_err(|_| ValidationError::InvalidSource(s.to_string()))
            })
            .transpose()?;

        Ok(Self {
            minlng: parse_number(raw.minlng.as_deref()),
            minlat: parse_number(raw.minlat.as_deref()),
            maxlng: parse_number(raw.maxlng.as_deref()),
            maxlat: parse_number(raw.maxlat.as_deref()),
            zoom: non_empty(raw.zoom.as_deref()).and_then(|z| z.parse().ok()),
            from_date: parse_date("from_date", raw.from_date.as_deref())?,
            to_date: parse_date("to_date", raw.to_date.as_deref())?,
            sort_order,
            q: non_empty(raw.q.as_deref()).map(String::from),
            q_subject: non_empty(raw.q_subject.as_deref()).map(String::from),
            source,
        })
    }
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_number(raw: Option<&str>) -> Option<f64> {
    non_empty(raw).map(|s| s.parse().unwrap_or(f64::NAN))
}

/// Parses a date parameter given as epoch milliseconds or an ISO 8601
/// timestamp. Millisecond values `<= 0` mean "unset".
///
/// # Errors
///
/// Returns [`ValidationError::InvalidDate`] if the value is neither form
/// or is out of range.
pub fn parse_date(
    name: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    let Some(s) = non_empty(raw) else {
        return Ok(None);
    };
    let invalid = || ValidationError::InvalidDate {
        name,
        value: s.to_string(),
    };

    if let Ok(millis) = s.parse::<i64>() {
        if millis <= 0 {
            return Ok(None);
        }
        return DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(invalid);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| invalid())
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}
