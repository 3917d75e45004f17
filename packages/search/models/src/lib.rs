#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Query parameters, bound values and result envelope types.
//!
//! These types are shared by the server-side search pipeline and the client
//! orchestrator. The envelope types double as the validation boundary on the
//! client: a response body that does not deserialize into
//! [`ResultEnvelope`] is treated as a failed request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Errors raised when request parameters cannot describe a valid search.
///
/// These are detected before any query reaches the data store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A required spatial bound was not supplied (or did not parse).
    #[error("Missing required bound: {name}")]
    MissingBound {
        /// Query parameter name.
        name: &'static str,
    },

    /// A spatial bound is NaN or infinite.
    #[error("Bound {name} is not finite: {value}")]
    NonFiniteBound {
        /// Query parameter name.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The minimum of an axis is not strictly below its maximum.
    #[error("Inverted {axis} bounds: {min} >= {max}")]
    InvertedBounds {
        /// `"longitude"` or `"latitude"`.
        axis: &'static str,
        /// Supplied minimum.
        min: f64,
        /// Supplied maximum.
        max: f64,
    },

    /// A date parameter is neither epoch milliseconds nor RFC 3339.
    #[error("Invalid date for {name}: {value}")]
    InvalidDate {
        /// Query parameter name.
        name: &'static str,
        /// The rejected raw value.
        value: String,
    },

    /// `sort_order` is not `ASC` or `DESC`.
    #[error("Invalid sort order: {0}")]
    InvalidSortOrder(String),

    /// `source` is not a known feature source.
    #[error("Invalid source: {0}")]
    InvalidSource(String),
}

/// Direction of the temporal ordering clause.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum SortOrder {
    /// Oldest first.
    Asc,
    /// Newest first.
    #[default]
    Desc,
}

/// Dataset a feature originates from. Reserved: accepted on requests but not
/// filtered on.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FeatureSource {
    /// Norwegian UFO archive.
    NorgeUfo,
    /// MUFON reports published on Kaggle.
    MufonKaggle,
    /// No particular source.
    #[default]
    NotSpecified,
}

/// A validated geographic bounding box in public (WGS84) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }
}

/// Search parameters as supplied by a caller.
///
/// Bounds are optional here because nothing upstream guarantees them; the
/// predicate builder validates them into a [`BoundingBox`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Western longitude boundary.
    pub minlng: Option<f64>,
    /// Southern latitude boundary.
    pub minlat: Option<f64>,
    /// Eastern longitude boundary.
    pub maxlng: Option<f64>,
    /// Northern latitude boundary.
    pub maxlat: Option<f64>,
    /// Map zoom level the request was made at.
    pub zoom: Option<i32>,
    /// Inclusive lower time bound.
    pub from_date: Option<DateTime<Utc>>,
    /// Inclusive upper time bound.
    pub to_date: Option<DateTime<Utc>>,
    /// Direction of the temporal ordering.
    pub sort_order: Option<SortOrder>,
    /// Free-text filter (reserved).
    pub q: Option<String>,
    /// Subject filter (reserved).
    pub q_subject: Option<String>,
    /// Source filter (reserved).
    pub source: Option<FeatureSource>,
}

impl QueryParams {
    /// Creates parameters for a bounding box with no time range.
    #[must_use]
    pub const fn for_bounds(minlng: f64, minlat: f64, maxlng: f64, maxlat: f64) -> Self {
        Self {
            minlng: Some(minlng),
            minlat: Some(minlat),
            maxlng: Some(maxlng),
            maxlat: Some(maxlat),
            zoom: None,
            from_date: None,
            to_date: None,
            sort_order: None,
            q: None,
            q_subject: None,
            source: None,
        }
    }

    /// Whether the caller named neither end of the time range.
    #[must_use]
    pub const fn has_no_time_range(&self) -> bool {
        self.from_date.is_none() && self.to_date.is_none()
    }
}

/// A value bound to a positional placeholder. Independent of any SQL
/// driver; the store converts it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundValue {
    /// A coordinate or other floating point value.
    Float(f64),
    /// An instant in time.
    Timestamp(DateTime<Utc>),
}

impl std::fmt::Display for BoundValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Timestamp(ts) => write!(f, "'{}'", ts.to_rfc3339()),
        }
    }
}

/// The `{min, max}` timestamp range (epoch milliseconds) available for a
/// spatial predicate. Both ends are `None` when no rows match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalDomain {
    /// Earliest matching timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Latest matching timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

impl TemporalDomain {
    /// A domain with no matching rows.
    pub const EMPTY: Self = Self {
        min: None,
        max: None,
    };

    /// Creates a domain from both ends. Swapped ends are reordered.
    #[must_use]
    pub const fn new(min: i64, max: i64) -> Self {
        if min <= max {
            Self {
                min: Some(min),
                max: Some(max),
            }
        } else {
            Self {
                min: Some(max),
                max: Some(min),
            }
        }
    }

    /// Returns both ends when the domain is non-empty.
    #[must_use]
    pub const fn bounds(&self) -> Option<(i64, i64)> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    /// Whether no rows matched.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bounds().is_none()
    }
}

/// Lookup tables returned alongside results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDictionary {
    /// Timestamp domain for the requested viewport.
    #[serde(default)]
    pub datetime: TemporalDomain,
}

/// `type` tag of a [`Feature`]. Any other tag fails deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    #[default]
    Feature,
}

/// `type` tag of a [`FeatureCollection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureCollectionType {
    #[default]
    FeatureCollection,
}

/// A single `GeoJSON` feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Always `"Feature"`.
    #[serde(rename = "type")]
    pub kind: FeatureType,
    /// `GeoJSON` geometry object in public coordinates.
    pub geometry: serde_json::Value,
    /// Row columns except the geometry column.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// An aggregated feature collection.
///
/// `features` is `None` (JSON `null`) exactly when `points_count` is zero;
/// it is never an empty array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureCollection {
    /// Always `"FeatureCollection"`.
    #[serde(rename = "type")]
    pub kind: FeatureCollectionType,
    /// Matching features, or `None` when nothing matched.
    pub features: Option<Vec<Feature>>,
    /// Number of matching rows.
    pub points_count: u64,
    /// Reserved for clustering; always zero.
    pub cluster_count: u64,
}

impl FeatureCollection {
    /// A collection with no matching rows.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            kind: FeatureCollectionType::FeatureCollection,
            features: None,
            points_count: 0,
            cluster_count: 0,
        }
    }
}

/// Response body of the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Human-readable status message; empty on success.
    #[serde(default)]
    pub msg: String,
    /// HTTP-equivalent status code.
    pub status: u16,
    /// Temporal dictionary for the requested viewport.
    #[serde(default)]
    pub dictionary: MapDictionary,
    /// Results, absent on errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<FeatureCollection>,
}

impl ResultEnvelope {
    /// A successful envelope.
    #[must_use]
    pub const fn ok(domain: TemporalDomain, results: FeatureCollection) -> Self {
        Self {
            msg: String::new(),
            status: 200,
            dictionary: MapDictionary { datetime: domain },
            results: Some(results),
        }
    }

    /// An error envelope with no results.
    #[must_use]
    pub fn error(status: u16, msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            status,
            dictionary: MapDictionary::default(),
            results: None,
        }
    }
}
