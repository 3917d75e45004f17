#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Viewport and time-window search over geolocated sensor readings.
//!
//! A search runs in a fixed order within one request:
//!
//! 1. the spatial predicate is built and validated,
//! 2. the temporal dictionary is resolved against it,
//! 3. the full predicate set is rebuilt with the dictionary as the default
//!    time window,
//! 4. the predicates are compiled for the requested output mode and run.
//!
//! Nothing here holds mutable state; a [`SearchService`] can serve any
//! number of concurrent requests.

pub mod compile;
pub mod dictionary;
pub mod predicate;
pub mod render;
pub mod store;

use std::sync::Arc;

use sensor_map_config::SearchConfig;
use sensor_map_search_models::{
    BoundValue, QueryParams, ResultEnvelope, TemporalDomain, ValidationError,
};

use crate::compile::{CompileError, OutputMode, QueryCompiler, QueryPlan, row_column_names};
use crate::dictionary::TemporalDictionaryResolver;
use crate::predicate::PredicateBuilder;
use crate::render::RenderError;
use crate::store::{SensorStore, StoreError, StoreRow};

/// Errors that can occur while serving a search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The request parameters are invalid. Raised before any query runs.
    #[error("Invalid search parameters: {0}")]
    Validation(#[from] ValidationError),

    /// The predicates could not be compiled.
    #[error("Failed to compile search query: {0}")]
    Compile(#[from] CompileError),

    /// The data store failed while running a compiled query.
    #[error("Search query failed: {source}")]
    Store {
        /// Compiled query text that was attempted.
        query: String,
        /// Parameters bound to the query, in placeholder order.
        params: Vec<BoundValue>,
        /// The caller's parameters as received.
        user_args: Box<QueryParams>,
        /// Underlying store failure.
        source: StoreError,
    },

    /// Store output could not be rendered.
    #[error("Failed to render search results: {0}")]
    Render(#[from] RenderError),
}

impl SearchError {
    /// Whether the caller is at fault (as opposed to the server).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Runs a compiled plan, attaching diagnostic context to store failures.
pub(crate) async fn run_plan(
    store: &dyn SensorStore,
    plan: &QueryPlan,
    user_args: &QueryParams,
) -> Result<Vec<StoreRow>, SearchError> {
    store
        .query(&plan.text, &plan.params)
        .await
        .map_err(|source| SearchError::Store {
            query: plan.text.clone(),
            params: plan.params.clone(),
            user_args: Box::new(user_args.clone()),
            source,
        })
}

/// The result of a search, shaped by its [`OutputMode`].
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutput {
    /// The JSON envelope with an aggregated feature collection.
    Features(ResultEnvelope),
    /// Flat rows for export.
    Rows {
        /// Matching rows in select order.
        rows: Vec<StoreRow>,
        /// Header to use when `rows` is empty.
        columns: Vec<&'static str>,
        /// Temporal dictionary for the viewport.
        domain: TemporalDomain,
    },
}

/// Serves searches against a [`SensorStore`].
#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn SensorStore>,
    builder: PredicateBuilder,
    compiler: QueryCompiler,
    resolver: TemporalDictionaryResolver,
}

impl SearchService {
    /// Creates a service over `store` with the given configuration.
    #[must_use]
    pub fn new(store: Arc<dyn SensorStore>, config: SearchConfig) -> Self {
        Self {
            store,
            builder: PredicateBuilder::new(config),
            compiler: QueryCompiler::new(config),
            resolver: TemporalDictionaryResolver::new(config),
        }
    }

    /// Resolves the dictionary and compiles the final query for `params`.
    ///
    /// The dictionary query always completes before the temporal clause is
    /// built, since a request without dates takes its window from it.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] on invalid parameters, compile failures, or
    /// a store failure while resolving the dictionary.
    pub async fn plan(
        &self,
        params: &QueryParams,
        mode: OutputMode,
    ) -> Result<(QueryPlan, TemporalDomain), SearchError> {
        let spatial = self.builder.spatial(params)?;
        let domain = self
            .resolver
            .resolve(self.store.as_ref(), &spatial, params)
            .await?;

        let predicates = self.builder.build(params, Some(&domain))?;
        let plan = self.compiler.compile(&predicates, mode)?;
        log::debug!("Compiled {mode:?} query: {}", plan.format_for_logging());

        Ok((plan, domain))
    }

    /// Runs a search.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] on invalid parameters, compile failures,
    /// store failures, or undecodable results.
    pub async fn search(
        &self,
        params: &QueryParams,
        mode: OutputMode,
    ) -> Result<SearchOutput, SearchError> {
        let (plan, domain) = self.plan(params, mode).await?;
        let rows = run_plan(self.store.as_ref(), &plan, params).await?;

        match mode {
            OutputMode::Features => {
                let collection = render::render_features(&rows)?;
                if collection.features.is_none() {
                    log::warn!("Found no features for {params:?}");
                } else {
                    log::info!("Found {} features", collection.points_count);
                }
                Ok(SearchOutput::Features(render::envelope(domain, collection)))
            }
            OutputMode::Rows => {
                log::info!("Exporting {} rows", rows.len());
                Ok(SearchOutput::Rows {
                    rows,
                    columns: row_column_names(),
                    domain,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::DateTime;
    use sensor_map_search_models::FeatureCollection;

    use super::*;
    use crate::compile::{DOMAIN_MAX_COLUMN, DOMAIN_MIN_COLUMN, FEATURE_COLLECTION_COLUMN};
    use crate::store::CellValue;

    const MIN_MS: i64 = 1_699_990_000_000;
    const MAX_MS: i64 = 1_700_090_000_000;

    /// Answers dictionary, feature and row queries from a fixed set of
    /// readings, recording every query it receives.
    #[derive(Default)]
    struct FakeStore {
        readings: Vec<StoreRow>,
        empty_domain: bool,
        fail: bool,
        calls: Mutex<Vec<(String, Vec<BoundValue>)>>,
    }

    impl FakeStore {
        fn with_readings(count: i64) -> Self {
            Self {
                readings: (0..count)
                    .map(|i| {
                        StoreRow::new([
                            ("logger_id", CellValue::Int(1)),
                            ("measurement_number", CellValue::Int(i)),
                            ("mag_x", CellValue::Float(0.5)),
                        ])
                    })
                    .collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<(String, Vec<BoundValue>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SensorStore for FakeStore {
        async fn query(
            &self,
            text: &str,
            params: &[BoundValue],
        ) -> Result<Vec<StoreRow>, StoreError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), params.to_vec()));

            if self.fail {
                return Err(StoreError::new("connection reset"));
            }

            if text.contains(DOMAIN_MIN_COLUMN) {
                let (min, max) = if self.empty_domain {
                    (CellValue::Null, CellValue::Null)
                } else {
                    (CellValue::Int(MIN_MS), CellValue::Int(MAX_MS))
                };
                return Ok(vec![StoreRow::new([
                    (DOMAIN_MIN_COLUMN, min),
                    (DOMAIN_MAX_COLUMN, max),
                ])]);
            }

            if text.contains(FEATURE_COLLECTION_COLUMN) {
                let features: Vec<serde_json::Value> = self
                    .readings
                    .iter()
                    .map(|_| {
                        serde_json::json!({
                            "type": "Feature",
                            "geometry": { "type": "Point", "coordinates": [10.5, 62.2] },
                            "properties": {}
                        })
                    })
                    .collect();
                let count = features.len();
                let features = if features.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::Value::Array(features)
                };
                let json = serde_json::json!({
                    "type": "FeatureCollection",
                    "features": features,
                    "pointsCount": count,
                    "clusterCount": 0
                });
                return Ok(vec![StoreRow::new([(
                    FEATURE_COLLECTION_COLUMN,
                    CellValue::Text(json.to_string()),
                )])]);
            }

            Ok(self.readings.clone())
        }
    }

    fn service(store: &Arc<FakeStore>) -> SearchService {
        SearchService::new(store.clone(), SearchConfig::default())
    }

    fn hessdalen() -> QueryParams {
        QueryParams {
            zoom: Some(8),
            ..QueryParams::for_bounds(10.0, 62.0, 11.0, 62.5)
        }
    }

    fn bbox_params() -> Vec<BoundValue> {
        vec![
            BoundValue::Float(10.0),
            BoundValue::Float(62.0),
            BoundValue::Float(11.0),
            BoundValue::Float(62.5),
        ]
    }

    fn ts(ms: i64) -> BoundValue {
        BoundValue::Timestamp(DateTime::from_timestamp_millis(ms).unwrap())
    }

    #[tokio::test]
    async fn no_dates_resolves_dictionary_then_uses_default_window() {
        let store = Arc::new(FakeStore::with_readings(2));
        let output = service(&store)
            .search(&hessdalen(), OutputMode::Features)
            .await
            .unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 2);

        let (dictionary_text, dictionary_params) = &calls[0];
        assert!(dictionary_text.contains(DOMAIN_MIN_COLUMN));
        assert_eq!(dictionary_params, &bbox_params());

        let (_, search_params) = &calls[1];
        let mut expected = bbox_params();
        expected.extend([ts(MIN_MS), ts(MIN_MS + 43_200_000)]);
        assert_eq!(search_params, &expected);

        let SearchOutput::Features(envelope) = output else {
            panic!("expected features output");
        };
        assert_eq!(envelope.status, 200);
        assert_eq!(envelope.dictionary.datetime, TemporalDomain::new(MIN_MS, MAX_MS));
        assert_eq!(envelope.results.unwrap().points_count, 2);
    }

    #[tokio::test]
    async fn explicit_dates_bind_fifth_and_sixth_params() {
        let store = Arc::new(FakeStore::with_readings(1));
        let params = QueryParams {
            from_date: DateTime::from_timestamp_millis(1_700_000_000_000),
            to_date: DateTime::from_timestamp_millis(1_700_050_000_000),
            ..hessdalen()
        };
        service(&store)
            .search(&params, OutputMode::Features)
            .await
            .unwrap();

        let calls = store.calls();
        let (text, search_params) = &calls[1];
        assert!(text.contains("BETWEEN $5 AND $6"));
        assert_eq!(search_params[4], ts(1_700_000_000_000));
        assert_eq!(search_params[5], ts(1_700_050_000_000));
    }

    #[tokio::test]
    async fn dictionary_ignores_time_filter() {
        let store = Arc::new(FakeStore::with_readings(0));
        let params = QueryParams {
            from_date: DateTime::from_timestamp_millis(1_800_000_000_000),
            to_date: DateTime::from_timestamp_millis(1_800_000_001_000),
            ..hessdalen()
        };
        let SearchOutput::Features(envelope) = service(&store)
            .search(&params, OutputMode::Features)
            .await
            .unwrap()
        else {
            panic!("expected features output");
        };

        let calls = store.calls();
        assert!(!calls[0].0.contains("BETWEEN"));
        assert_eq!(calls[0].1.len(), 4);
        assert_eq!(envelope.dictionary.datetime, TemporalDomain::new(MIN_MS, MAX_MS));
        assert_eq!(envelope.results, Some(FeatureCollection::empty()));
    }

    #[tokio::test]
    async fn points_count_matches_exported_rows() {
        let store = Arc::new(FakeStore::with_readings(3));
        let service = service(&store);

        let SearchOutput::Features(envelope) = service
            .search(&hessdalen(), OutputMode::Features)
            .await
            .unwrap()
        else {
            panic!("expected features output");
        };
        let SearchOutput::Rows { rows, .. } = service
            .search(&hessdalen(), OutputMode::Rows)
            .await
            .unwrap()
        else {
            panic!("expected rows output");
        };

        assert_eq!(envelope.results.unwrap().points_count, rows.len() as u64);

        let calls = store.calls();
        let (features_text, features_params) = &calls[1];
        let (rows_text, rows_params) = &calls[3];
        assert!(features_text.contains(rows_text.as_str()));
        assert_eq!(features_params, rows_params);
    }

    #[tokio::test]
    async fn csv_export_has_header_plus_one_line_per_row() {
        let store = Arc::new(FakeStore::with_readings(3));
        let SearchOutput::Rows { rows, columns, .. } = service(&store)
            .search(&hessdalen(), OutputMode::Rows)
            .await
            .unwrap()
        else {
            panic!("expected rows output");
        };

        let mut sink = Vec::new();
        render::write_csv(&mut sink, &rows, &columns).unwrap();
        let text = String::from_utf8(sink).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        let fields = lines[0].trim_end().split(',').count();
        assert!(lines.iter().all(|l| l.trim_end().split(',').count() == fields));
    }

    #[tokio::test]
    async fn empty_domain_searches_without_time_clause() {
        let store = Arc::new(FakeStore {
            empty_domain: true,
            ..FakeStore::default()
        });
        let SearchOutput::Features(envelope) = service(&store)
            .search(&hessdalen(), OutputMode::Features)
            .await
            .unwrap()
        else {
            panic!("expected features output");
        };

        let calls = store.calls();
        assert_eq!(calls[1].1, bbox_params());
        assert!(!calls[1].0.contains("ORDER BY"));
        assert!(envelope.dictionary.datetime.is_empty());
        assert_eq!(envelope.results, Some(FeatureCollection::empty()));
    }

    #[tokio::test]
    async fn invalid_bounds_never_reach_the_store() {
        let store = Arc::new(FakeStore::default());
        let params = QueryParams {
            minlat: Some(f64::NAN),
            ..hessdalen()
        };
        let err = service(&store)
            .search(&params, OutputMode::Rows)
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn store_failure_carries_query_context() {
        let store = Arc::new(FakeStore {
            fail: true,
            ..FakeStore::default()
        });
        let err = service(&store)
            .search(&hessdalen(), OutputMode::Features)
            .await
            .unwrap_err();

        let SearchError::Store {
            query,
            params,
            user_args,
            ..
        } = err
        else {
            panic!("expected store error");
        };
        assert!(query.contains(DOMAIN_MIN_COLUMN));
        assert_eq!(params, bbox_params());
        assert_eq!(*user_args, hessdalen());
    }
}
