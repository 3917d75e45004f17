//! Deduplicating fetch orchestration.
//!
//! Map events fire far more often than the visible data changes. A request
//! is only sent when nothing is in flight and its signature differs from
//! the last one sent; everything else is dropped, not queued. Feature
//! fetches and CSV exports are tracked separately.
//!
//! Calls are also debounced on the leading edge: a call only goes through
//! if the previous call on the same channel was at least one debounce
//! window ago, and every call restarts the window. Exports use a window
//! ten times longer than feature requests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sensor_map_config::ClientConfig;
use sensor_map_search_models::{FeatureCollection, ResultEnvelope, TemporalDomain};

use crate::ClientError;
use crate::clock::Clock;
use crate::signature::{TimeRange, Viewport, signature};
use crate::transport::SearchTransport;

/// Deduplication state for one kind of request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchState {
    /// Signature of the last request sent; empty after a failure.
    pub last_signature: String,
    /// Whether a request is outstanding.
    pub in_flight: bool,
}

impl FetchState {
    /// Claims the slot for `signature`, or returns `false` if the request
    /// should be skipped.
    fn begin(&mut self, signature: &str) -> bool {
        if self.in_flight || self.last_signature == signature {
            return false;
        }
        self.in_flight = true;
        signature.clone_into(&mut self.last_signature);
        true
    }
}

/// Export debounce window as a multiple of the feature window.
const CSV_DEBOUNCE_FACTOR: i64 = 10;

/// Leading-edge debounce for one channel.
#[derive(Debug, Clone, Copy)]
struct Debounce {
    window_ms: i64,
    last_call_ms: Option<i64>,
}

impl Debounce {
    const fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            last_call_ms: None,
        }
    }

    /// Records a call at `now_ms` and reports whether it falls inside the
    /// window of the previous one.
    fn suppress(&mut self, now_ms: i64) -> bool {
        let suppressed = self
            .last_call_ms
            .is_some_and(|last| now_ms.saturating_sub(last) < self.window_ms);
        self.last_call_ms = Some(now_ms);
        suppressed
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Features,
    Csv,
}

#[derive(Debug)]
struct Inner {
    features: FetchState,
    csv: FetchState,
    features_debounce: Debounce,
    csv_debounce: Debounce,
    collection: Option<FeatureCollection>,
    domain: TemporalDomain,
}

impl Inner {
    const fn state(&mut self, channel: Channel) -> &mut FetchState {
        match channel {
            Channel::Features => &mut self.features,
            Channel::Csv => &mut self.csv,
        }
    }

    const fn debounce(&mut self, channel: Channel) -> &mut Debounce {
        match channel {
            Channel::Features => &mut self.features_debounce,
            Channel::Csv => &mut self.csv_debounce,
        }
    }
}

/// Releases the channel when dropped. Unless the call was settled first,
/// the signature is forgotten as well (and, for features, the stored
/// collection), so a failed or cancelled request can be sent again.
struct InFlightGuard<'a> {
    inner: &'a Mutex<Inner>,
    channel: Channel,
    settled: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut inner = lock(self.inner);
        let state = inner.state(self.channel);
        state.in_flight = false;
        if self.settled {
            return;
        }
        state.last_signature.clear();
        if matches!(self.channel, Channel::Features) {
            inner.collection = None;
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sends search requests through a [`SearchTransport`], skipping duplicate
/// and overlapping ones.
pub struct FetchOrchestrator {
    transport: Arc<dyn SearchTransport>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl FetchOrchestrator {
    /// Creates an orchestrator debouncing feature requests by
    /// `config.debounce_ms` and exports by ten times that, measured on
    /// `clock`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn SearchTransport>,
        config: &ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window_ms = i64::try_from(config.debounce_ms).unwrap_or(i64::MAX);
        Self {
            transport,
            clock,
            inner: Mutex::new(Inner {
                features: FetchState::default(),
                csv: FetchState::default(),
                features_debounce: Debounce::new(window_ms),
                csv_debounce: Debounce::new(window_ms.saturating_mul(CSV_DEBOUNCE_FACTOR)),
                collection: None,
                domain: TemporalDomain::default(),
            }),
        }
    }

    /// Requests features for `viewport` and `range`.
    ///
    /// Returns `Ok(None)` without contacting the server if the call is
    /// debounced, a request is in flight, or this exact request was the
    /// last one sent. On success the
    /// collection and dictionary are kept for [`Self::collection`] and
    /// [`Self::domain`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the request fails. The signature is
    /// forgotten and the stored collection cleared, so the same request
    /// can be retried.
    pub async fn request(
        &self,
        viewport: &Viewport,
        range: TimeRange,
    ) -> Result<Option<ResultEnvelope>, ClientError> {
        let query = signature(viewport, range);
        let Some(mut guard) = self.begin(Channel::Features, &query) else {
            log::trace!("Skipping search request: {query}");
            return Ok(None);
        };

        log::debug!("Requesting features: {query}");
        match self.transport.fetch_features(&query).await {
            Ok(envelope) => {
                let mut inner = lock(&self.inner);
                inner.collection.clone_from(&envelope.results);
                inner.domain = envelope.dictionary.datetime;
                drop(inner);
                guard.settled = true;
                Ok(Some(envelope))
            }
            Err(e) => {
                log::error!("Search request failed: {e}");
                Err(e)
            }
        }
    }

    /// Requests a CSV export for `viewport` and `range`, with the same
    /// deduplication as [`Self::request`] but independent state and a
    /// longer debounce.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the request fails; the export signature
    /// is forgotten.
    pub async fn export(
        &self,
        viewport: &Viewport,
        range: TimeRange,
    ) -> Result<Option<String>, ClientError> {
        let query = signature(viewport, range);
        let Some(mut guard) = self.begin(Channel::Csv, &query) else {
            log::trace!("Skipping export request: {query}");
            return Ok(None);
        };

        log::debug!("Requesting CSV export: {query}");
        match self.transport.fetch_csv(&query).await {
            Ok(body) => {
                guard.settled = true;
                Ok(Some(body))
            }
            Err(e) => {
                log::error!("Export request failed: {e}");
                Err(e)
            }
        }
    }

    fn begin(&self, channel: Channel, query: &str) -> Option<InFlightGuard<'_>> {
        let now = self.clock.now_ms();
        let mut inner = lock(&self.inner);
        if inner.debounce(channel).suppress(now) || !inner.state(channel).begin(query) {
            return None;
        }
        drop(inner);
        Some(InFlightGuard {
            inner: &self.inner,
            channel,
            settled: false,
        })
    }

    /// The last successfully fetched feature collection.
    #[must_use]
    pub fn collection(&self) -> Option<FeatureCollection> {
        lock(&self.inner).collection.clone()
    }

    /// The temporal dictionary from the last successful fetch.
    #[must_use]
    pub fn domain(&self) -> TemporalDomain {
        lock(&self.inner).domain
    }

    /// Snapshot of the feature fetch state.
    #[must_use]
    pub fn fetch_state(&self) -> FetchState {
        lock(&self.inner).features.clone()
    }

    /// Snapshot of the export state.
    #[must_use]
    pub fn export_state(&self) -> FetchState {
        lock(&self.inner).csv.clone()
    }
}
