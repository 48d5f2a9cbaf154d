//! Acquisition orchestration: fetch, extract, cache
//!
//! [`AcquisitionManager::get_current`] never fails. Fetch and extraction
//! problems become a failure payload which is cached like any other result,
//! so a broken upstream page is reported once per freshness window rather
//! than refetched on every request.
//!
//! At most one acquisition per mode runs at a time. Callers that arrive while
//! one is in flight wait for it and are served its result.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, Freshness, FreshnessCache};
use crate::data::{
    DocumentFetcher, ExtractError, ExtractionResult, FetchConfig, FetchError, FieldMap,
    FlightRecord, Mode, RecordExtractor,
};

/// Slack added on top of the fetch bounds for the whole-cycle timeout
const CYCLE_TIMEOUT_MARGIN: Duration = Duration::from_secs(15);

/// Where reads get their data from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServePolicy {
    /// Reads check freshness and acquire inline when stale
    OnDemand,
    /// Reads only look at the cache; something else keeps it filled
    CacheOnly,
}

/// Source page and column layout for one mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    pub field_map: FieldMap,
}

impl Target {
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            url: mode.default_url().to_string(),
            field_map: FieldMap::for_mode(mode),
        }
    }
}

/// Configuration for the acquisition manager
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub policy: ServePolicy,
    /// Caller-side bound on one fetch + extract cycle
    pub cycle_timeout: Duration,
    pub departures: Target,
    pub arrivals: Target,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self::for_fetch(&FetchConfig::default())
    }
}

impl AcquisitionConfig {
    /// On-demand config whose cycle timeout covers `fetch`'s wait and settle time
    pub fn for_fetch(fetch: &FetchConfig) -> Self {
        Self {
            policy: ServePolicy::OnDemand,
            cycle_timeout: fetch.wait_timeout + fetch.settle_delay + CYCLE_TIMEOUT_MARGIN,
            departures: Target::for_mode(Mode::Departures),
            arrivals: Target::for_mode(Mode::Arrivals),
        }
    }

    pub fn target(&self, mode: Mode) -> &Target {
        match mode {
            Mode::Departures => &self.departures,
            Mode::Arrivals => &self.arrivals,
        }
    }
}

/// Why an acquisition cycle produced no records
#[derive(Debug, Error)]
enum AcquisitionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Serves current flight data, refreshing it when stale
pub struct AcquisitionManager {
    cache: FreshnessCache,
    fetcher: Arc<dyn DocumentFetcher>,
    config: AcquisitionConfig,
    /// Per-mode acquisition lock, holding the last result this manager
    /// acquired so waiters are served even when the store is down
    departures_slot: Mutex<Option<ExtractionResult>>,
    arrivals_slot: Mutex<Option<ExtractionResult>>,
}

impl AcquisitionManager {
    pub fn new(
        cache: FreshnessCache,
        fetcher: Arc<dyn DocumentFetcher>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            cache,
            fetcher,
            config,
            departures_slot: Mutex::new(None),
            arrivals_slot: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> ServePolicy {
        self.config.policy
    }

    /// Current payload for `mode`, according to the configured [`ServePolicy`]
    pub async fn get_current(&self, mode: Mode) -> ExtractionResult {
        match self.config.policy {
            ServePolicy::OnDemand => self.current_on_demand(mode).await,
            ServePolicy::CacheOnly => self.cached(mode),
        }
    }

    /// Runs one acquisition cycle for `mode` regardless of freshness and
    /// stores the outcome
    pub async fn refresh(&self, mode: Mode) -> ExtractionResult {
        let mut last = self.slot(mode).lock().await;
        let result = self.acquire_and_store(mode).await;
        *last = Some(result.clone());
        result
    }

    /// Pure cache lookup; never fetches
    ///
    /// # Returns
    /// * the stored payload, success or failure
    /// * a "warming up" payload when nothing is stored yet
    /// * a "cache unavailable" payload when the backend errors
    pub fn cached(&self, mode: Mode) -> ExtractionResult {
        match self.cache.read(mode) {
            Ok(Some(entry)) => entry.result,
            Ok(None) => ExtractionResult::warming_up(mode, self.cache.now()),
            Err(e) => {
                error!(%mode, error = %e, "cache read failed");
                ExtractionResult::cache_unavailable(mode, &e.to_string(), self.cache.now())
            }
        }
    }

    async fn current_on_demand(&self, mode: Mode) -> ExtractionResult {
        if let Some(result) = self.fresh_result(mode) {
            return result;
        }

        let mut last = self.slot(mode).lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(result) = self.fresh_result(mode) {
            debug!(%mode, "served result of concurrent acquisition");
            return result;
        }
        // The store may have lost or refused that caller's write
        if let Some(result) = last.as_ref().filter(|r| self.is_fresh(r)) {
            debug!(%mode, "served last acquired result from memory");
            return result.clone();
        }

        let result = self.acquire_and_store(mode).await;
        *last = Some(result.clone());
        result
    }

    fn is_fresh(&self, result: &ExtractionResult) -> bool {
        let entry = CacheEntry::new(result.clone(), result.generated_at);
        matches!(
            self.cache.classify(entry, self.cache.now()),
            Freshness::Fresh(_)
        )
    }

    /// The cached result if it is still fresh. Backend errors count as Empty
    /// so that an on-demand read can still acquire.
    fn fresh_result(&self, mode: Mode) -> Option<ExtractionResult> {
        match self.cache.freshness(mode) {
            Ok(Freshness::Fresh(entry)) => Some(entry.result),
            Ok(Freshness::Stale(_)) | Ok(Freshness::Empty) => None,
            Err(e) => {
                warn!(%mode, error = %e, "cache read failed, treating as empty");
                None
            }
        }
    }

    fn slot(&self, mode: Mode) -> &Mutex<Option<ExtractionResult>> {
        match mode {
            Mode::Departures => &self.departures_slot,
            Mode::Arrivals => &self.arrivals_slot,
        }
    }

    async fn acquire_and_store(&self, mode: Mode) -> ExtractionResult {
        let result = self.acquire(mode).await;

        if let Err(e) = self.cache.write(mode, &result, self.cache.now()) {
            error!(%mode, error = %e, "failed to store acquisition result");
        }
        result
    }

    /// Fetch + extract under the cycle timeout, folding every error into a
    /// failure payload
    async fn acquire(&self, mode: Mode) -> ExtractionResult {
        let target = self.config.target(mode);
        info!(%mode, url = %target.url, "starting acquisition");

        let outcome =
            tokio::time::timeout(self.config.cycle_timeout, self.fetch_and_extract(target)).await;
        let now = self.cache.now();

        match outcome {
            Ok(Ok(flights)) => {
                info!(%mode, flights = flights.len(), "acquisition succeeded");
                ExtractionResult::success(mode, flights, now)
            }
            Ok(Err(e)) => {
                error!(%mode, error = %e, "acquisition failed");
                ExtractionResult::failure(mode, e.to_string(), now)
            }
            Err(_) => {
                error!(
                    %mode,
                    timeout_secs = self.config.cycle_timeout.as_secs(),
                    "acquisition timed out"
                );
                ExtractionResult::failure(
                    mode,
                    format!(
                        "Acquisition timed out after {}s",
                        self.config.cycle_timeout.as_secs()
                    ),
                    now,
                )
            }
        }
    }

    async fn fetch_and_extract(
        &self,
        target: &Target,
    ) -> Result<Vec<FlightRecord>, AcquisitionError> {
        let markup = self.fetcher.fetch(&target.url).await?;
        let extractor = RecordExtractor::new(&target.field_map)?;
        Ok(extractor.extract(&markup)?)
    }
}
