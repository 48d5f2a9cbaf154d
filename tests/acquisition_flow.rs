//! End-to-end acquisition over real board markup and an on-disk cache
//!
//! A counting fetcher replays the fixture pages, a manual clock moves time,
//! and a FileStore in a temp directory plays the shared cache that separate
//! server and worker processes would use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeZone;
use tempfile::TempDir;

use hkflights::acquisition::{AcquisitionConfig, AcquisitionManager, ServePolicy};
use hkflights::cache::{FileStore, FreshnessCache};
use hkflights::clock::ManualClock;
use hkflights::data::{hkt, DocumentFetcher, FetchError, Mode};

const DEPARTURES: &str = include_str!("fixtures/departures.html");
const ARRIVALS: &str = include_str!("fixtures/arrivals.html");

/// Replays fixture pages by URL and counts every fetch
struct FixtureFetcher {
    calls: AtomicUsize,
    fail: bool,
}

impl FixtureFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentFetcher for FixtureFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail {
            return Err(FetchError::Navigation("net::ERR_CONNECTION_RESET".to_string()));
        }
        if url.contains("arrivals") {
            Ok(ARRIVALS.to_string())
        } else {
            Ok(DEPARTURES.to_string())
        }
    }
}

fn clock() -> Arc<ManualClock> {
    let start = hkt().with_ymd_and_hms(2024, 7, 15, 0, 0, 0).unwrap();
    Arc::new(ManualClock::new(start))
}

fn manager(
    dir: &TempDir,
    clock: Arc<ManualClock>,
    fetcher: Arc<FixtureFetcher>,
    policy: ServePolicy,
) -> Arc<AcquisitionManager> {
    manager_with_ttl(dir, clock, fetcher, policy, Duration::from_secs(600))
}

fn manager_with_ttl(
    dir: &TempDir,
    clock: Arc<ManualClock>,
    fetcher: Arc<FixtureFetcher>,
    policy: ServePolicy,
    entry_ttl: Duration,
) -> Arc<AcquisitionManager> {
    let store = Arc::new(FileStore::with_dir(dir.path().to_path_buf()));
    let cache = FreshnessCache::new(store, clock, Duration::from_secs(60), Some(entry_ttl));
    let config = AcquisitionConfig {
        policy,
        ..AcquisitionConfig::default()
    };
    Arc::new(AcquisitionManager::new(cache, fetcher, config))
}

#[tokio::test]
async fn test_departures_board_is_extracted_and_cached() {
    let dir = TempDir::new().unwrap();
    let fetcher = FixtureFetcher::new();
    let manager = manager(&dir, clock(), fetcher.clone(), ServePolicy::OnDemand);

    let result = manager.get_current(Mode::Departures).await;

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(result.flight_count, 3);
    assert_eq!(result.flights.len(), 3);

    let first = &result.flights[0];
    assert_eq!(first.time, "00:05");
    assert_eq!(first.flight_numbers, vec!["CX 251", "AA 8900", "BA 4102"]);
    assert_eq!(first.location, "London (Heathrow)");
    assert_eq!(first.terminal, "T1");
    assert_eq!(first.location_secondary, "A B");
    assert_eq!(first.gate, "23");
    assert_eq!(first.status, "Dep 00:21");

    // Text directly in the cell, empty terminal, span-less counter
    let second = &result.flights[1];
    assert_eq!(second.time, "00:15");
    assert_eq!(second.location, "Dubai");
    assert_eq!(second.terminal, "-");
    assert_eq!(second.location_secondary, "J");
    assert_eq!(second.gate, "61");

    let third = &result.flights[2];
    assert_eq!(third.location_secondary, "N/A");
    assert_eq!(third.gate, "N/A");
    assert_eq!(third.status, "Cancelled");

    assert!(dir.path().join("flight_data_departures.json").exists());
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_arrivals_board_uses_arrival_columns() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, clock(), FixtureFetcher::new(), ServePolicy::OnDemand);

    let result = manager.get_current(Mode::Arrivals).await;

    assert_eq!(result.mode, Mode::Arrivals);
    assert_eq!(result.flight_count, 2);
    let first = &result.flights[0];
    assert_eq!(first.flight_numbers, vec!["CX 100", "QF 8100"]);
    assert_eq!(first.location, "Sydney");
    assert_eq!(first.location_secondary, "5 6");
    assert_eq!(first.gate, "N21");
    assert_eq!(result.flights[1].location_secondary, "N/A");
}

#[tokio::test]
async fn test_freshness_window_controls_refetching() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let fetcher = FixtureFetcher::new();
    let manager = manager(&dir, clock.clone(), fetcher.clone(), ServePolicy::OnDemand);

    let first = manager.get_current(Mode::Departures).await;
    assert_eq!(fetcher.calls(), 1);

    clock.advance(chrono::Duration::seconds(59));
    let again = manager.get_current(Mode::Departures).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(again, first);

    clock.advance(chrono::Duration::seconds(1));
    let refreshed = manager.get_current(Mode::Departures).await;
    assert_eq!(fetcher.calls(), 2);
    assert!(refreshed.generated_at > first.generated_at);
}

#[tokio::test]
async fn test_concurrent_readers_share_one_acquisition() {
    let dir = TempDir::new().unwrap();
    let fetcher = FixtureFetcher::new();
    let manager = manager(&dir, clock(), fetcher.clone(), ServePolicy::OnDemand);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_current(Mode::Departures).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(fetcher.calls(), 1);
    assert!(results.iter().all(|r| r == &results[0]));
}

#[tokio::test]
async fn test_failure_is_cached_for_the_window() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let fetcher = FixtureFetcher::failing();
    let manager = manager(&dir, clock.clone(), fetcher.clone(), ServePolicy::OnDemand);

    let result = manager.get_current(Mode::Arrivals).await;
    assert_eq!(result.flight_count, 0);
    assert!(result.flights.is_empty());
    assert!(result.error.as_deref().unwrap().contains("ERR_CONNECTION_RESET"));

    clock.advance(chrono::Duration::seconds(30));
    let again = manager.get_current(Mode::Arrivals).await;
    assert_eq!(again, result);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_worker_fills_cache_for_cache_only_server() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let worker_fetcher = FixtureFetcher::new();
    let server_fetcher = FixtureFetcher::new();
    let worker = manager(&dir, clock.clone(), worker_fetcher.clone(), ServePolicy::OnDemand);
    let server = manager(&dir, clock.clone(), server_fetcher.clone(), ServePolicy::CacheOnly);

    let warming = server.get_current(Mode::Departures).await;
    assert_eq!(warming.flight_count, 0);
    assert!(warming.error.as_deref().unwrap().to_lowercase().contains("warming up"));

    let stored = worker.refresh(Mode::Departures).await;
    let served = server.get_current(Mode::Departures).await;
    assert_eq!(served, stored);

    // Cache-only readers keep serving stale data rather than fetching
    clock.advance(chrono::Duration::minutes(5));
    assert_eq!(server.get_current(Mode::Departures).await, stored);

    assert_eq!(worker_fetcher.calls(), 1);
    assert_eq!(server_fetcher.calls(), 0);
}

#[tokio::test]
async fn test_corrupt_cache_file_is_replaced_on_demand() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("flight_data_departures.json"), "{ not json").unwrap();
    let fetcher = FixtureFetcher::new();
    let manager = manager(&dir, clock(), fetcher.clone(), ServePolicy::OnDemand);

    let result = manager.get_current(Mode::Departures).await;

    assert_eq!(result.flight_count, 3);
    assert_eq!(fetcher.calls(), 1);
    let written = std::fs::read_to_string(dir.path().join("flight_data_departures.json")).unwrap();
    assert!(written.contains("flight_numbers_only"));
}

#[tokio::test]
async fn test_torn_cache_file_reads_as_warming_up_not_outage() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("flight_data_departures.json"), "{ torn").unwrap();
    let manager = manager(&dir, clock(), FixtureFetcher::new(), ServePolicy::CacheOnly);

    let result = manager.get_current(Mode::Departures).await;

    assert!(!result.is_cache_unavailable(), "error was {:?}", result.error);
    assert!(result.error.as_deref().unwrap().to_lowercase().contains("warming up"));
    assert_eq!(result.flight_count, 0);
}

#[tokio::test]
async fn test_dead_worker_entries_expire_to_warming_up() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let ttl = Duration::from_millis(1);
    let worker = manager_with_ttl(
        &dir,
        clock.clone(),
        FixtureFetcher::new(),
        ServePolicy::OnDemand,
        ttl,
    );
    let server = manager_with_ttl(&dir, clock, FixtureFetcher::new(), ServePolicy::CacheOnly, ttl);

    worker.refresh(Mode::Arrivals).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = server.get_current(Mode::Arrivals).await;
    assert_eq!(result.flight_count, 0);
    assert!(!result.is_cache_unavailable());
    assert!(result.error.as_deref().unwrap().to_lowercase().contains("warming up"));
}
