//! Per-mode freshness tracking on top of a [`Store`]

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::warn;

use super::store::{CacheError, Store};
use crate::clock::Clock;
use crate::data::{ExtractionResult, Mode};

/// The last stored payload for a mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: ExtractionResult,
    /// RFC 3339 write time. Kept as text so a damaged value degrades the
    /// entry to stale instead of making it unreadable.
    #[serde(default, rename = "stored_at_hkt")]
    pub stored_at: Option<String>,
}

impl CacheEntry {
    pub fn new(result: ExtractionResult, stored_at: DateTime<FixedOffset>) -> Self {
        Self {
            result,
            stored_at: Some(stored_at.to_rfc3339()),
        }
    }

    /// Parsed write time, `None` when missing or unparsable
    pub fn stored_at(&self) -> Option<DateTime<FixedOffset>> {
        self.stored_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    }
}

/// Where a mode stands relative to the freshness window
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// Nothing stored (first run, or the entry expired)
    Empty,
    /// Younger than the window; serve as is
    Fresh(CacheEntry),
    /// At least as old as the window, or of unknown age
    Stale(CacheEntry),
}

/// Last acquisition result per mode, plus the policy deciding when it is stale
pub struct FreshnessCache {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    window: Duration,
    entry_ttl: Option<StdDuration>,
}

impl FreshnessCache {
    /// # Arguments
    /// * `window` - maximum age of an entry that is still served without refetching
    /// * `entry_ttl` - expiry handed to the store on every write, if any
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        window: StdDuration,
        entry_ttl: Option<StdDuration>,
    ) -> Self {
        Self {
            store,
            clock,
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
            entry_ttl,
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    /// Reads the stored entry for `mode` without side effects
    ///
    /// An entry that cannot be decoded, or whose flight count disagrees with
    /// its flight list, reads as `None`.
    pub fn read(&self, mode: Mode) -> Result<Option<CacheEntry>, CacheError> {
        let Some(raw) = self.store.get(&mode.cache_key())? else {
            return Ok(None);
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.result.is_consistent() => Ok(Some(entry)),
            Ok(entry) => {
                warn!(
                    %mode,
                    flight_count = entry.result.flight_count,
                    flights = entry.result.flights.len(),
                    "discarding inconsistent cache entry"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(%mode, error = %e, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Replaces the entry for `mode` with `result`, stamped `now`
    pub fn write(
        &self,
        mode: Mode,
        result: &ExtractionResult,
        now: DateTime<FixedOffset>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(result.clone(), now);
        let json = serde_json::to_string(&entry)?;
        self.store.set(&mode.cache_key(), json, self.entry_ttl)
    }

    /// Reads `mode` and classifies it against the clock
    pub fn freshness(&self, mode: Mode) -> Result<Freshness, CacheError> {
        Ok(match self.read(mode)? {
            None => Freshness::Empty,
            Some(entry) => self.classify(entry, self.clock.now()),
        })
    }

    /// Fresh iff `now - stored_at < window`; unknown age is stale
    pub fn classify(&self, entry: CacheEntry, now: DateTime<FixedOffset>) -> Freshness {
        match entry.stored_at() {
            Some(stored_at) if now.signed_duration_since(stored_at) < self.window => {
                Freshness::Fresh(entry)
            }
            _ => Freshness::Stale(entry),
        }
    }
}
