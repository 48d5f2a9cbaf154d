//! Core data models for HK Flights
//!
//! This module contains the types shared by extraction, caching and serving:
//! the board mode, a single flight row, and the payload produced by one
//! acquisition attempt.

pub mod extractor;
pub mod fetcher;

pub use extractor::{ExtractError, FieldMap, RecordExtractor};
pub use fetcher::{ChromiumFetcher, DocumentFetcher, FetchConfig, FetchError, HttpFetcher};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version tag stamped on every payload
pub const VERSION_ID: &str = concat!("hkflights-", env!("CARGO_PKG_VERSION"));

/// Offset of Hong Kong Time from UTC in seconds
const HKT_OFFSET_SECS: i32 = 8 * 3600;

/// Returns the fixed UTC+8 offset used for every timestamp we emit
pub fn hkt() -> FixedOffset {
    FixedOffset::east_opt(HKT_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Which flight board to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Departures,
    Arrivals,
}

impl Mode {
    /// Both modes, in refresh order
    pub const ALL: [Mode; 2] = [Mode::Departures, Mode::Arrivals];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Departures => "departures",
            Mode::Arrivals => "arrivals",
        }
    }

    /// Public page listing this board
    pub fn default_url(self) -> &'static str {
        match self {
            Mode::Departures => {
                "https://www.hongkongairport.com/en/flights/departures/passenger.page"
            }
            Mode::Arrivals => "https://www.hongkongairport.com/en/flights/arrivals/passenger.page",
        }
    }

    /// Key under which this board's latest payload is persisted
    pub fn cache_key(self) -> String {
        format!("flight_data:{}", self.as_str())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "departures" => Ok(Mode::Departures),
            "arrivals" => Ok(Mode::Arrivals),
            other => Err(format!(
                "Invalid mode: '{}'. Valid modes: departures, arrivals",
                other
            )),
        }
    }
}

/// One scheduled flight row from a board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightRecord {
    /// Scheduled time as displayed, or `N/A`
    pub time: String,
    /// All flight numbers on the row, codeshares included, in display order
    #[serde(rename = "flight_numbers_only")]
    pub flight_numbers: Vec<String>,
    /// Destination (departures) or origin (arrivals)
    pub location: String,
    /// Terminal, `-` when not shown
    pub terminal: String,
    /// Check-in counters (departures) or baggage belts (arrivals), space-joined
    pub location_secondary: String,
    /// Boarding gate (departures) or parking stand (arrivals)
    pub gate: String,
    /// Free-text status such as "Boarding" or "At gate 12:05"
    pub status: String,
}

/// Outcome of one acquisition attempt for a mode
///
/// Successes and failures share one wire shape: a failure has an empty
/// `flights` list, `flight_count` of zero and `error` set. Consumers can
/// render either without inspecting which one they got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub version: String,
    #[serde(rename = "last_updated_hkt")]
    pub generated_at: DateTime<FixedOffset>,
    pub mode: Mode,
    pub flight_count: usize,
    pub flights: Vec<FlightRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    /// Builds a successful result; `flight_count` is derived from `flights`
    pub fn success(mode: Mode, flights: Vec<FlightRecord>, now: DateTime<FixedOffset>) -> Self {
        Self {
            version: VERSION_ID.to_string(),
            generated_at: now,
            mode,
            flight_count: flights.len(),
            flights,
            error: None,
        }
    }

    /// Builds a failure result carrying `message`
    pub fn failure(mode: Mode, message: impl Into<String>, now: DateTime<FixedOffset>) -> Self {
        Self {
            version: VERSION_ID.to_string(),
            generated_at: now,
            mode,
            flight_count: 0,
            flights: Vec::new(),
            error: Some(message.into()),
        }
    }

    /// Payload served when no data has been stored for `mode` yet
    pub fn warming_up(mode: Mode, now: DateTime<FixedOffset>) -> Self {
        Self::failure(
            mode,
            "Data is not available yet. The scraper is warming up. Please try again in a minute.",
            now,
        )
    }

    /// Payload served when the persistence backend cannot be reached
    pub fn cache_unavailable(mode: Mode, reason: &str, now: DateTime<FixedOffset>) -> Self {
        Self::failure(mode, format!("{}{}", CACHE_UNAVAILABLE_PREFIX, reason), now)
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// True when the error comes from the storage layer rather than the scrape
    pub fn is_cache_unavailable(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with(CACHE_UNAVAILABLE_PREFIX))
    }

    /// Checks the count/list invariant, which decoded payloads may violate
    pub fn is_consistent(&self) -> bool {
        self.flight_count == self.flights.len()
    }
}

const CACHE_UNAVAILABLE_PREFIX: &str = "Cache unavailable: ";
