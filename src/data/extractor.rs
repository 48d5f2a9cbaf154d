//! Flight board extraction from rendered HTML
//!
//! Turns a rendered board page into [`FlightRecord`]s using CSS selectors.
//! The algorithm is the same for every board; the per-board differences
//! (which column holds the location, the counters/belts and the gate) are
//! supplied as a [`FieldMap`].
//!
//! The source markup is inconsistent about whether a cell's text sits in a
//! nested `<span>` or directly in the cell, so every field is resolved through
//! a fallback chain: the nested form first, then the cell itself, then a
//! field-specific default.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};

use super::{FlightRecord, Mode};

/// Rows considered at all, before the flight-row predicate
const ROW_SELECTOR: &str = "tbody tr, table tr, .flight-row";

/// A candidate row must contain one of these to be looked at further
const FLIGHT_ROW_PREDICATE: &str = ".flightNo, [class*=\"flight\"]";

/// Elements holding one flight number each
const FLIGHT_NO_SELECTOR: &str = ".flightNo";

/// Value used when a field cannot be found
const DEFAULT_VALUE: &str = "N/A";

/// Value used when a terminal cannot be found
const DEFAULT_TERMINAL: &str = "-";

/// Longest text accepted in a single field. Anything longer means the cell
/// swallowed neighbouring markup.
const MAX_FIELD_CHARS: usize = 512;

/// Errors that fail a whole extraction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Nothing on the page looked like a flight row
    #[error("No flight data rows found in HTML")]
    NoRowsFound,

    /// Rows were found but none of them produced a record
    #[error("No valid flight data could be extracted")]
    NoValidRecords,

    /// A configured class name does not form a usable selector
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Problems confined to a single row; the row is dropped and logged
#[derive(Debug, Error)]
enum RowError {
    #[error("field '{field}' is {len} characters long")]
    OversizedField { field: &'static str, len: usize },
}

/// CSS classes of the three columns that differ between boards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    /// Destination (departures) or origin (arrivals)
    pub location: String,
    /// Check-in counters (departures) or baggage belts (arrivals)
    pub location_secondary: String,
    /// Gate (departures) or parking stand (arrivals)
    pub gate: String,
}

impl FieldMap {
    /// Column classes used by the airport's own boards
    pub fn for_mode(mode: Mode) -> Self {
        let (location, location_secondary, gate) = match mode {
            Mode::Departures => ("destData", "checkInData", "gateData"),
            Mode::Arrivals => ("originData", "beltData", "parkingData"),
        };
        Self {
            location: location.to_string(),
            location_secondary: location_secondary.to_string(),
            gate: gate.to_string(),
        }
    }
}

/// Ordered selector candidates for one field, plus its default
struct FieldChain {
    name: &'static str,
    selectors: Vec<Selector>,
    default: &'static str,
}

impl FieldChain {
    /// Chain trying `.class span` then `.class`
    fn for_class(name: &'static str, class: &str, default: &'static str) -> Result<Self, ExtractError> {
        let class_selector = class_selector(class)?;
        Ok(Self {
            name,
            selectors: vec![
                parse_selector(&format!("{} span", class_selector))?,
                parse_selector(&class_selector)?,
            ],
            default,
        })
    }

    /// First non-empty text along the chain, or the default
    fn resolve(&self, row: &ElementRef<'_>) -> Result<String, RowError> {
        for selector in &self.selectors {
            if let Some(element) = row.select(selector).next() {
                let text = element_text(&element);
                if !text.is_empty() {
                    return checked(self.name, text);
                }
            }
        }
        Ok(self.default.to_string())
    }
}

/// Extracts flight records from a rendered board page
pub struct RecordExtractor {
    rows: Selector,
    predicate: Selector,
    flight_no: Selector,
    time: FieldChain,
    location: FieldChain,
    terminal: FieldChain,
    gate: FieldChain,
    status: FieldChain,
    secondary_parts: Selector,
    secondary_cell: Selector,
}

impl RecordExtractor {
    /// Compiles the selectors for `field_map`
    ///
    /// # Returns
    /// * `Err(ExtractError::InvalidSelector)` if a class name is empty or
    ///   contains characters that are not valid in a bare class selector
    pub fn new(field_map: &FieldMap) -> Result<Self, ExtractError> {
        let secondary = class_selector(&field_map.location_secondary)?;
        Ok(Self {
            rows: parse_selector(ROW_SELECTOR)?,
            predicate: parse_selector(FLIGHT_ROW_PREDICATE)?,
            flight_no: parse_selector(FLIGHT_NO_SELECTOR)?,
            time: FieldChain::for_class("time", "timeData", DEFAULT_VALUE)?,
            location: FieldChain::for_class("location", &field_map.location, DEFAULT_VALUE)?,
            terminal: FieldChain::for_class("terminal", "terminalData", DEFAULT_TERMINAL)?,
            gate: FieldChain::for_class("gate", &field_map.gate, DEFAULT_VALUE)?,
            status: FieldChain::for_class("status", "statusData", DEFAULT_VALUE)?,
            secondary_parts: parse_selector(&format!("{} span", secondary))?,
            secondary_cell: parse_selector(&secondary)?,
        })
    }

    /// Extracts all flight rows from `markup`, in document order
    ///
    /// # Returns
    /// * `Ok(records)` - at least one record
    /// * `Err(ExtractError::NoRowsFound)` - no row passed the flight-row predicate
    /// * `Err(ExtractError::NoValidRecords)` - every candidate row was dropped
    pub fn extract(&self, markup: &str) -> Result<Vec<FlightRecord>, ExtractError> {
        let document = Html::parse_document(markup);

        let candidates: Vec<ElementRef<'_>> = document
            .select(&self.rows)
            .filter(|row| row.select(&self.predicate).next().is_some())
            .collect();

        if candidates.is_empty() {
            return Err(ExtractError::NoRowsFound);
        }

        let mut records = Vec::with_capacity(candidates.len());
        for (index, row) in candidates.iter().enumerate() {
            match self.extract_row(row) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(row = index, error = %e, "skipping malformed row"),
            }
        }

        debug!(
            candidates = candidates.len(),
            records = records.len(),
            "extraction finished"
        );

        if records.is_empty() {
            return Err(ExtractError::NoValidRecords);
        }
        Ok(records)
    }

    /// Builds one record, or `None` when the row carries no flight number
    fn extract_row(&self, row: &ElementRef<'_>) -> Result<Option<FlightRecord>, RowError> {
        let flight_numbers = row
            .select(&self.flight_no)
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
            .map(|text| checked("flight_numbers_only", text))
            .collect::<Result<Vec<_>, _>>()?;

        if flight_numbers.is_empty() {
            return Ok(None);
        }

        Ok(Some(FlightRecord {
            time: self.time.resolve(row)?,
            flight_numbers,
            location: self.location.resolve(row)?,
            terminal: self.terminal.resolve(row)?,
            location_secondary: self.secondary_location(row)?,
            gate: self.gate.resolve(row)?,
            status: self.status.resolve(row)?,
        }))
    }

    /// Joins every sub-element (e.g. several belts) with a space, falling back
    /// to the cell's own text
    fn secondary_location(&self, row: &ElementRef<'_>) -> Result<String, RowError> {
        let parts: Vec<String> = row
            .select(&self.secondary_parts)
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
            .collect();

        let joined = if parts.is_empty() {
            row.select(&self.secondary_cell)
                .next()
                .map(|el| element_text(&el))
                .unwrap_or_default()
        } else {
            parts.join(" ")
        };

        if joined.is_empty() {
            Ok(DEFAULT_VALUE.to_string())
        } else {
            checked("location_secondary", joined)
        }
    }
}

/// Collect all text content from an element. Each text node is trimmed and
/// whitespace-collapsed; the nodes are then concatenated with no separator,
/// so `CX<b>100</b>` reads as `CX100`.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .map(|node| node.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

fn checked(field: &'static str, text: String) -> Result<String, RowError> {
    let len = text.chars().count();
    if len > MAX_FIELD_CHARS {
        return Err(RowError::OversizedField { field, len });
    }
    Ok(text)
}

/// Turns a bare class name into `.class`, rejecting anything else
fn class_selector(class: &str) -> Result<String, ExtractError> {
    let valid = !class.is_empty()
        && !class.starts_with(|c: char| c.is_ascii_digit())
        && class
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ExtractError::InvalidSelector {
            selector: class.to_string(),
            reason: "not a bare CSS class name".to_string(),
        });
    }
    Ok(format!(".{}", class))
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}
