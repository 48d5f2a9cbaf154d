//! HK Flights Library
//!
//! Scrapes the Hong Kong airport departures and arrivals boards, normalizes
//! them into flight records and keeps the latest result per board cached so
//! that reads do not trigger redundant page renders.

pub mod acquisition;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod data;
pub mod refresh;
pub mod server;
