//! Command-line interface parsing for HK Flights
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! the configuration structs used by the fetcher, cache, manager and refresh
//! loop. Every option can also be set through an `HKFLIGHTS_*` environment
//! variable.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::acquisition::{AcquisitionConfig, ServePolicy};
use crate::data::{FetchConfig, Mode};
use crate::refresh::RefreshConfig;

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// The given mode name is not recognized
    #[error("Invalid mode: '{0}'. Valid modes: departures, arrivals")]
    InvalidMode(String),

    /// A duration option was zero where a positive value is required
    #[error("--{0} must be greater than zero")]
    ZeroDuration(&'static str),

    /// The worker writes where nobody else can read
    #[error("The worker needs a shared store; use --store file")]
    WorkerNeedsSharedStore,

    /// No cache directory was given and none could be derived
    #[error("Could not determine a cache directory; pass --cache-dir")]
    NoCacheDir,
}

/// HK Flights - Hong Kong airport departures and arrivals, scraped and cached
#[derive(Parser, Debug)]
#[command(name = "hkflights")]
#[command(about = "Hong Kong airport flight boards, scraped and cached")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub options: Options,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve both boards as JSON over HTTP
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0", env = "HKFLIGHTS_HOST")]
        host: IpAddr,
        /// Port to bind
        #[arg(long, default_value_t = 5001, env = "HKFLIGHTS_PORT")]
        port: u16,
        /// on-demand: refresh inside requests; background: refresh on a timer
        #[arg(long, value_enum, default_value_t = PolicyArg::OnDemand, env = "HKFLIGHTS_POLICY")]
        policy: PolicyArg,
    },
    /// Refresh both boards forever, writing to the shared store
    Worker,
    /// Acquire one board now and print it as JSON
    Fetch {
        /// departures or arrivals
        #[arg(value_parser = parse_mode_arg)]
        mode: Mode,
    },
    /// Print the stored board without fetching
    Show {
        /// departures or arrivals
        #[arg(value_parser = parse_mode_arg)]
        mode: Mode,
    },
}

/// How `serve` keeps data current
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    OnDemand,
    Background,
}

/// Persistence backend
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// JSON files, shared between processes
    File,
    /// Process memory, lost on restart
    Memory,
}

/// Page fetcher
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    /// Headless Chromium, for client-rendered boards
    Chromium,
    /// Plain HTTP GET
    Http,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct Options {
    /// Where payloads are persisted
    #[arg(long, global = true, value_enum, default_value_t = StoreKind::File, env = "HKFLIGHTS_STORE")]
    pub store: StoreKind,

    /// Directory for the file store (defaults to the XDG cache directory)
    #[arg(long, global = true, env = "HKFLIGHTS_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// How pages are fetched
    #[arg(long, global = true, value_enum, default_value_t = FetcherKind::Chromium, env = "HKFLIGHTS_FETCHER")]
    pub fetcher: FetcherKind,

    /// Browser binary for the chromium fetcher
    #[arg(long, global = true, env = "HKFLIGHTS_CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Page to scrape for departures
    #[arg(long, global = true, env = "HKFLIGHTS_DEPARTURES_URL")]
    pub departures_url: Option<String>,

    /// Page to scrape for arrivals
    #[arg(long, global = true, env = "HKFLIGHTS_ARRIVALS_URL")]
    pub arrivals_url: Option<String>,

    /// Seconds a stored board is served before it is refetched
    #[arg(long, global = true, default_value_t = 60, env = "HKFLIGHTS_FRESHNESS_SECS")]
    pub freshness_secs: u64,

    /// Seconds after which the store drops a board entirely (0 keeps it forever)
    #[arg(long, global = true, default_value_t = 600, env = "HKFLIGHTS_ENTRY_TTL_SECS")]
    pub entry_ttl_secs: u64,

    /// Seconds to wait for the board's first row to render
    #[arg(long, global = true, default_value_t = 45, env = "HKFLIGHTS_WAIT_TIMEOUT_SECS")]
    pub wait_timeout_secs: u64,

    /// Seconds to let the page finish rendering after the first row appears
    #[arg(long, global = true, default_value_t = 8, env = "HKFLIGHTS_SETTLE_SECS")]
    pub settle_secs: u64,

    /// Seconds between background refresh cycles
    #[arg(long, global = true, default_value_t = 60, env = "HKFLIGHTS_CYCLE_SECS")]
    pub cycle_secs: u64,

    /// Seconds to pause between departures and arrivals within a cycle
    #[arg(long, global = true, default_value_t = 5, env = "HKFLIGHTS_MODE_DELAY_SECS")]
    pub mode_delay_secs: u64,
}

/// Configuration derived from CLI arguments for application startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub store: StoreKind,
    pub cache_dir: Option<PathBuf>,
    pub fetcher: FetcherKind,
    pub fetch: FetchConfig,
    pub acquisition: AcquisitionConfig,
    pub refresh: RefreshConfig,
    /// Maximum age of a board that is served without refetching
    pub freshness_window: Duration,
    /// Expiry handed to the store, if any
    pub entry_ttl: Option<Duration>,
}

/// Parses a mode string argument into a Mode.
///
/// # Returns
/// * `Ok(Mode)` if the string names a board
/// * `Err(CliError::InvalidMode)` if it doesn't
pub fn parse_mode_arg(s: &str) -> Result<Mode, CliError> {
    s.parse::<Mode>()
        .map_err(|_| CliError::InvalidMode(s.to_string()))
}

fn positive(name: &'static str, secs: u64) -> Result<Duration, CliError> {
    if secs == 0 {
        return Err(CliError::ZeroDuration(name));
    }
    Ok(Duration::from_secs(secs))
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with appropriate settings
    /// * `Err(CliError)` if a value is out of range or the combination is unusable
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let opts = &cli.options;

        if cli.command == Command::Worker && opts.store == StoreKind::Memory {
            return Err(CliError::WorkerNeedsSharedStore);
        }

        let fetch = FetchConfig {
            wait_timeout: positive("wait-timeout-secs", opts.wait_timeout_secs)?,
            settle_delay: Duration::from_secs(opts.settle_secs),
            chrome_path: opts.chrome_path.clone(),
            ..FetchConfig::default()
        };

        let policy = match &cli.command {
            Command::Serve {
                policy: PolicyArg::Background,
                ..
            }
            | Command::Show { .. } => ServePolicy::CacheOnly,
            _ => ServePolicy::OnDemand,
        };
        let mut acquisition = AcquisitionConfig {
            policy,
            ..AcquisitionConfig::for_fetch(&fetch)
        };
        if let Some(url) = &opts.departures_url {
            acquisition.departures.url = url.clone();
        }
        if let Some(url) = &opts.arrivals_url {
            acquisition.arrivals.url = url.clone();
        }

        let refresh = RefreshConfig {
            cycle_interval: positive("cycle-secs", opts.cycle_secs)?,
            mode_delay: Duration::from_secs(opts.mode_delay_secs),
            enabled: true,
        };

        Ok(StartupConfig {
            store: opts.store,
            cache_dir: opts.cache_dir.clone(),
            fetcher: opts.fetcher,
            fetch,
            acquisition,
            refresh,
            freshness_window: positive("freshness-secs", opts.freshness_secs)?,
            entry_ttl: (opts.entry_ttl_secs > 0).then(|| Duration::from_secs(opts.entry_ttl_secs)),
        })
    }
}
