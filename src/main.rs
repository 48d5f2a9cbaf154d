//! HK Flights - Hong Kong airport flight boards, scraped and cached
//!
//! Serves the departures and arrivals boards as JSON, runs the background
//! refresh worker, or performs one-off fetches from the command line.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hkflights::acquisition::AcquisitionManager;
use hkflights::cache::{FileStore, FreshnessCache, MemoryStore, Store};
use hkflights::cli::{Cli, CliError, Command, FetcherKind, PolicyArg, StartupConfig, StoreKind};
use hkflights::clock::SystemClock;
use hkflights::data::{ChromiumFetcher, DocumentFetcher, HttpFetcher};
use hkflights::refresh::RefreshHandle;
use hkflights::server;

/// Sends logs to stderr so `fetch` and `show` output stays clean JSON
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hkflights=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Wires store, clock, fetcher and cache into a manager
fn build_manager(config: &StartupConfig) -> Result<AcquisitionManager, Box<dyn std::error::Error>> {
    let store: Arc<dyn Store> = match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::File => {
            let file_store = match &config.cache_dir {
                Some(dir) => FileStore::with_dir(dir.clone()),
                None => FileStore::new().ok_or(CliError::NoCacheDir)?,
            };
            debug!(dir = %file_store.dir().display(), "using file store");
            Arc::new(file_store)
        }
    };

    let fetcher: Arc<dyn DocumentFetcher> = match config.fetcher {
        FetcherKind::Chromium => Arc::new(ChromiumFetcher::new(config.fetch.clone())),
        FetcherKind::Http => Arc::new(HttpFetcher::new(&config.fetch)?),
    };

    let cache = FreshnessCache::new(
        store,
        Arc::new(SystemClock),
        config.freshness_window,
        config.entry_ttl,
    );
    Ok(AcquisitionManager::new(
        cache,
        fetcher,
        config.acquisition.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    let config = StartupConfig::from_cli(&cli)?;
    let manager = Arc::new(build_manager(&config)?);

    match cli.command {
        Command::Serve { host, port, policy } => {
            // Keep the handle alive for as long as the server runs
            let _refresh = (policy == PolicyArg::Background)
                .then(|| RefreshHandle::spawn(manager.clone(), config.refresh.clone()));

            info!(?policy, "starting HK Flights v{}", env!("CARGO_PKG_VERSION"));
            server::start(SocketAddr::new(host, port), manager).await?;
        }
        Command::Worker => {
            info!("starting refresh worker v{}", env!("CARGO_PKG_VERSION"));
            let mut handle = RefreshHandle::spawn(manager, config.refresh.clone());

            loop {
                tokio::select! {
                    msg = handle.receiver.recv() => match msg {
                        Some(msg) => debug!(?msg, "refresh progress"),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupted");
                        break;
                    }
                }
            }
            handle.shutdown().await;
        }
        Command::Fetch { mode } => {
            let result = manager.refresh(mode).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.is_failure() {
                std::process::exit(2);
            }
        }
        Command::Show { mode } => {
            let result = manager.cached(mode);
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
