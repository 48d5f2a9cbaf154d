//! Background data refresh system
//!
//! Runs acquisition for every mode on a fixed period, independent of read
//! traffic, and reports progress over a tokio channel. Paired with
//! [`ServePolicy::CacheOnly`](crate::acquisition::ServePolicy) readers never
//! trigger a fetch themselves.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::acquisition::AcquisitionManager;
use crate::data::Mode;

/// Messages sent from the background loop
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshMessage {
    /// A cycle over all modes started
    CycleStarted,
    /// One mode was acquired and stored
    ModeRefreshed {
        mode: Mode,
        flight_count: usize,
        error: Option<String>,
    },
    /// All modes were refreshed
    CycleCompleted,
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between the starts of consecutive cycles
    pub cycle_interval: Duration,
    /// Pause between modes within a cycle, to spare the upstream site
    pub mode_delay: Duration,
    /// Whether the loop runs at all
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(60),
            mode_delay: Duration::from_secs(5),
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresh loop
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    /// Flag to signal shutdown
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Spawns the refresh loop; the first cycle starts immediately
    ///
    /// # Arguments
    /// * `manager` - Manager whose cache the loop keeps filled
    /// * `config` - Cycle timing
    pub fn spawn(manager: Arc<AcquisitionManager>, config: RefreshConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.cycle_interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            run_cycle(&manager, &config, &msg_tx).await;
                        }
                        _ = shutdown_rx.recv() => {
                            info!("refresh loop shutting down");
                            break;
                        }
                    }
                }
            });
        }

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Shuts down the background refresh loop
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Refreshes every mode once, pausing `mode_delay` between them
async fn run_cycle(
    manager: &AcquisitionManager,
    config: &RefreshConfig,
    tx: &mpsc::Sender<RefreshMessage>,
) {
    info!("starting refresh cycle");
    report(tx, RefreshMessage::CycleStarted);

    for (i, mode) in Mode::ALL.into_iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(config.mode_delay).await;
        }

        let result = manager.refresh(mode).await;
        if let Some(error) = &result.error {
            warn!(%mode, %error, "refresh stored a failure payload");
        } else {
            info!(%mode, flights = result.flight_count, "refresh stored flights");
        }

        report(
            tx,
            RefreshMessage::ModeRefreshed {
                mode,
                flight_count: result.flight_count,
                error: result.error,
            },
        );
    }

    report(tx, RefreshMessage::CycleCompleted);
    info!(
        next_in_secs = config.cycle_interval.as_secs(),
        "refresh cycle complete"
    );
}

/// Progress is best effort: a full or closed channel never stalls the loop
fn report(tx: &mpsc::Sender<RefreshMessage>, msg: RefreshMessage) {
    if let Err(e) = tx.try_send(msg) {
        debug!(error = %e, "dropped refresh progress message");
    }
}
