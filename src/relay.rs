mod throttle;

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use chrono::TimeDelta;
use indexmap::IndexMap;
use macaddr::MacAddr6;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::record::{Record, format_mac};
use crate::scanner::{Batch, ScanError, Scanner};
use crate::sink::{Sink, SinkError};
use crate::switchbot::Reading;

use self::throttle::Throttle;

const DEFAULT_SCAN_RETRY_LIMIT: Duration = Duration::from_secs(300);

/// Pause before polling again after a cycle that produced nothing.
pub const IDLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum IterationMode {
    /// Process batches until stopped.
    #[default]
    Continuous,
    /// Process one batch, then exit.
    SingleShot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SinkErrorPolicy {
    /// Log the failure and carry on with the next sink.
    #[default]
    Log,
    /// Stop the relay with the failure.
    Abort,
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub mode: IterationMode,
    pub on_sink_error: SinkErrorPolicy,
    /// Minimum time between two forwarded readings of the same device. Zero disables it.
    pub min_interval: TimeDelta,
    /// Devices to forward. Empty forwards every device.
    pub devices: Vec<MacAddr6>,
    /// How long a failing scanner is retried before giving up.
    pub scan_retry_limit: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            mode: IterationMode::default(),
            on_sink_error: SinkErrorPolicy::default(),
            min_interval: TimeDelta::zero(),
            devices: Vec::new(),
            scan_retry_limit: DEFAULT_SCAN_RETRY_LIMIT,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("scanner failed")]
    Scan(#[from] ScanError),

    #[error("{sink} sink failed")]
    Sink {
        sink: String,
        #[source]
        source: SinkError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub batches: u64,
    pub readings: u64,
    pub suppressed: u64,
    /// Keyed by sink name, in dispatch order.
    pub sinks: IndexMap<String, SinkStats>,
}

/// Pulls batches from a scanner and hands every reading to each sink in turn.
pub struct Relay<S> {
    scanner: S,
    sinks: Vec<Box<dyn Sink>>,
    options: RelayOptions,
    throttle: Throttle,
    stats: RelayStats,
}

impl<S: Scanner> Relay<S> {
    pub fn new(scanner: S, sinks: Vec<Box<dyn Sink>>, options: RelayOptions) -> Self {
        let throttle = Throttle::new(options.min_interval);
        let stats = RelayStats {
            sinks: sinks
                .iter()
                .map(|sink| (sink.name().to_owned(), SinkStats::default()))
                .collect(),
            ..RelayStats::default()
        };

        Self {
            scanner,
            sinks,
            options,
            throttle,
            stats,
        }
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Runs until the iteration mode is done, a fatal error occurs, or
    /// `shutdown` completes.
    ///
    /// Sinks are closed and the scanner is stopped before this returns,
    /// whatever the outcome, so the relay cannot be run twice.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<(), RelayError> {
        info!(
            mode = ?self.options.mode,
            sinks = ?self.stats.sinks.keys().collect::<Vec<_>>(),
            "relay started"
        );

        tokio::pin!(shutdown);
        let result = tokio::select! {
            result = self.run_loop() => result,
            () = &mut shutdown => {
                info!("stop requested");
                Ok(())
            }
        };

        self.close().await;

        info!(
            batches = self.stats.batches,
            readings = self.stats.readings,
            suppressed = self.stats.suppressed,
            "relay stopped"
        );
        for (name, stats) in &self.stats.sinks {
            info!(sink = %name, delivered = stats.delivered, failed = stats.failed, "sink summary");
        }

        result
    }

    async fn run_loop(&mut self) -> Result<(), RelayError> {
        loop {
            let idle = match self.next_batch().await? {
                Some(batch) => {
                    self.stats.batches += 1;
                    if batch.is_empty() {
                        debug!("scan cycle found no readings");
                    }
                    for reading in &batch {
                        self.dispatch(reading).await?;
                    }
                    batch.is_empty()
                }
                None => {
                    debug!("scanner returned no batch");
                    true
                }
            };

            if self.options.mode == IterationMode::SingleShot {
                return Ok(());
            }

            if idle {
                sleep(IDLE_DELAY).await;
            }
        }
    }

    async fn next_batch(&mut self) -> Result<Option<Batch>, ScanError> {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.options.scan_retry_limit),
            ..ExponentialBackoff::default()
        };

        loop {
            match self.scanner.next_batch().await {
                Ok(batch) => return Ok(batch),
                Err(err) if err.is_retryable() => {
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(err);
                    };
                    let err = anyhow::Error::new(err);
                    warn!(?delay, "scan failed, retrying: {err:#}");
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn dispatch(&mut self, reading: &Reading) -> Result<(), RelayError> {
        self.stats.readings += 1;

        if !self.options.devices.is_empty() && !self.options.devices.contains(&reading.mac) {
            trace!(mac = %format_mac(&reading.mac), "device not selected");
            self.stats.suppressed += 1;
            return Ok(());
        }

        if !self.throttle.allows(reading) {
            trace!(mac = %format_mac(&reading.mac), "reading throttled");
            self.stats.suppressed += 1;
            return Ok(());
        }

        let record = Record::from(reading);
        let mut delivered = false;

        for sink in self.sinks.iter_mut() {
            let result = sink.deliver(&record).await;
            let stats = self.stats.sinks.entry(sink.name().to_owned()).or_default();

            match result {
                Ok(()) => {
                    stats.delivered += 1;
                    delivered = true;
                }
                Err(err) => {
                    stats.failed += 1;
                    match self.options.on_sink_error {
                        SinkErrorPolicy::Abort => {
                            return Err(RelayError::Sink {
                                sink: sink.name().to_owned(),
                                source: err,
                            });
                        }
                        SinkErrorPolicy::Log => {
                            let err = anyhow::Error::new(err);
                            warn!(
                                sink = %sink.name(),
                                mac = %record.mac,
                                "failed to deliver record: {err:#}"
                            );
                        }
                    }
                }
            }
        }

        if delivered {
            self.throttle.record_delivered(reading);
        }

        Ok(())
    }

    async fn close(&mut self) {
        close_sinks(&mut self.sinks).await;

        if let Err(err) = self.scanner.stop().await {
            let err = anyhow::Error::new(err);
            warn!("failed to stop scanner: {err:#}");
        }
    }
}

pub async fn close_sinks(sinks: &mut [Box<dyn Sink>]) {
    for sink in sinks.iter_mut() {
        if let Err(err) = sink.close().await {
            let name = sink.name().to_owned();
            let err = anyhow::Error::new(err);
            warn!(sink = %name, "failed to close sink: {err:#}");
        }
    }
}
