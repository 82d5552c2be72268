//! Collection cycle.
//!
//! Drives the exporter's only writer of metric state:
//!
//! ```text
//!   Connecting ──ok──▶ Running ──tick done──▶ Sleeping ──interval──▶ Running
//!       ▲  │               │                      │
//!       └──┘ backoff       └── connection lost ───┼──▶ Connecting
//!                                                 │
//!   any state ── cancellation ────────────────────┴──▶ Terminated
//! ```
//!
//! A tick runs every catalog group in order against the single session. A
//! failed group is logged and counted, and the tick moves on; only failures
//! that leave the session unusable abort the tick and force a reconnect.
//! Cancellation never interrupts a running tick, but it does interrupt the
//! sleep and the reconnect backoff.

use crate::catalog::{CATALOG, Fragment, QueryDefinition};
use crate::config::Config;
use crate::error::CollectError;
use crate::metrics::MetricRegistry;
use crate::telemetry::spans;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Opens database sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, CollectError>;
}

/// An open database session, exclusively owned by the collection cycle.
#[async_trait]
pub trait Session: Send {
    /// Execute one catalog query and return its decoded result.
    async fn fetch(&mut self, definition: &QueryDefinition) -> Result<Fragment, CollectError>;

    /// Tear the session down.
    async fn close(self);
}

/// Timing parameters of the cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub interval: Duration,
    pub query_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl CycleSettings {
    const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
}

impl From<&Config> for CycleSettings {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.sleep_interval(),
            query_timeout: config.query_timeout(),
            backoff_initial: Self::BACKOFF_INITIAL.min(config.reconnect_backoff_max()),
            backoff_max: config.reconnect_backoff_max(),
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Gauge writes that took effect.
    pub updated: usize,
    /// Groups whose query failed, in execution order.
    pub failed: Vec<(&'static str, CollectError)>,
    /// The session broke; the tick was abandoned at the failing group.
    pub connection_lost: bool,
}

/// The collection cycle.
pub struct Collector<C> {
    connector: C,
    registry: Arc<MetricRegistry>,
    settings: CycleSettings,
}

impl<C: Connector> Collector<C> {
    pub fn new(connector: C, registry: Arc<MetricRegistry>, settings: CycleSettings) -> Self {
        Self {
            connector,
            registry,
            settings,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Never returns on metric or database errors.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticks: u64 = 0;
        // Carried across sessions so a session that dies right after connecting
        // still backs off; reset only by a tick that keeps its session.
        let mut delay = self.settings.backoff_initial;

        'connect: loop {
            let Some(mut session) = self.connect(&shutdown, &mut delay).await else {
                break;
            };
            self.registry.set_up(true);

            loop {
                if shutdown.is_cancelled() {
                    session.close().await;
                    break 'connect;
                }

                ticks += 1;
                let report = self.tick(&mut session).instrument(spans::tick(ticks)).await;
                if report.connection_lost {
                    self.registry.set_up(false);
                    // The broken session is dropped rather than closed.
                    drop(session);
                    warn!(retry_in = ?delay, "Reconnecting after session loss");
                    if !self.backoff(&shutdown, &mut delay).await {
                        break 'connect;
                    }
                    continue 'connect;
                }
                delay = self.settings.backoff_initial;

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        session.close().await;
                        break 'connect;
                    }
                    _ = tokio::time::sleep(self.settings.interval) => {}
                }
            }
        }

        self.registry.set_up(false);
        info!(ticks, "Collection cycle stopped");
    }

    /// Establish a session, backing off between failures.
    ///
    /// Returns `None` once cancelled.
    async fn connect(&self, shutdown: &CancellationToken, delay: &mut Duration) -> Option<C::Session> {
        loop {
            let attempt = tokio::select! {
                _ = shutdown.cancelled() => return None,
                attempt = self.connector.connect() => attempt,
            };
            match attempt {
                Ok(session) => return Some(session),
                Err(e) => {
                    warn!(error = %e, retry_in = ?*delay, "Database connection failed");
                }
            }
            if !self.backoff(shutdown, delay).await {
                return None;
            }
        }
    }

    /// Wait out `delay`, then double it up to the cap.
    ///
    /// Returns `false` if cancelled while waiting.
    async fn backoff(&self, shutdown: &CancellationToken, delay: &mut Duration) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(*delay) => {}
        }
        *delay = (*delay * 2).min(self.settings.backoff_max);
        true
    }

    /// Execute every catalog group once and fold the results into the registry.
    pub async fn tick(&self, session: &mut C::Session) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        for definition in CATALOG {
            let fetched =
                match tokio::time::timeout(self.settings.query_timeout, session.fetch(definition))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CollectError::Timeout {
                        group: definition.group,
                        after: self.settings.query_timeout,
                    }),
                };

            match fetched {
                Ok(fragment) => report.updated += self.fold(definition, &fragment),
                Err(e) => {
                    self.registry.record_query_failure(definition.group);
                    let lost = e.is_connection_lost();
                    if lost {
                        error!(group = definition.group, kind = e.error_code(), error = %e, "Database session lost");
                    } else {
                        warn!(group = definition.group, kind = e.error_code(), error = %e, "Query failed");
                    }
                    report.failed.push((definition.group, e));
                    if lost {
                        report.connection_lost = true;
                        break;
                    }
                }
            }
        }

        if !report.connection_lost {
            self.registry
                .record_tick(started.elapsed(), chrono::Utc::now().timestamp());
        }
        info!(
            updated = report.updated,
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tick finished"
        );
        report
    }

    /// Apply one group's result. Returns the number of gauge writes.
    fn fold(&self, definition: &QueryDefinition, fragment: &Fragment) -> usize {
        let transformed = match definition.apply(fragment) {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!(group = definition.group, error = %e, "Unexpected result shape");
                return 0;
            }
        };
        for skipped in &transformed.skipped {
            warn!(group = definition.group, error = %skipped, "Skipped row");
        }

        let mut written = 0;
        for update in &transformed.updates {
            match self.registry.apply(update) {
                Ok(true) => written += 1,
                Ok(false) => debug!(group = definition.group, ?update, "Absent value, kept previous"),
                Err(e) => warn!(group = definition.group, error = %e, "Metric update rejected"),
            }
        }
        written
    }
}
