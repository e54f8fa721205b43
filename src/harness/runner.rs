//! Worker Pool Implementation
//!
//! Runs a fixed number of reservation attempts on a bounded pool of tokio tasks and waits for
//! all of them before reporting.
//!
//! ## Responsibilities
//! - **Seeding**: writing the initial stock layout before any worker starts.
//! - **Dispatch**: workers claim request numbers from a shared atomic counter until none remain.
//! - **Monitoring**: a sidecar task samples counters to catch any negative value mid-run.

use anyhow::Result;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::report::{HarnessReport, OutcomeCounts};
use crate::reservation::ReservationCoordinator;
use crate::reservation::types::Outcome;
use crate::storage::memory::duration_ms;
use crate::storage::shard_store::{ShardStore, StockLayout};

#[derive(Debug, Clone)]
pub struct HarnessSettings {
    /// Total number of attempts.
    pub requests: usize,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Upper bound of the random delay before each attempt.
    pub max_jitter: Duration,
    pub monitor_interval: Duration,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            requests: 200,
            workers: 32,
            max_jitter: Duration::from_millis(500),
            monitor_interval: Duration::from_millis(10),
        }
    }
}

pub struct LoadHarness {
    coordinator: Arc<ReservationCoordinator>,
    settings: HarnessSettings,
}

impl LoadHarness {
    pub fn new(coordinator: Arc<ReservationCoordinator>, settings: HarnessSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    /// Seeds `layout`, runs every attempt and reports.
    pub async fn run(&self, layout: &StockLayout) -> Result<HarnessReport> {
        let shards = self.coordinator.shards().clone();
        shards.init_layout(layout).await?;
        self.drive(layout.total()).await
    }

    /// Runs every attempt against whatever stock is already in the store.
    pub async fn drive(&self, initial_total: i64) -> Result<HarnessReport> {
        let shards = self.coordinator.shards().clone();
        let started = Instant::now();
        let workers = self.settings.workers.clamp(1, self.settings.requests.max(1));

        tracing::info!(
            "Starting {} attempts on {} workers (product {}, {} shards)",
            self.settings.requests,
            workers,
            shards.product(),
            shards.shard_count()
        );

        let min_observed = Arc::new(AtomicI64::new(i64::MAX));
        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = tokio::spawn(monitor_loop(
            shards.clone(),
            self.settings.monitor_interval,
            min_observed.clone(),
            stop_rx,
        ));

        let next_request = Arc::new(AtomicUsize::new(0));
        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let coordinator = self.coordinator.clone();
            let next_request = next_request.clone();
            let settings = self.settings.clone();
            pool.spawn(async move {
                worker_loop(worker_id, coordinator, next_request, settings).await
            });
        }

        let mut counts = OutcomeCounts::default();
        while let Some(joined) = pool.join_next().await {
            counts.merge(&joined?);
        }

        let _ = stop_tx.send(true);
        monitor.await?;

        let final_snapshot = shards.snapshot().await?;
        min_observed.fetch_min(final_snapshot.min_counter(), Ordering::SeqCst);

        let report = HarnessReport {
            product_id: shards.product().to_string(),
            counts,
            initial_total,
            final_snapshot,
            min_observed: min_observed.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };

        if !report.conserved() {
            tracing::error!(
                "Stock not conserved: initial {} - success {} != remaining {}",
                report.initial_total,
                report.counts.success,
                report.final_snapshot.total()
            );
        }
        tracing::info!(
            "Run finished: {} success, {} failed, {} remaining",
            report.counts.success,
            report.counts.failures(),
            report.final_snapshot.total()
        );

        Ok(report)
    }
}

async fn worker_loop(
    worker_id: usize,
    coordinator: Arc<ReservationCoordinator>,
    next_request: Arc<AtomicUsize>,
    settings: HarnessSettings,
) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();

    loop {
        let request = next_request.fetch_add(1, Ordering::SeqCst);
        if request >= settings.requests {
            break;
        }

        let jitter = random_jitter(settings.max_jitter);
        if !jitter.is_zero() {
            tokio::time::sleep(jitter).await;
        }

        let requester = format!("user_{}", request + 1);
        let attempt = coordinator.attempt(&requester).await;
        match (&attempt.outcome, &attempt.error) {
            (Outcome::Success, _) => tracing::debug!(
                "Worker {}: {} reserved from shard {:?}",
                worker_id,
                requester,
                attempt.chosen_shard
            ),
            (_, Some(e)) => tracing::warn!("Worker {}: {} failed: {}", worker_id, requester, e),
            (outcome, None) => {
                tracing::debug!("Worker {}: {} -> {:?}", worker_id, requester, outcome)
            }
        }
        counts.record(&attempt);
    }

    tracing::trace!("Worker {} done after {} attempts", worker_id, counts.total());
    counts
}

async fn monitor_loop(
    shards: ShardStore,
    interval: Duration,
    min_observed: Arc<AtomicI64>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }

        match shards.snapshot().await {
            Ok(snapshot) => {
                let lowest = snapshot.min_counter();
                if lowest < 0 {
                    tracing::error!("Observed negative counter: {:?}", snapshot);
                }
                min_observed.fetch_min(lowest, Ordering::SeqCst);
            }
            Err(e) => tracing::warn!("Monitor snapshot failed: {}", e),
        }
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = duration_ms(max);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}
