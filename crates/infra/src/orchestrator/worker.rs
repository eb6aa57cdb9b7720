//! Bounded-concurrency dispatch loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use fulfill_queue::{Delivery, DispatchQueue, QueueError};

use super::reconcile::ExhaustionReconciler;
use super::{DispatchOutcome, JobOrchestrator};

/// Runtime configuration of the dispatch loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum deliveries processed at once.
    pub concurrency: usize,
    /// How often queue statistics are logged.
    pub stats_interval: Duration,
    pub name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            stats_interval: Duration::from_secs(30),
            name: "job-orchestrator".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Orchestrator runtime statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub in_flight: u64,
    pub uptime_secs: u64,
}

#[derive(Debug)]
pub(crate) struct StatsCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    in_flight: AtomicU64,
    started: Instant,
}

impl Default for StatsCounters {
    fn default() -> Self {
        Self {
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl StatsCounters {
    pub(crate) fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Handle to control a running orchestrator.
#[derive(Debug)]
pub struct OrchestratorHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    orchestrator: Arc<JobOrchestrator>,
}

impl OrchestratorHandle {
    /// Stop pulling deliveries, wait for in-flight ones to settle, then stop
    /// the reconciler and the stats ticker.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(error = %err, "orchestrator task panicked");
            }
        }
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.orchestrator.stats()
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }
}

impl JobOrchestrator {
    /// Start consuming `queue` in the background.
    ///
    /// The exhaustion reconciler takes the queue's lossless exhausted-only
    /// feed before the first delivery is pulled, so no given-up message is
    /// missed however busy the queue gets.
    pub fn spawn(self: Arc<Self>, queue: Arc<dyn DispatchQueue>, config: OrchestratorConfig) -> OrchestratorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (reconcile_stop_tx, reconcile_stop_rx) = watch::channel(false);

        let reconciler = ExhaustionReconciler::new(self.store.clone()).with_span(self.span.clone());
        let subscription = queue.subscribe_exhausted();
        let orchestrator = self.clone();
        let span = info_span!(parent: &self.span, "orchestrator", name = %config.name);

        let join = tokio::spawn(
            async move {
                let reconciler_task = tokio::spawn(
                    reconciler
                        .run(subscription, reconcile_stop_rx)
                        .in_current_span(),
                );
                let ticker = tokio::spawn(
                    stats_loop(
                        orchestrator.clone(),
                        queue.clone(),
                        config.stats_interval,
                        shutdown_rx.clone(),
                    )
                    .in_current_span(),
                );

                info!(concurrency = config.concurrency, "orchestrator started");
                dispatch_loop(orchestrator, queue, config.concurrency, shutdown_rx).await;

                let _ = reconcile_stop_tx.send(true);
                let _ = reconciler_task.await;
                let _ = ticker.await;
                info!("orchestrator stopped");
            }
            .instrument(span),
        );

        OrchestratorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            orchestrator: self,
        }
    }
}

async fn dispatch_loop(
    orchestrator: Arc<JobOrchestrator>,
    queue: Arc<dyn DispatchQueue>,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let delivery = tokio::select! {
            _ = shutdown.changed() => break,
            next = queue.next_delivery() => match next {
                Ok(delivery) => delivery,
                Err(QueueError::Closed) => {
                    info!("dispatch queue closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "failed to pull delivery");
                    continue;
                }
            },
        };

        let span = info_span!(
            "dispatch",
            request_id = %delivery.message.request_id,
            vendor = %delivery.message.vendor,
            attempt = delivery.attempt,
        );
        let orchestrator = orchestrator.clone();
        let queue = queue.clone();
        tasks.spawn(
            async move {
                let _permit = permit;
                handle_delivery(&orchestrator, &*queue, delivery).await;
            }
            .instrument(span),
        );

        while let Some(done) = tasks.try_join_next() {
            if let Err(err) = done {
                error!(error = %err, "dispatch task panicked");
            }
        }
    }

    debug!(in_flight = tasks.len(), "draining in-flight deliveries");
    while let Some(done) = tasks.join_next().await {
        if let Err(err) = done {
            error!(error = %err, "dispatch task panicked");
        }
    }
}

async fn handle_delivery(orchestrator: &JobOrchestrator, queue: &dyn DispatchQueue, delivery: Delivery) {
    let stats = &orchestrator.stats;
    stats.in_flight.fetch_add(1, Ordering::Relaxed);
    info!(max_attempts = delivery.max_attempts, "processing job");

    let result = orchestrator.process(&delivery.message).await;

    stats.in_flight.fetch_sub(1, Ordering::Relaxed);
    stats.processed.fetch_add(1, Ordering::Relaxed);

    let settled = match result {
        Ok(outcome) => {
            match outcome {
                DispatchOutcome::Failed(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
                _ => stats.succeeded.fetch_add(1, Ordering::Relaxed),
            };
            queue.ack(delivery.id).await
        }
        Err(failure) => {
            let retryable = failure.is_retryable();
            if retryable {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                warn!(error = %failure, "dispatch failed, handing back to queue");
            } else {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %failure, "dispatch failed permanently");
            }
            queue.nack(delivery.id, failure.to_string(), retryable).await
        }
    };

    if let Err(err) = settled {
        error!(error = %err, "failed to settle delivery");
    }
}

async fn stats_loop(
    orchestrator: Arc<JobOrchestrator>,
    queue: Arc<dyn DispatchQueue>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                match queue.stats().await {
                    Ok(q) => {
                        let o = orchestrator.stats();
                        info!(
                            waiting = q.waiting,
                            active = q.active,
                            delayed = q.delayed,
                            completed = q.completed,
                            failed = q.failed,
                            processed = o.processed,
                            in_flight = o.in_flight,
                            "queue stats"
                        );
                    }
                    Err(err) => warn!(error = %err, "failed to read queue stats"),
                }
            }
        }
    }
}
