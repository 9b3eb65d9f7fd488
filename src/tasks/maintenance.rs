//! Maintenance Worker
//!
//! Background task that sweeps namespaces whose sweep interval has elapsed.
//! Each tick of the injected [`Ticker`] runs one cycle; a failing namespace
//! is logged and skipped, and the loop carries on.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Ticker;
use crate::cache::{SweepReport, TieredCache};
use crate::clock::SharedClock;

/// A namespace whose sweep failed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub namespace: String,
    pub reason: String,
}

/// Outcome of one maintenance cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub swept: Vec<SweepReport>,
    pub failed: Vec<SweepFailure>,
    /// Namespaces not yet due
    pub skipped: usize,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct MaintenanceWorker {
    caches: Vec<Arc<TieredCache>>,
    clock: SharedClock,
    batch_size: usize,
    running: Mutex<Option<Running>>,
    cycles: watch::Sender<u64>,
}

impl std::fmt::Debug for MaintenanceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceWorker")
            .field("namespaces", &self.caches.len())
            .field("batch_size", &self.batch_size)
            .field("running", &self.is_running())
            .finish()
    }
}

impl MaintenanceWorker {
    pub fn new(caches: Vec<Arc<TieredCache>>, clock: SharedClock, batch_size: usize) -> Arc<Self> {
        let (cycles, _) = watch::channel(0);
        Arc::new(Self {
            caches,
            clock,
            batch_size: batch_size.max(1),
            running: Mutex::new(None),
            cycles,
        })
    }

    // == Start / Stop ==
    /// Spawns the sweep loop driven by `ticker`.
    ///
    /// Returns `false`, dropping `ticker`, if the loop is already running.
    pub fn start<T: Ticker>(self: &Arc<Self>, ticker: T) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Maintenance worker already running");
            return false;
        }

        let (shutdown, signal) = watch::channel(false);
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move { worker.run(ticker, signal).await });
        *running = Some(Running { shutdown, handle });

        info!(
            namespaces = self.caches.len(),
            batch_size = self.batch_size,
            "Maintenance worker started"
        );
        true
    }

    /// Stops scheduling cycles and waits for an in-flight cycle to finish.
    ///
    /// Returns `false` if the worker was not running.
    pub async fn stop(&self) -> bool {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return false;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }
        info!("Maintenance worker stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    async fn run<T: Ticker>(self: Arc<Self>, mut ticker: T, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                ticked = ticker.tick() => {
                    if !ticked {
                        debug!("Maintenance ticker exhausted");
                        break;
                    }
                    // Runs to completion even if stop is requested meanwhile
                    self.run_once().await;
                }
            }
        }
    }

    // == Cycles ==
    /// Sweeps every namespace whose sweep interval has elapsed.
    pub async fn run_once(&self) -> CycleReport {
        self.cycle(false).await
    }

    /// Sweeps every namespace regardless of its interval.
    pub async fn sweep_all(&self) -> CycleReport {
        self.cycle(true).await
    }

    async fn cycle(&self, force: bool) -> CycleReport {
        let now = self.clock.now_ms();
        let mut report = CycleReport::default();

        for cache in &self.caches {
            if !force && !cache.sweep_due(now) {
                report.skipped += 1;
                continue;
            }
            match cache.sweep(self.batch_size).await {
                Ok(swept) => report.swept.push(swept),
                Err(e) => {
                    error!(namespace = %cache.name(), error = %e, "Maintenance sweep failed");
                    report.failed.push(SweepFailure {
                        namespace: cache.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.cycles.send_modify(|count| *count += 1);
        debug!(
            swept = report.swept.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "Maintenance cycle complete"
        );
        report
    }

    /// Completed cycles since creation.
    pub fn cycles(&self) -> u64 {
        *self.cycles.borrow()
    }

    /// Waits until at least `count` cycles have completed.
    pub async fn wait_for_cycles(&self, count: u64) {
        let mut rx = self.cycles.subscribe();
        let _ = rx.wait_for(|done| *done >= count).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Lookup;
    use crate::clock::ManualClock;
    use crate::config::NamespaceConfig;
    use crate::storage::gated::GatedStore;
    use crate::storage::MemoryStore;
    use crate::tasks::ManualTicker;

    fn namespace(
        name: &str,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        interval_ms: u64,
    ) -> Arc<TieredCache> {
        let config = NamespaceConfig::new(name)
            .with_ttl_ms(1_000)
            .with_sweep_interval_ms(interval_ms);
        Arc::new(TieredCache::new(config, 1, store, None, clock).unwrap())
    }

    #[tokio::test]
    async fn test_run_once_sweeps_only_due_namespaces() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let fast = namespace("fast", store.clone(), clock.clone(), 100);
        let slow = namespace("slow", store.clone(), clock.clone(), 10_000);
        let worker = MaintenanceWorker::new(vec![fast, slow], clock.clone(), 8);

        clock.advance(100);
        let report = worker.run_once().await;
        assert_eq!(report.swept.len(), 1);
        assert_eq!(report.swept[0].namespace, "fast");
        assert_eq!(report.skipped, 1);

        let report = worker.run_once().await;
        assert!(report.swept.is_empty());

        let report = worker.sweep_all().await;
        assert_eq!(report.swept.len(), 2);
        assert_eq!(worker.cycles(), 3);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let clock = Arc::new(ManualClock::new(0));
        let worker = MaintenanceWorker::new(Vec::new(), clock, 8);

        let (first, _handle_one) = ManualTicker::new();
        let (second, _handle_two) = ManualTicker::new();
        assert!(worker.start(first));
        assert!(!worker.start(second));
        assert!(worker.is_running());

        assert!(worker.stop().await);
        assert!(!worker.stop().await);
        assert!(!worker.is_running());

        let (third, _handle_three) = ManualTicker::new();
        assert!(worker.start(third));
        assert!(worker.stop().await);
    }

    #[tokio::test]
    async fn test_ticks_drive_sweeps() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let cache = namespace("listings", store.clone(), clock.clone(), 100);
        cache.set("old", b"1".to_vec(), Some(50)).await.unwrap();
        cache.flush().await;

        let worker = MaintenanceWorker::new(vec![cache.clone()], clock.clone(), 8);
        let (ticker, handle) = ManualTicker::new();
        assert!(worker.start(ticker));

        clock.advance(100);
        handle.tick();
        worker.wait_for_cycles(1).await;

        assert!(store.is_empty());
        assert_eq!(cache.stats().total_entries, 0);
        assert!(worker.stop().await);
    }

    #[tokio::test]
    async fn test_failing_namespace_does_not_stop_the_loop() {
        let broken_store = Arc::new(MemoryStore::new());
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let broken = namespace("broken", broken_store.clone(), clock.clone(), 10);
        let healthy = namespace("healthy", store.clone(), clock.clone(), 10);
        healthy.set("a", b"1".to_vec(), None).await.unwrap();
        broken_store.set_online(false);

        let worker = MaintenanceWorker::new(vec![broken, healthy.clone()], clock.clone(), 8);
        clock.advance(10);
        let report = worker.run_once().await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].namespace, "broken");
        assert_eq!(report.swept.len(), 1);

        let (ticker, handle) = ManualTicker::new();
        worker.start(ticker);
        for round in 2..=3 {
            clock.advance(10);
            handle.tick();
            worker.wait_for_cycles(round).await;
        }
        assert!(worker.is_running());
        assert!(matches!(healthy.get("a").await, Lookup::Hit(_)));
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_exhausted_ticker_ends_loop() {
        let clock = Arc::new(ManualClock::new(0));
        let worker = MaintenanceWorker::new(Vec::new(), clock, 8);
        let (ticker, handle) = ManualTicker::new();
        worker.start(ticker);
        drop(handle);

        // The loop exits on its own; stop still reaps it
        assert!(worker.stop().await);
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_cycle() {
        let store = Arc::new(MemoryStore::new());
        let gated = Arc::new(GatedStore::new(store.clone()));
        let clock = Arc::new(ManualClock::new(0));
        let config = NamespaceConfig::new("listings")
            .with_ttl_ms(1_000)
            .with_sweep_interval_ms(100);
        let cache = Arc::new(TieredCache::new(config, 1, gated.clone(), None, clock.clone()).unwrap());
        cache.set("old", b"1".to_vec(), Some(50)).await.unwrap();
        cache.flush().await;

        let worker = MaintenanceWorker::new(vec![cache], clock.clone(), 8);
        let (ticker, handle) = ManualTicker::new();
        assert!(worker.start(ticker));
        clock.advance(100);
        handle.tick();
        gated.entered().await;

        let stopper = tokio::spawn({
            let worker = worker.clone();
            async move { worker.stop().await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!stopper.is_finished());
        assert_eq!(worker.cycles(), 0);

        gated.release();
        assert!(stopper.await.unwrap());
        assert_eq!(worker.cycles(), 1);
        assert!(store.is_empty());
        assert!(!worker.is_running());
    }
}
