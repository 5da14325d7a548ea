//! Generic periodic scan loop.
//!
//! A pass runs the handler's stages in order:
//!
//! ```text
//! snapshot ─▶ admit ─▶ for each pool: is_ready ─▶ decide ─▶ expand | shrink
//!                                                                  │
//!                                                      finish ◀────┘
//! ```
//!
//! Passes are strictly sequential: the next pass is scheduled `interval`
//! after the previous one *finishes*. A failing pool is logged and the pass
//! moves on to the next pool.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

/// Boxed future returned by async handler stages.
pub type StageFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What to do with one pool this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    Expand,
    Shrink,
    NoOp,
}

/// What an expand or shrink stage actually did to its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The pool changed.
    Applied,
    /// Could not act now; the next pass retries.
    Deferred,
    /// Nothing done: the re-check found no need, or a limit forbids it.
    Skipped,
}

/// The stages of one scan pass over a set of pools.
pub trait ScanHandler: Send + Sync {
    /// Batch-read state shared by every stage of a pass.
    type Snapshot: Send + Sync;
    /// Unit the loop decides over (a zone, for the relay fleet).
    type Pool: fmt::Display + Send + Sync;

    fn name(&self) -> &'static str;

    fn snapshot(&self) -> anyhow::Result<Self::Snapshot>;

    /// Whether this pass may act at all.
    fn admit<'a>(&'a self, snapshot: &'a Self::Snapshot) -> StageFuture<'a, bool>;

    fn pools(&self, snapshot: &Self::Snapshot) -> Vec<Self::Pool>;

    fn is_ready(&self, pool: &Self::Pool, snapshot: &Self::Snapshot) -> bool;

    fn decide(&self, pool: &Self::Pool, snapshot: &Self::Snapshot) -> ScanAction;

    fn expand<'a>(&'a self, pool: &'a Self::Pool) -> StageFuture<'a, anyhow::Result<StageOutcome>>;

    fn shrink<'a>(&'a self, pool: &'a Self::Pool) -> StageFuture<'a, anyhow::Result<StageOutcome>>;

    fn finish(&self, _report: &PassReport) {}
}

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub admitted: bool,
    pub pools_considered: usize,
    pub pools_ready: usize,
    pub expanded: Vec<String>,
    pub shrunk: Vec<String>,
    /// Pools whose action could not run this pass.
    pub deferred: Vec<String>,
    /// Pools whose action turned out unnecessary or was refused.
    pub skipped: Vec<String>,
    /// `(pool, error)` for every pool whose action failed.
    pub failures: Vec<(String, String)>,
}

pub struct ScanLoop<H: ScanHandler> {
    handler: H,
    initial_delay: Duration,
    interval: Duration,
}

impl<H: ScanHandler> ScanLoop<H> {
    pub fn new(handler: H, initial_delay: Duration, interval: Duration) -> Self {
        Self {
            handler,
            initial_delay,
            interval,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run a single pass.
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::default();

        let snapshot = match self.handler.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(scanner = self.handler.name(), error = %e, "scan snapshot failed");
                self.handler.finish(&report);
                return report;
            }
        };

        if !self.handler.admit(&snapshot).await {
            debug!(scanner = self.handler.name(), "scan pass not admitted");
            self.handler.finish(&report);
            return report;
        }
        report.admitted = true;

        for pool in self.handler.pools(&snapshot) {
            report.pools_considered += 1;
            if !self.handler.is_ready(&pool, &snapshot) {
                continue;
            }
            report.pools_ready += 1;

            let action = self.handler.decide(&pool, &snapshot);
            let outcome = match action {
                ScanAction::NoOp => continue,
                ScanAction::Expand => self.handler.expand(&pool).await,
                ScanAction::Shrink => self.handler.shrink(&pool).await,
            };

            match outcome {
                Ok(StageOutcome::Applied) if action == ScanAction::Expand => {
                    report.expanded.push(pool.to_string())
                }
                Ok(StageOutcome::Applied) => report.shrunk.push(pool.to_string()),
                Ok(StageOutcome::Deferred) => report.deferred.push(pool.to_string()),
                Ok(StageOutcome::Skipped) => report.skipped.push(pool.to_string()),
                Err(e) => {
                    error!(
                        scanner = self.handler.name(),
                        pool = %pool,
                        error = %e,
                        "scan action failed"
                    );
                    report.failures.push((pool.to_string(), format!("{e:#}")));
                }
            }
        }

        self.handler.finish(&report);
        report
    }

    /// Run passes until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scanner = self.handler.name(),
            initial_delay_ms = self.initial_delay.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "scan loop started"
        );

        let mut delay = self.initial_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let report = self.run_pass().await;
                    debug!(
                        scanner = self.handler.name(),
                        admitted = report.admitted,
                        ready = report.pools_ready,
                        expanded = report.expanded.len(),
                        deferred = report.deferred.len(),
                        failures = report.failures.len(),
                        "scan pass complete"
                    );
                    delay = self.interval;
                }
                _ = shutdown.changed() => {
                    info!(scanner = self.handler.name(), "scan loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Pools are integers; even pools expand, pool 3 fails, pool 5 is not ready.
    /// Pool 4 is deferred and pool 6 skipped when their expansion runs.
    #[derive(Default)]
    struct Numbers {
        admit: AtomicBool,
        passes: Arc<AtomicUsize>,
        actions: Mutex<Vec<String>>,
    }

    impl ScanHandler for Numbers {
        type Snapshot = Vec<u32>;
        type Pool = u32;

        fn name(&self) -> &'static str {
            "numbers"
        }

        fn snapshot(&self) -> anyhow::Result<Vec<u32>> {
            Ok((0..7).collect())
        }

        fn admit<'a>(&'a self, _snapshot: &'a Vec<u32>) -> StageFuture<'a, bool> {
            Box::pin(async move { self.admit.load(Ordering::SeqCst) })
        }

        fn pools(&self, snapshot: &Vec<u32>) -> Vec<u32> {
            snapshot.clone()
        }

        fn is_ready(&self, pool: &u32, _snapshot: &Vec<u32>) -> bool {
            *pool != 5
        }

        fn decide(&self, pool: &u32, _snapshot: &Vec<u32>) -> ScanAction {
            match pool {
                3 => ScanAction::Expand,
                p if p % 2 == 0 => ScanAction::Expand,
                1 => ScanAction::Shrink,
                _ => ScanAction::NoOp,
            }
        }

        fn expand<'a>(&'a self, pool: &'a u32) -> StageFuture<'a, anyhow::Result<StageOutcome>> {
            Box::pin(async move {
                match pool {
                    3 => anyhow::bail!("pool 3 is broken"),
                    4 => return Ok(StageOutcome::Deferred),
                    6 => return Ok(StageOutcome::Skipped),
                    _ => {}
                }
                self.actions.lock().unwrap().push(format!("expand {pool}"));
                Ok(StageOutcome::Applied)
            })
        }

        fn shrink<'a>(&'a self, pool: &'a u32) -> StageFuture<'a, anyhow::Result<StageOutcome>> {
            Box::pin(async move {
                self.actions.lock().unwrap().push(format!("shrink {pool}"));
                Ok(StageOutcome::Applied)
            })
        }

        fn finish(&self, _report: &PassReport) {
            self.passes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn pass_runs_stages_and_survives_failures() {
        let handler = Numbers::default();
        handler.admit.store(true, Ordering::SeqCst);
        let scan = ScanLoop::new(handler, Duration::ZERO, Duration::from_secs(1));

        let report = scan.run_pass().await;
        assert!(report.admitted);
        assert_eq!(report.pools_considered, 7);
        assert_eq!(report.pools_ready, 6);
        assert_eq!(report.expanded, vec!["0", "2"]);
        assert_eq!(report.shrunk, vec!["1"]);
        assert_eq!(report.deferred, vec!["4"]);
        assert_eq!(report.skipped, vec!["6"]);
        assert_eq!(
            *scan.handler().actions.lock().unwrap(),
            vec!["expand 0", "shrink 1", "expand 2"]
        );
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "3");
        assert_eq!(scan.handler().passes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unadmitted_pass_does_nothing() {
        let scan = ScanLoop::new(Numbers::default(), Duration::ZERO, Duration::from_secs(1));

        let report = scan.run_pass().await;
        assert!(!report.admitted);
        assert_eq!(report.pools_considered, 0);
        assert!(scan.handler().actions.lock().unwrap().is_empty());
        assert_eq!(scan.handler().passes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loop_repeats_until_shutdown() {
        let handler = Numbers::default();
        let passes = Arc::clone(&handler.passes);
        let scan = ScanLoop::new(handler, Duration::from_millis(5), Duration::from_millis(5));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(scan.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        let seen = passes.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {seen} passes ran");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(passes.load(Ordering::SeqCst), seen);
    }
}
