use std::sync::Arc;
use std::time::Duration;

use course_core::time::Clock;
use storage::repository::ProgressStore;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::engine::{EngineOutcome, ProgressionEngine};
use crate::error::SweepError;

//
// ─── CONFIG ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweep ticks.
    pub period: Duration,
    /// Maximum number of due records examined per tick; anything beyond is
    /// picked up on the next tick.
    pub batch_limit: u32,
    /// Maximum concurrent deliveries within one tick.
    pub concurrency: usize,
    /// Bound on one learner's delivery; a timeout counts as a delivery
    /// failure and is retried next tick.
    pub delivery_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(25),
            batch_limit: 256,
            concurrency: 16,
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-tick tally, used for the log line and by tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub applied: usize,
    pub ignored: usize,
    pub failed: usize,
    pub errored: usize,
}

//
// ─── SCHEDULER ─────────────────────────────────────────────────────────────────
//

/// Time-driven scan that delivers due lessons and questions.
///
/// Each tick loads the due records and fans delivery out across a bounded
/// set of tasks, so one slow or failing learner never stalls the rest.
/// There is no retry queue: a record whose delivery failed (or whose write
/// lost a race) is simply still due on the next tick.
pub struct SweepScheduler {
    engine: Arc<ProgressionEngine>,
    store: Arc<dyn ProgressStore>,
    clock: Clock,
    config: SweepConfig,
}

impl SweepScheduler {
    #[must_use]
    pub fn new(
        engine: Arc<ProgressionEngine>,
        store: Arc<dyn ProgressStore>,
        clock: Clock,
    ) -> Self {
        Self {
            engine,
            store,
            clock,
            config: SweepConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SweepConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one sweep pass over the due records.
    ///
    /// # Errors
    ///
    /// Returns `SweepError` only if the due-record scan itself fails;
    /// individual delivery failures are tallied in the report.
    pub async fn tick_once(&self) -> Result<SweepReport, SweepError> {
        let now = self.clock.now();
        let due = self.store.load_due(now, self.config.batch_limit).await?;

        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut deliveries = JoinSet::new();

        for record in due {
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let delivery_timeout = self.config.delivery_timeout;
            let id = record.id();

            deliveries.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                match timeout(delivery_timeout, engine.deliver_due(id)).await {
                    Ok(result) => Some((id, result)),
                    Err(_) => {
                        warn!(learner = %id, "delivery timed out; will retry next tick");
                        None
                    }
                }
            });
        }

        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok(Some((id, Ok(outcome)))) => match outcome {
                    EngineOutcome::Applied(applied) => {
                        debug!(learner = %id, ?applied, "sweep delivery applied");
                        report.applied += 1;
                    }
                    EngineOutcome::Ignored(reason) => {
                        debug!(learner = %id, ?reason, "sweep delivery ignored");
                        report.ignored += 1;
                    }
                    EngineOutcome::Failed(failure) => {
                        debug!(learner = %id, ?failure, "sweep delivery failed");
                        report.failed += 1;
                    }
                },
                Ok(Some((id, Err(err)))) => {
                    error!(learner = %id, error = %err, "sweep delivery errored");
                    report.errored += 1;
                }
                Ok(None) => report.failed += 1,
                Err(err) => {
                    error!(error = %err, "sweep delivery task panicked");
                    report.errored += 1;
                }
            }
        }

        Ok(report)
    }

    /// Tick on the configured period until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = self.config.period.as_secs(), "sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick_once().await {
                        Ok(report) if report.examined > 0 => {
                            info!(
                                examined = report.examined,
                                applied = report.applied,
                                ignored = report.ignored,
                                failed = report.failed,
                                errored = report.errored,
                                "sweep tick"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "sweep tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("sweep stopped");
                        return;
                    }
                }
            }
        }
    }
}
