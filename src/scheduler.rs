//! Periodic driver for [`Orchestrator::tick`]. A tick that fires while the
//! previous one is still running is skipped, never queued.

use crate::orchestrator::Orchestrator;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

pub struct TickScheduler {
    orchestrator: Arc<Mutex<Orchestrator>>,
    interval: Duration,
    in_flight: AtomicBool,
    completed: AtomicU64,
    skipped: AtomicU64,
}

/// Clears the in-flight flag even if the tick panics.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TickScheduler {
    pub fn new(orchestrator: Arc<Mutex<Orchestrator>>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            in_flight: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn orchestrator(&self) -> Arc<Mutex<Orchestrator>> {
        self.orchestrator.clone()
    }

    /// Run one tick unless another is in flight. Returns whether it ran.
    pub async fn try_tick(&self) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("previous tick still running, skipping ({skipped} skipped so far)");
            return false;
        }
        let _guard = InFlight(&self.in_flight);
        self.orchestrator.lock().await.tick().await;
        self.completed.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn completed_ticks(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Tick on every interval until `shutdown` resolves. Each tick runs in its
    /// own task so a slow one shows up as skips instead of drift. Returns only
    /// after every spawned tick has finished.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = JoinSet::new();
        tokio::pin!(shutdown);
        info!("tick scheduler running every {:?}", self.interval);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    let scheduler = self.clone();
                    ticks.spawn(async move { scheduler.try_tick().await });
                }
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = joined {
                        warn!("tick task failed: {e}");
                    }
                }
            }
        }
        while let Some(joined) = ticks.join_next().await {
            if let Err(e) = joined {
                warn!("tick task failed: {e}");
            }
        }
        if self.skipped_ticks() > 0 {
            warn!("{} tick(s) were skipped while a previous tick ran", self.skipped_ticks());
        }
        info!(
            "tick scheduler stopped after {} tick(s)",
            self.completed_ticks()
        );
    }
}
