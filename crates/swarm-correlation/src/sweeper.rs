//! Expiry sweeper.
//!
//! Background task that times out pending requests nobody answered. Two modes:
//!
//! - **Periodic**: fixed tick every `max_lateness`. Lateness is bounded by one
//!   tick plus scheduling jitter.
//! - **Adaptive**: sleeps until the earliest indexed deadline (capped at
//!   `idle_interval`) and is woken early whenever a registration becomes the
//!   new earliest deadline.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::field::Empty;
use tracing::{debug, info, instrument, Span};

use crate::domain::{SweepMode, SweeperConfig};
use crate::registry::CorrelationRegistry;

/// Drives [`CorrelationRegistry::expire`] on the registry's clock.
///
/// Sleeps on tokio's timer, so the registry should use
/// [`TokioClock`](crate::domain::TokioClock).
pub struct ExpirySweeper<R> {
    registry: Arc<CorrelationRegistry<R>>,
    config: SweeperConfig,
}

impl<R: Send + 'static> ExpirySweeper<R> {
    pub fn new(registry: Arc<CorrelationRegistry<R>>, config: SweeperConfig) -> Self {
        Self { registry, config }
    }

    /// Run on the current runtime until the handle is shut down or dropped.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SweeperHandle { shutdown_tx, task }
    }

    /// Sweep until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            mode = ?self.config.mode,
            max_lateness_ms = self.config.max_lateness.as_millis(),
            "Expiry sweeper started"
        );
        match self.config.mode {
            SweepMode::Periodic => self.run_periodic(&mut shutdown).await,
            SweepMode::Adaptive => self.run_adaptive(&mut shutdown).await,
        }
        info!("Expiry sweeper stopped");
    }

    async fn run_periodic(&self, shutdown: &mut watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.max_lateness);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn run_adaptive(&self, shutdown: &mut watch::Receiver<bool>) {
        loop {
            let idle_until = Instant::now() + self.config.idle_interval;
            let wake_at = match self.registry.next_deadline() {
                Some(deadline) => Instant::from_std(deadline).min(idle_until),
                None => idle_until,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(wake_at) => self.sweep(),
                // A new earliest deadline; recompute the sleep.
                _ = self.registry.wakeup().notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    #[instrument(name = "swarm.sweep", level = "debug", skip_all, fields(expired = Empty))]
    fn sweep(&self) {
        let expired = self.registry.expire_due();
        Span::current().record("expired", expired);
        if expired > 0 {
            debug!(
                expired,
                pending = self.registry.pending_count(),
                "Expired pending requests"
            );
        }
    }
}

/// Handle to a spawned sweeper. Dropping it also stops the sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }

    /// Stop without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
