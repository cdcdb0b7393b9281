use super::reconciler::PaymentReconciler;
use super::sweeps::Maintenance;
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub expiry_sweep: Duration,
    pub health_sweep: Duration,
    pub stale_payment_sweep: Duration,
    pub payment_poll: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            expiry_sweep: Duration::from_secs(60),
            health_sweep: Duration::from_secs(10 * 60),
            stale_payment_sweep: Duration::from_secs(60 * 60),
            payment_poll: Duration::from_secs(30),
        }
    }
}

/// Owns the periodic tasks and their shutdown.
///
/// Each task ticks on its own interval. A tick runs to completion before the
/// task waits again, and ticks missed meanwhile are dropped.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn start(
        config: ScheduleConfig,
        maintenance: Arc<Maintenance>,
        reconciler: Arc<PaymentReconciler>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut scheduler = Self {
            shutdown,
            tasks: Vec::new(),
        };

        let m = maintenance.clone();
        scheduler.spawn("expiry-sweep", config.expiry_sweep, move || {
            let m = m.clone();
            async move { m.expire_grants().await.map(drop) }
        });
        let m = maintenance.clone();
        scheduler.spawn("health-sweep", config.health_sweep, move || {
            let m = m.clone();
            async move { m.check_endpoints().await.map(drop) }
        });
        let m = maintenance;
        scheduler.spawn("stale-payment-sweep", config.stale_payment_sweep, move || {
            let m = m.clone();
            async move { m.expire_payments().await.map(drop) }
        });
        scheduler.spawn("payment-poll", config.payment_poll, move || {
            let r = reconciler.clone();
            async move { r.reconcile_pending().await.map(drop) }
        });

        info!(?config, "scheduler started");
        scheduler
    }

    /// Spawns a periodic task. A failing or panicking tick is logged and the
    /// task carries on with the next one.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => {
                        match tokio::spawn(tick()).await {
                            Ok(Ok(())) => debug!(task = name, "tick complete"),
                            Ok(Err(err)) => error!(task = name, error = %err, "tick failed"),
                            Err(join_err) => error!(task = name, error = %join_err, "tick panicked"),
                        }
                    }
                }
            }
            debug!(task = name, "task stopped");
        });
        self.tasks.push((name, handle));
    }

    /// Signals every task to stop and waits for in-flight ticks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            if let Err(err) = handle.await {
                error!(task = name, error = %err, "task did not stop cleanly");
            }
        }
        info!("scheduler stopped");
    }
}
