//! Interval scheduling and manual triggers for the [`Poller`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::poller::{CycleObserver, CycleOutcome, Poller};

/// Requests an out-of-schedule cycle.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<()>,
}

impl TriggerHandle {
    /// Queue a cycle. Returns `false` if one is already queued or the
    /// scheduler has stopped.
    pub fn trigger(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

pub struct Scheduler {
    poller: Arc<Poller>,
    interval: Duration,
    run_on_start: bool,
    observer: Arc<dyn CycleObserver>,
    triggers: mpsc::Receiver<()>,
}

impl Scheduler {
    pub fn new(
        poller: Arc<Poller>,
        interval: Duration,
        run_on_start: bool,
        observer: Arc<dyn CycleObserver>,
    ) -> (Self, TriggerHandle) {
        let (tx, triggers) = mpsc::channel(1);
        let scheduler = Self {
            poller,
            interval,
            run_on_start,
            observer,
            triggers,
        };
        (scheduler, TriggerHandle { tx })
    }

    /// Run until `shutdown` resolves, then wait for any in-flight cycle.
    ///
    /// Cycles are spawned, so a slow cycle never delays the next tick;
    /// overlap is rejected by the poller.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut cycles = JoinSet::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.run_on_start {
            ticker.tick().await;
        }
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    debug!("scheduled cycle");
                    self.spawn_cycle(&mut cycles);
                }
                Some(()) = self.triggers.recv() => {
                    info!("manual cycle requested");
                    self.spawn_cycle(&mut cycles);
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "cycle task aborted");
                    }
                }
            }
        }

        if !cycles.is_empty() {
            info!("waiting for the running cycle to finish");
        }
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "cycle task aborted");
            }
        }
        info!("scheduler stopped");
    }

    fn spawn_cycle(&self, cycles: &mut JoinSet<()>) {
        let poller = self.poller.clone();
        let observer = self.observer.clone();
        cycles.spawn(async move {
            if let CycleOutcome::Skipped = poller.run_cycle(observer.as_ref()).await {
                debug!("previous cycle still running");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::AlbumClassifier;
    use crate::poller::{PollerSettings, SilentObserver};
    use crate::router::NotificationRouter;
    use crate::testing::{RecordingSink, ScriptedSource, temp_storage};
    use reviewrelay_shared::AppConfig;

    async fn poller(source: Arc<ScriptedSource>) -> Arc<Poller> {
        let store = temp_storage().await;
        store.link_user("u1", "alice").await.unwrap();
        Arc::new(Poller::new(
            store,
            source,
            Arc::new(RecordingSink::new()),
            Arc::new(AlbumClassifier::new()),
            NotificationRouter::new(AppConfig::default().sources),
            PollerSettings {
                user_delay: Duration::ZERO,
                enrichment_delay: Duration::ZERO,
                album_page_fallback: false,
            },
        ))
    }

    #[tokio::test]
    async fn manual_trigger_runs_one_cycle() {
        let source = Arc::new(ScriptedSource::new());
        let (scheduler, trigger) = Scheduler::new(
            poller(source.clone()).await,
            Duration::from_secs(3600),
            false,
            Arc::new(SilentObserver),
        );
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(scheduler.run(async move {
            let _ = stop_rx.await;
        }));

        assert!(trigger.trigger());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.calls(), vec!["alice"]);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
        assert!(!trigger.trigger());
    }

    #[tokio::test]
    async fn run_on_start_fires_immediately() {
        let source = Arc::new(ScriptedSource::new());
        let (scheduler, _trigger) = Scheduler::new(
            poller(source.clone()).await,
            Duration::from_secs(3600),
            true,
            Arc::new(SilentObserver),
        );

        let task = tokio::spawn(scheduler.run(tokio::time::sleep(Duration::from_millis(200))));
        task.await.unwrap();

        assert_eq!(source.calls(), vec!["alice"]);
    }

    #[tokio::test]
    async fn without_run_on_start_waits_for_the_interval() {
        let source = Arc::new(ScriptedSource::new());
        let (scheduler, _trigger) = Scheduler::new(
            poller(source.clone()).await,
            Duration::from_secs(3600),
            false,
            Arc::new(SilentObserver),
        );

        scheduler.run(tokio::time::sleep(Duration::from_millis(100))).await;

        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_running_cycle() {
        let source = Arc::new(ScriptedSource::with_delay(Duration::from_millis(500)));
        let poller = poller(source.clone()).await;
        let (scheduler, _trigger) = Scheduler::new(
            poller.clone(),
            Duration::from_secs(3600),
            true,
            Arc::new(SilentObserver),
        );

        let started = tokio::time::Instant::now();
        scheduler.run(tokio::time::sleep(Duration::from_millis(100))).await;

        assert!(!poller.is_running());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(source.calls(), vec!["alice"]);
    }
}
