//! Background eviction task.
//!
//! Sleeps a fixed interval, then flushes and evicts every session idle past
//! the configured threshold. Holds no state of its own; eviction decisions
//! read a stable key snapshot from the registry, so request handlers may
//! mutate sessions freely between a scan and its actions.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::SessionRegistry;

pub struct EvictionSweeper {
    registry: Arc<SessionRegistry>,
    scan_interval: Duration,
    idle_threshold: Duration,
    cancel: CancellationToken,
}

impl EvictionSweeper {
    /// The cancellation token is handed in at construction so the process
    /// shutdown path can stop the sweeper and await it before the final
    /// flush.
    pub fn new(
        registry: Arc<SessionRegistry>,
        scan_interval: Duration,
        idle_threshold: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            scan_interval,
            idle_threshold,
            cancel,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            scan_interval_secs = self.scan_interval.as_secs(),
            idle_threshold_secs = self.idle_threshold.as_secs(),
            "eviction sweeper started"
        );
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.scan_interval) => {}
            }
            self.sweep_once().await;
        }
        info!("eviction sweeper stopped");
    }

    /// One scan cycle. `flush_and_evict` swallows per-user storage
    /// failures, so one bad user never aborts the rest of the cycle.
    async fn sweep_once(&self) {
        let idle = self.registry.idle_users(self.idle_threshold);
        if idle.is_empty() {
            return;
        }
        debug!(count = idle.len(), "evicting idle sessions");
        for user_id in idle {
            self.registry.flush_and_evict(&user_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Message, Role, SnapshotStore};
    use tempfile::TempDir;

    fn setup(tmp: &TempDir) -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(10, SnapshotStore::new(tmp.path())))
    }

    const SCAN: Duration = Duration::from_secs(60);
    const THRESHOLD: Duration = Duration::from_secs(10 * 60);

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_idle_sessions() {
        let tmp = TempDir::new().unwrap();
        let registry = setup(&tmp);
        registry.record("Uidle", Message::text(Role::User, "hi"));
        registry.record("Ubusy", Message::text(Role::User, "hi"));

        let sweeper =
            EvictionSweeper::new(registry.clone(), SCAN, THRESHOLD, CancellationToken::new());

        tokio::time::advance(Duration::from_secs(11 * 60)).await;
        registry.touch("Ubusy");
        sweeper.sweep_once().await;

        assert!(!registry.is_resident("Uidle"));
        assert!(registry.is_resident("Ubusy"));
        assert!(SnapshotStore::new(tmp.path()).path_for("Uidle").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_happens_after_ten_idle_minutes_not_before() {
        let tmp = TempDir::new().unwrap();
        let registry = setup(&tmp);
        registry.record("UA", Message::text(Role::User, "hello"));
        registry.record("UA", Message::text(Role::Assistant, "hi"));

        let sweeper =
            EvictionSweeper::new(registry.clone(), SCAN, THRESHOLD, CancellationToken::new());

        // Nine idle minutes: a scan must leave the session alone.
        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        sweeper.sweep_once().await;
        assert!(registry.is_resident("UA"));

        // Eleven idle minutes: the next scan flushes and evicts.
        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        sweeper.sweep_once().await;
        assert!(!registry.is_resident("UA"));
        let snapshot = SnapshotStore::new(tmp.path()).read("UA").await.unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_evicts_after_threshold_but_not_before() {
        let tmp = TempDir::new().unwrap();
        let registry = setup(&tmp);
        // An empty session is evicted without touching disk, so the
        // spawned loop's behavior is fully driven by the paused clock.
        registry.ensure_loaded("UA").await;

        let cancel = CancellationToken::new();
        let handle =
            EvictionSweeper::new(registry.clone(), SCAN, THRESHOLD, cancel.clone()).spawn();

        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        tokio::task::yield_now().await;
        assert!(registry.is_resident("UA"));

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!registry.is_resident("UA"));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_cleanly() {
        let tmp = TempDir::new().unwrap();
        let registry = setup(&tmp);

        let cancel = CancellationToken::new();
        let handle = EvictionSweeper::new(
            registry,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            cancel.clone(),
        )
        .spawn();

        cancel.cancel();
        // Must resolve promptly even though the sleep interval is an hour,
        // and must not propagate a panic or error.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop after cancellation")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn append_during_sweep_is_never_lost() {
        let tmp = TempDir::new().unwrap();
        let registry = setup(&tmp);
        registry.record("UC", Message::text(Role::User, "old"));

        tokio::time::advance(Duration::from_secs(11 * 60)).await;

        let sweeper =
            EvictionSweeper::new(registry.clone(), SCAN, THRESHOLD, CancellationToken::new());

        let appender = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry.record("UC", Message::text(Role::User, "racing append"));
            })
        };
        sweeper.sweep_once().await;
        appender.await.unwrap();

        // The racing append is either in the flushed snapshot or in a
        // freshly re-initialized resident window; count both places.
        let snapshot = SnapshotStore::new(tmp.path())
            .read("UC")
            .await
            .unwrap_or_default();
        let resident = registry.context("UC");
        let total: usize = snapshot.len() + resident.len();
        assert!(
            total >= 2,
            "racing append lost: snapshot={} resident={}",
            snapshot.len(),
            resident.len()
        );
    }
}
