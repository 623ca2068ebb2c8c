//! Periodic refetch of collection stores.
//!
//! Stores never refresh themselves; long-running consumers (the `watch`
//! commands) spawn a poller to keep a collection current.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use super::{ConfigStore, VmStore};

/// Default interval between refetches (in seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// A store whose contents can be reloaded from the server
#[async_trait]
pub trait Refetch: Send + Sync + 'static {
    /// Label used in logs
    fn label(&self) -> &'static str;

    async fn refetch(&self);
}

#[async_trait]
impl Refetch for VmStore {
    fn label(&self) -> &'static str {
        "vms"
    }

    async fn refetch(&self) {
        self.fetch().await
    }
}

#[async_trait]
impl Refetch for ConfigStore {
    fn label(&self) -> &'static str {
        "configs"
    }

    async fn refetch(&self) {
        self.fetch().await
    }
}

/// Spawn a task that refetches `store` every `interval_secs`, starting
/// immediately. Abort the returned handle to stop it.
pub fn spawn_poller<T: Refetch>(store: Arc<T>, interval_secs: u64) -> JoinHandle<()> {
    let interval_secs = interval_secs.max(1);
    tracing::info!(
        store = store.label(),
        interval_secs = interval_secs,
        "Starting poller"
    );

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        // A slow fetch must not cause a burst of catch-up fetches
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            store.refetch().await;
            tracing::trace!(store = store.label(), "Poll cycle completed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Refetch for CountingStore {
        fn label(&self) -> &'static str {
            "counting"
        }

        async fn refetch(&self) {
            self.fetches.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_fetches_on_each_tick() {
        let store = Arc::new(CountingStore::default());
        let handle = spawn_poller(store.clone(), 10);

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(store.fetches.load(Ordering::SeqCst), 3);

        handle.abort();
        let _ = handle.await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let store = Arc::new(CountingStore::default());
        let handle = spawn_poller(store.clone(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
        handle.abort();
    }
}
