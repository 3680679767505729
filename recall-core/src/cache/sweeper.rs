//! Periodic cache cleanup owned by whoever owns the caches.

use super::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something a [`CacheSweeper`] can clean up.
pub trait Sweep: Send + Sync {
    fn name(&self) -> &str;

    /// Purges stale entries and returns how many were removed.
    fn sweep(&self) -> usize;
}

impl<T> Sweep for Cache<T>
where
    T: Clone + Serialize + Send + Sync,
{
    fn name(&self) -> &str {
        Cache::name(self)
    }

    fn sweep(&self) -> usize {
        self.cleanup()
    }
}

/// Background task that runs [`Cache::cleanup`] on a fixed interval.
///
/// The task runs independently of cache traffic, so an idle cache still
/// releases expired entries. It stops on [`shutdown`](Self::shutdown) or when
/// the sweeper is dropped.
///
/// Must be created inside a Tokio runtime.
pub struct CacheSweeper {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    pub fn spawn(interval: Duration, targets: Vec<Arc<dyn Sweep>>) -> Self {
        let token = CancellationToken::new();
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(run(period, targets, token.clone()));

        info!(interval_ms = period.as_millis() as u64, "Cache sweeper started");

        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stops the task and waits for an in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(error = %e, "Cache sweeper task panicked");
                }
            }
        }
        info!("Cache sweeper stopped");
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(period: Duration, targets: Vec<Arc<dyn Sweep>>, token: CancellationToken) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                for target in &targets {
                    let removed = target.sweep();
                    if removed > 0 {
                        debug!(cache = target.name(), removed, "Swept cache");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FakeTimeSource;

    #[tokio::test]
    async fn test_sweeper_purges_idle_cache() {
        let clock = Arc::new(FakeTimeSource::new());
        let cache: Arc<Cache<String>> = Arc::new(
            Cache::new(10, 1024)
                .named("idle")
                .with_time_source(clock.clone()),
        );
        cache.set("stale", "v".to_string(), Duration::from_millis(10));
        clock.advance_millis(50);

        let sweeper = CacheSweeper::spawn(Duration::from_millis(10), vec![cache.clone() as Arc<dyn Sweep>]);
        assert!(sweeper.is_running());

        let mut waited = Duration::ZERO;
        while !cache.is_empty() && waited < Duration::from_secs(2) {
            time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }

        assert!(cache.is_empty());
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let cache: Arc<Cache<u32>> = Arc::new(Cache::new(10, 1024));
        let sweeper = CacheSweeper::spawn(Duration::from_secs(60), vec![cache as Arc<dyn Sweep>]);

        sweeper.shutdown().await;
    }

    struct PanickingSweep;

    impl Sweep for PanickingSweep {
        fn name(&self) -> &str {
            "broken"
        }

        fn sweep(&self) -> usize {
            panic!("sweep failed")
        }
    }

    #[tokio::test]
    async fn test_shutdown_survives_panicked_sweep() {
        let sweeper = CacheSweeper::spawn(Duration::from_millis(5), vec![Arc::new(PanickingSweep) as Arc<dyn Sweep>]);

        let mut waited = Duration::ZERO;
        while sweeper.is_running() && waited < Duration::from_secs(2) {
            time::sleep(Duration::from_millis(5)).await;
            waited += Duration::from_millis(5);
        }

        assert!(!sweeper.is_running());
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_drop_cancels_task() {
        let cache: Arc<Cache<u32>> = Arc::new(Cache::new(10, 1024));
        let sweeper = CacheSweeper::spawn(Duration::from_secs(60), vec![cache as Arc<dyn Sweep>]);
        let token = sweeper.token.clone();

        drop(sweeper);
        assert!(token.is_cancelled());
    }
}
