//! Background eviction of idle sessions.
//!
//! # Responsibilities
//! - Periodically sweep the store for sessions idle past the timeout
//! - Release the evicted sessions' outbound clients

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::session::SessionStore;

pub struct SessionSweeper {
    store: Arc<SessionStore>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(store: Arc<SessionStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.store.timeout().as_secs(),
            "Session sweeper starting"
        );

        // first sweep one interval after startup
        let start = time::Instant::now() + self.interval;
        let mut ticker = time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.store.sweep_expired(std::time::Instant::now());
                    tracing::debug!(evicted, active = self.store.len(), "Sweep complete");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ClientSettings;

    #[tokio::test]
    async fn test_sweeper_evicts_idle_sessions() {
        let store = Arc::new(SessionStore::new(Duration::from_millis(50), ClientSettings::default()));
        let id = store.create("ip", "ua").unwrap();
        let record = store.get(&id).unwrap();

        let (tx, rx) = broadcast::channel(1);
        let sweeper = SessionSweeper::new(store.clone(), Duration::from_millis(20));
        let handle = tokio::spawn(sweeper.run(rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!store.contains(&id));
        assert!(record.is_released());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
