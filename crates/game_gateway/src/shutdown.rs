//! Process-wide shutdown flag.
//!
//! Written once when shutdown begins and only read afterwards. Session loops
//! poll it between reads and dispatches; accept loops wait on it.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Marks the process as shutting down. Later calls have no effect.
    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            info!("🛑 Shutdown flag set");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = receiver.wait_for(|closing| *closing).await;
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn starts_unset() {
        assert!(!ShutdownFlag::new().is_shutting_down());
    }

    #[test]
    fn trigger_is_visible_to_clones() {
        let flag = ShutdownFlag::new();
        let clone = flag.clone();
        flag.trigger();
        flag.trigger();
        assert!(clone.is_shutting_down());
    }

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let flag = ShutdownFlag::new();
        assert!(timeout(Duration::from_millis(20), flag.wait()).await.is_err());

        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.wait().await })
        };
        flag.trigger();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_after_trigger_returns_immediately() {
        let flag = ShutdownFlag::new();
        flag.trigger();
        timeout(Duration::from_millis(50), flag.wait())
            .await
            .expect("already triggered");
    }
}
