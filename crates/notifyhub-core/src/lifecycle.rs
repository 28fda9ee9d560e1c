//! Start/graceful-shutdown coordination (§4.8, §5). The Hub's worker pool
//! and scheduler are spawned as background tasks on `start`; `shutdown`
//! cancels them and waits up to `grace_period` for in-flight attempts to
//! finish before returning.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
    ShuttingDown,
}

/// Holds the cancellation token every background task (workers, scheduler
/// dispatcher) was spawned with, plus their join handles so `shutdown` can
/// wait on them.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every task holding a clone of `token()` to stop.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Wait up to `grace_period` for `handles` to finish after `trigger`.
    /// Tasks still running when the grace period elapses are abandoned
    /// (their own `CancellationToken` checks are what actually stop them;
    /// this only bounds how long the caller waits).
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, grace_period: Duration) {
        let all = futures::future::join_all(handles);
        if tokio::time::timeout(grace_period, all).await.is_err() {
            tracing::warn!(
                grace_period_ms = grace_period.as_millis() as u64,
                "shutdown grace period elapsed before all workers drained"
            );
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
