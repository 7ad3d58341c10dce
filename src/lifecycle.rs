//! Process shutdown coordination.
//!
//! A [`Lifecycle`] is cloned into every component. It trips once, either because an OS
//! interrupt arrived, because the dispatcher rendered its message or because of a fatal
//! error, and never resets.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const RUNNING: u8 = 0;
const INTERRUPTED: u8 = 1;
const COMPLETED: u8 = 2;
const FAILED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupted,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Cancelling,
    Terminated,
}

#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    token: CancellationToken,
    reason: Arc<AtomicU8>,
    terminated: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip because of an OS signal. Returns `false` if already tripped.
    pub fn interrupt(&self) -> bool {
        self.trip(INTERRUPTED)
    }

    /// Trip because the work is done. Returns `false` if already tripped.
    pub fn complete(&self) -> bool {
        self.trip(COMPLETED)
    }

    /// Trip because of a fatal error. Returns `false` if already tripped.
    pub fn fail(&self) -> bool {
        self.trip(FAILED)
    }

    fn trip(&self, reason: u8) -> bool {
        let won = self
            .reason
            .compare_exchange(RUNNING, reason, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            debug!("Lifecycle tripped: {:?}", self.reason());
            self.token.cancel();
        }
        won
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        match self.reason.load(Ordering::Acquire) {
            INTERRUPTED => Some(ShutdownReason::Interrupted),
            COMPLETED => Some(ShutdownReason::Completed),
            FAILED => Some(ShutdownReason::Failed),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the lifecycle has tripped.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Await `future` unless the lifecycle trips first, in which case `None` is returned.
    pub async fn until_cancelled<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            output = future => Some(output),
        }
    }

    /// Marks teardown as finished. Only meaningful after the lifecycle tripped.
    pub fn terminate(&self) {
        if self.is_cancelled() {
            self.terminated.cancel();
        }
    }

    pub fn phase(&self) -> Phase {
        if self.terminated.is_cancelled() {
            Phase::Terminated
        } else if self.is_cancelled() {
            Phase::Cancelling
        } else {
            Phase::Running
        }
    }

    /// Spawn a task that trips the lifecycle on Ctrl+C (and SIGTERM on unix).
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = lifecycle.cancelled() => {}
                received = shutdown_signal() => match received {
                    Ok(()) => {
                        info!("Shutdown signal received");
                        lifecycle.interrupt();
                    }
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                },
            }
        })
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_producer_wins_and_token_stays_tripped() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.phase(), Phase::Running);
        assert_eq!(lifecycle.reason(), None);

        assert!(lifecycle.complete());
        assert!(!lifecycle.interrupt());
        assert!(!lifecycle.complete());

        assert!(lifecycle.is_cancelled());
        assert_eq!(lifecycle.reason(), Some(ShutdownReason::Completed));
        assert_eq!(lifecycle.phase(), Phase::Cancelling);
    }

    #[test]
    fn clones_share_state() {
        let lifecycle = Lifecycle::new();
        let other = lifecycle.clone();
        other.interrupt();
        assert!(lifecycle.is_cancelled());
        assert_eq!(lifecycle.reason(), Some(ShutdownReason::Interrupted));
    }

    #[test]
    fn terminate_requires_cancellation() {
        let lifecycle = Lifecycle::new();
        lifecycle.terminate();
        assert_eq!(lifecycle.phase(), Phase::Running);

        lifecycle.interrupt();
        lifecycle.terminate();
        assert_eq!(lifecycle.phase(), Phase::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn until_cancelled_abandons_pending_work_on_interrupt() {
        let lifecycle = Lifecycle::new();
        let trip = lifecycle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            trip.interrupt();
        });

        let outcome = lifecycle
            .until_cancelled(std::future::pending::<()>())
            .await;
        assert_eq!(outcome, None);
        assert_eq!(lifecycle.reason(), Some(ShutdownReason::Interrupted));
    }

    #[tokio::test]
    async fn until_cancelled_returns_output_while_running() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.until_cancelled(async { 7 }).await, Some(7));

        lifecycle.complete();
        assert_eq!(lifecycle.until_cancelled(async { 7 }).await, None);
    }

    #[tokio::test]
    async fn cancelled_resolves_for_waiters() {
        let lifecycle = Lifecycle::new();
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.cancelled().await })
        };
        lifecycle.complete();
        waiter.await.unwrap();
    }
}
