//! Graceful Shutdown Handler
//!
//! A shutdown request is observed by the cycle driver only between cycles;
//! the coordinator then waits, with a bound, for the driver to return. A
//! store write in progress is always waited for, bound or not, before the
//! HTTP server is stopped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM, SIGINT
    Graceful,
    /// SIGQUIT: skip the drain wait, still finish a store write
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time allowed for an in-flight cycle to finish (default: 60s)
    pub cycle_drain_timeout_secs: u64,
    /// Time allowed for the HTTP server to stop (default: 10s)
    pub server_stop_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            cycle_drain_timeout_secs: 60,
            server_stop_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// Waiting for the driver to leave its current cycle
    DrainingCycle,
    /// Waiting out a store write the drain did not cover
    SealingCommits,
    StoppingServer,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::DrainingCycle => write!(f, "draining_cycle"),
            ShutdownPhase::SealingCommits => write!(f, "sealing_commits"),
            ShutdownPhase::StoppingServer => write!(f, "stopping_server"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShutdownError {
    #[error("cycle driver did not stop within {0}s")]
    DrainTimeout(u64),
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: Arc<AtomicBool>,
    signal: std::sync::Mutex<Option<ShutdownSignal>>,
    phase_tx: watch::Sender<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);

        Self {
            config,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            signal: std::sync::Mutex::new(None),
            phase_tx,
            signal_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Request shutdown; a repeated request can only escalate to urgent.
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if let Ok(mut current) = self.signal.lock() {
            if *current == Some(ShutdownSignal::Urgent) || *current == Some(signal) {
                warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
                return;
            }
            *current = Some(signal);
        }

        self.shutdown_requested.store(true, Ordering::SeqCst);
        info!("Shutdown requested: {}", signal);
        let _ = self.signal_tx.send(signal);
    }

    fn requested_signal(&self) -> Option<ShutdownSignal> {
        self.signal.lock().ok().and_then(|s| *s)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase_tx.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Wait for the driver, then the server, each with its own timeout.
    ///
    /// Under an urgent request the driver is given no drain time. Either way
    /// `seal_commits` is awaited without a bound once the drain ends, so the
    /// process never exits halfway through a store write.
    pub async fn execute<D, C, S>(
        &self,
        drain_cycle: D,
        seal_commits: C,
        stop_server: S,
    ) -> Result<(), ShutdownError>
    where
        D: Future<Output = ()>,
        C: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        let start = std::time::Instant::now();

        self.set_phase(ShutdownPhase::DrainingCycle);
        let drain_secs = match self.requested_signal() {
            Some(ShutdownSignal::Urgent) => 0,
            _ => self.config.cycle_drain_timeout_secs,
        };
        let drained = tokio::time::timeout(Duration::from_secs(drain_secs), drain_cycle)
            .await
            .is_ok();
        if !drained {
            error!("Cycle driver still busy after {}s", drain_secs);
        }

        self.set_phase(ShutdownPhase::SealingCommits);
        seal_commits.await;

        self.set_phase(ShutdownPhase::StoppingServer);
        let server_timeout = Duration::from_secs(self.config.server_stop_timeout_secs);
        if tokio::time::timeout(server_timeout, stop_server).await.is_err() {
            warn!(
                "Health server stop timeout after {}s",
                self.config.server_stop_timeout_secs
            );
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Shutdown completed in {:?}", start.elapsed());

        if drained {
            Ok(())
        } else {
            Err(ShutdownError::DrainTimeout(drain_secs))
        }
    }

    /// Token for a task that must stop on request
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            shutdown_requested: Arc::clone(&self.shutdown_requested),
            signal_rx: self.signal_tx.subscribe(),
        }
    }
}

/// Shutdown view held by a task
pub struct ShutdownToken {
    shutdown_requested: Arc<AtomicBool>,
    signal_rx: broadcast::Receiver<ShutdownSignal>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested, including before this call.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        if self.is_shutdown_requested() {
            return ShutdownSignal::Graceful;
        }
        match self.signal_rx.recv().await {
            Ok(signal) => signal,
            // Lagged or closed; either way the coordinator is gone or stopping
            Err(_) => ShutdownSignal::Urgent,
        }
    }
}

/// Resolve on the first SIGINT/SIGTERM (graceful) or SIGQUIT (urgent).
pub async fn wait_for_os_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let quit = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::quit()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGQUIT handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT");
            ShutdownSignal::Graceful
        }
        _ = terminate => {
            info!("Received SIGTERM");
            ShutdownSignal::Graceful
        }
        _ = quit => {
            warn!("Received SIGQUIT - urgent shutdown");
            ShutdownSignal::Urgent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ShutdownSignal::Graceful.to_string(), "graceful");
        assert_eq!(ShutdownSignal::Urgent.to_string(), "urgent");
        assert_eq!(ShutdownPhase::DrainingCycle.to_string(), "draining_cycle");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = GracefulShutdown::with_defaults();
        let mut token = shutdown.token();

        assert!(!shutdown.is_shutdown_requested());
        assert!(!token.is_shutdown_requested());
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Running);

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(shutdown.is_shutdown_requested());
        assert!(token.is_shutdown_requested());
        assert_eq!(token.wait_for_shutdown().await, ShutdownSignal::Graceful);

        // Duplicate request is ignored, escalation is not
        shutdown.request_shutdown(ShutdownSignal::Graceful);
        shutdown.request_shutdown(ShutdownSignal::Urgent);
        assert_eq!(shutdown.requested_signal(), Some(ShutdownSignal::Urgent));
    }

    #[tokio::test]
    async fn test_token_created_after_request() {
        let shutdown = GracefulShutdown::with_defaults();
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let mut late = shutdown.token();
        let signal = tokio::time::timeout(Duration::from_secs(1), late.wait_for_shutdown())
            .await
            .unwrap();
        assert_eq!(signal, ShutdownSignal::Graceful);
    }

    #[tokio::test]
    async fn test_execute_runs_phases() {
        let shutdown = GracefulShutdown::with_defaults();
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        shutdown.execute(async {}, async {}, async {}).await.unwrap();
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }

    #[tokio::test]
    async fn test_urgent_skips_drain_but_waits_for_commit() {
        let shutdown = GracefulShutdown::with_defaults();
        shutdown.request_shutdown(ShutdownSignal::Urgent);

        let sealed = Arc::new(AtomicBool::new(false));
        let flag = sealed.clone();
        let result = shutdown
            .execute(
                std::future::pending::<()>(),
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    flag.store(true, Ordering::SeqCst);
                },
                async {},
            )
            .await;
        assert_eq!(result, Err(ShutdownError::DrainTimeout(0)));
        assert!(sealed.load(Ordering::SeqCst));
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_still_waits_for_commit() {
        let shutdown = GracefulShutdown::new(ShutdownConfig {
            cycle_drain_timeout_secs: 5,
            server_stop_timeout_secs: 1,
        });
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let started = tokio::time::Instant::now();
        let result = shutdown
            .execute(
                std::future::pending::<()>(),
                tokio::time::sleep(Duration::from_secs(120)),
                async {},
            )
            .await;
        assert_eq!(result, Err(ShutdownError::DrainTimeout(5)));
        assert!(started.elapsed() >= Duration::from_secs(125));
    }
}
