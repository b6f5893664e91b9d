//! Keeps a connection alive: connect with backoff, run its loop, and start
//! over whenever the loop fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

// ── Supervised capability ────────────────────────────────────────────

/// A connection the supervisor can drive.
pub trait Supervised: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Establish the connection. Errors are retried with backoff.
    fn connect(&self) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Process traffic until the connection fails or is cancelled.
    ///
    /// `Ok(())` means the loop stopped because of cancellation; an error
    /// means the connection must be re-established.
    fn run(&self) -> impl Future<Output = Result<(), CoreError>> + Send;
}

// ── BackoffConfig ────────────────────────────────────────────────────

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on the delay. Default: 5 minutes.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl BackoffConfig {
    /// `min(initial * 2^attempt, max)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

// ── Supervisor ───────────────────────────────────────────────────────

/// Drives one [`Supervised`] component until cancelled.
pub struct Supervisor<T: Supervised> {
    component: Arc<T>,
    backoff: BackoffConfig,
    cancel: CancellationToken,
}

impl<T: Supervised> Supervisor<T> {
    pub fn new(component: Arc<T>, backoff: BackoffConfig, cancel: CancellationToken) -> Self {
        Self {
            component,
            backoff,
            cancel,
        }
    }

    /// Run the supervisor on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Connect → run → on error, reconnect. Returns once cancelled.
    pub async fn run(self) {
        let name = self.component.name().to_owned();
        tracing::info!(component = %name, "Starting connection supervisor");

        while self.connect_with_backoff(&name).await {
            let component = Arc::clone(&self.component);
            let mut task = tokio::spawn(async move { component.run().await });

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    task.abort();
                    break;
                }
                outcome = &mut task => outcome,
            };

            match outcome {
                Ok(Ok(())) if self.cancel.is_cancelled() => break,
                Ok(Ok(())) => {
                    tracing::info!(component = %name, "Connection loop ended, reconnecting");
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(component = %name, error = %e, "Connection lost, reconnecting");
                }
                Ok(Err(e)) => {
                    tracing::error!(component = %name, error = %e, "Connection loop failed, reconnecting");
                }
                Err(e) => {
                    tracing::error!(component = %name, error = %e, "Connection loop task died, reconnecting");
                }
            }
        }

        tracing::info!(component = %name, "Connection supervisor stopped");
    }

    /// Retry `connect` until it succeeds (`true`) or the token fires (`false`).
    async fn connect_with_backoff(&self, name: &str) -> bool {
        let mut attempt: u32 = 0;

        loop {
            tracing::debug!(component = %name, attempt, "Connecting");

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                result = self.component.connect() => result,
            };

            let error = match result {
                Ok(()) => {
                    tracing::info!(component = %name, "Connected");
                    return true;
                }
                Err(e) => e,
            };

            let delay = self.backoff.delay(attempt);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            if error.is_transient() {
                tracing::warn!(
                    component = %name,
                    error = %error,
                    attempt,
                    delay_ms,
                    "Connection attempt failed, waiting before retry"
                );
            } else {
                tracing::error!(
                    component = %name,
                    error = %error,
                    attempt,
                    delay_ms,
                    "Connection attempt rejected, waiting before retry"
                );
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                () = tokio::time::sleep(delay) => {}
            }

            attempt = attempt.saturating_add(1);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn default_backoff_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let config = BackoffConfig::default();
        let delays: Vec<u64> = (0..11).map(|n| config.delay(n).as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300]);
    }

    #[test]
    fn backoff_survives_huge_attempt_counts() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay(31), Duration::from_secs(300));
        assert_eq!(config.delay(64), Duration::from_secs(300));
        assert_eq!(config.delay(u32::MAX), Duration::from_secs(300));
    }

    /// Scripted component: `connect` pops results, `run` pops results and
    /// waits for cancellation once the script is empty.
    struct Scripted {
        connects: Mutex<VecDeque<Result<(), CoreError>>>,
        runs: Mutex<VecDeque<Result<(), CoreError>>>,
        connect_times: Mutex<Vec<Instant>>,
        run_calls: AtomicUsize,
        cancel: CancellationToken,
    }

    impl Scripted {
        fn new(
            connects: Vec<Result<(), CoreError>>,
            runs: Vec<Result<(), CoreError>>,
            cancel: CancellationToken,
        ) -> Arc<Self> {
            Arc::new(Self {
                connects: Mutex::new(connects.into()),
                runs: Mutex::new(runs.into()),
                connect_times: Mutex::new(Vec::new()),
                run_calls: AtomicUsize::new(0),
                cancel,
            })
        }

        fn gaps(&self) -> Vec<u64> {
            let times = self.connect_times.lock().unwrap();
            times
                .windows(2)
                .map(|w| (w[1] - w[0]).as_secs())
                .collect()
        }
    }

    fn lost() -> CoreError {
        CoreError::ConnectionLost {
            reason: "reset by peer".into(),
        }
    }

    fn refused() -> CoreError {
        CoreError::ConnectionFailed {
            endpoint: "test:1".into(),
            reason: "refused".into(),
        }
    }

    impl Supervised for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn connect(&self) -> Result<(), CoreError> {
            self.connect_times.lock().unwrap().push(Instant::now());
            self.connects.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn run(&self) -> Result<(), CoreError> {
            self.run_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.runs.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    self.cancel.cancelled().await;
                    Ok(())
                }
            }
        }
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_connect_with_exponential_backoff() {
        let cancel = CancellationToken::new();
        let component = Scripted::new(
            vec![Err(refused()), Err(refused()), Err(refused())],
            vec![],
            cancel.clone(),
        );

        let handle = Supervisor::new(Arc::clone(&component), BackoffConfig::default(), cancel.clone())
            .spawn();

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(component.gaps(), [1, 2, 4]);
        assert_eq!(component.run_calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_loop_error_with_fresh_backoff() {
        let cancel = CancellationToken::new();
        let component = Scripted::new(
            vec![Err(refused()), Ok(()), Err(refused()), Ok(())],
            vec![Err(lost())],
            cancel.clone(),
        );

        let handle = Supervisor::new(Arc::clone(&component), BackoffConfig::default(), cancel.clone())
            .spawn();

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        // Fail, 1s, connect, loop dies, immediate retry fails, 1s again.
        assert_eq!(component.gaps(), [1, 0, 1]);
        assert_eq!(component.run_calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_sleep() {
        let cancel = CancellationToken::new();
        let component = Scripted::new(
            (0..20).map(|_| Err(refused())).collect(),
            vec![],
            cancel.clone(),
        );

        let handle = Supervisor::new(Arc::clone(&component), BackoffConfig::default(), cancel.clone())
            .spawn();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        settle().await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(component.connect_times.lock().unwrap().len(), 2);
        assert_eq!(component.run_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_running_loop() {
        let cancel = CancellationToken::new();
        let component = Scripted::new(vec![], vec![], cancel.clone());

        let handle = Supervisor::new(Arc::clone(&component), BackoffConfig::default(), cancel.clone())
            .spawn();

        settle().await;
        assert_eq!(component.run_calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(component.connect_times.lock().unwrap().len(), 1);
    }
}
