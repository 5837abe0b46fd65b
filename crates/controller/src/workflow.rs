//! Activity runner: per-step timeouts and retries with exponential backoff.
//!
//! Each pipeline step runs as an activity. Transient failures
//! (`Error::is_retryable`) are retried up to the policy's attempt budget;
//! permanent failures surface immediately.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orchestra_core::{config::StepPolicy, Error, Result};

const BACKOFF_COEFFICIENT: u32 = 2;
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub start_to_close: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn once(timeout: Duration) -> Self {
        Self {
            start_to_close: timeout,
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Backoff before attempt `attempt + 1`, with `attempt` counted from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_COEFFICIENT.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl From<StepPolicy> for RetryPolicy {
    fn from(p: StepPolicy) -> Self {
        Self {
            start_to_close: Duration::from_secs(p.timeout_secs),
            max_attempts: p.max_attempts.max(1),
            initial_backoff: Duration::from_millis(p.initial_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStats {
    pub running: usize,
    pub started: u64,
    pub retries: u64,
}

/// Runs activities and counts workflows in flight.
#[derive(Default)]
pub struct WorkflowEngine {
    running: AtomicUsize,
    started: AtomicU64,
    retries: AtomicU64,
}

/// Decrements the running count on drop.
pub struct RunningGuard {
    engine: Arc<WorkflowEngine>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.engine.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a workflow as running until the guard drops.
    pub fn start(self: &Arc<Self>) -> RunningGuard {
        self.running.fetch_add(1, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::Relaxed);
        RunningGuard {
            engine: self.clone(),
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            running: self.running(),
            started: self.started.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Run `activity` under `policy`. A timed-out attempt counts as a
    /// retryable `Error::Timeout`.
    pub async fn run_activity<T, F, Fut>(&self, name: &str, policy: RetryPolicy, mut activity: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(policy.start_to_close, activity()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "{} exceeded {}s",
                    name,
                    policy.start_to_close.as_secs()
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        activity = name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Activity failed, retrying"
                    );
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(activity = name, attempt, error = %e, "Activity failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            start_to_close: Duration::from_secs(1),
            max_attempts: attempts,
            initial_backoff: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(5);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(RetryPolicy::from(StepPolicy {
            timeout_secs: 120,
            max_attempts: 3,
            initial_backoff_ms: 30_000,
        }).backoff(2), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let engine = WorkflowEngine::new();
        let calls = AtomicU32::new(0);
        let out = engine
            .run_activity("dispatch", policy(3), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::storage("database is locked"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.stats().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let engine = WorkflowEngine::new();
        let calls = AtomicU32::new(0);
        let err = engine
            .run_activity("execute", policy(3), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::llm(Some(401), "bad key"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LlmProvider { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let engine = WorkflowEngine::new();
        let err = engine
            .run_activity("slow", policy(1), || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_running_guard() {
        let engine = Arc::new(WorkflowEngine::new());
        {
            let _a = engine.start();
            let _b = engine.start();
            assert_eq!(engine.running(), 2);
        }
        assert_eq!(engine.running(), 0);
        assert_eq!(engine.stats().started, 2);
    }
}
