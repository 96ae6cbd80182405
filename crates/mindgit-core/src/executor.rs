//! Safe execution: checkpoint, attempt, recover
//!
//! [`Session::safe_execute`] wraps a fallible operation in the
//! save-execute-restore loop:
//!
//! 1. checkpoint the input state (`C₀`),
//! 2. attempt the operation, consulting the recovery strategy chain on each
//!    failure (retry with delay, switch to fallback, or give up),
//! 3. on exhaustion, roll the DAG back to `C₀` and run the fallback
//!    callable if one was supplied.
//!
//! Errors from the user callable never escape except wrapped in
//! [`EngineError::Execution`]. Cancellation during a retry delay wakes
//! immediately, rolls back to `C₀`, and returns [`EngineError::Cancelled`]
//! without invoking the fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mindgit_checkpoint::{Checkpoint, StateMap};

use crate::error::{EngineError, Result, StepError};
use crate::session::Session;
use crate::strategies::{RecoveryDecision, RecoveryStrategy, RetryWithBackoff};

/// Boxed fallback callable
pub type FallbackFn = Arc<
    dyn Fn(StateMap) -> BoxFuture<'static, std::result::Result<StateMap, StepError>>
        + Send
        + Sync,
>;

/// Configuration for one protected call
pub struct ExecuteOptions {
    description: String,
    max_retries: u32,
    strategy: Arc<dyn RecoveryStrategy>,
    fallback: Option<FallbackFn>,
    cancel: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            max_retries: 3,
            strategy: Arc::new(RetryWithBackoff::default()),
            fallback: None,
            cancel: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn RecoveryStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(StateMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<StateMap, StepError>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |state| Box::pin(fallback(state))));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Session {
    /// Execute `func` under checkpoint protection.
    ///
    /// Returns the operation's result together with the checkpoint that
    /// recorded it (a post-attempt checkpoint on success, the fallback
    /// checkpoint after a recovery).
    pub async fn safe_execute<F, Fut>(
        &self,
        mut func: F,
        state: StateMap,
        options: ExecuteOptions,
    ) -> Result<(StateMap, Checkpoint)>
    where
        F: FnMut(StateMap) -> Fut,
        Fut: Future<Output = std::result::Result<StateMap, StepError>>,
    {
        let description = options.description.clone();

        let mut pre_metadata = StateMap::new();
        pre_metadata.insert("operation".into(), json!(description));
        pre_metadata.insert("phase".into(), json!("pre_attempt"));
        let pre_cp = self
            .checkpoint(
                state.clone(),
                pre_metadata,
                &format!("Pre-attempt: {description}"),
                &description,
            )
            .await?;
        let started = Instant::now();

        let mut current_state = state;
        let mut last_error: Option<StepError> = None;

        for attempt in 0..=options.max_retries {
            match func(current_state.clone()).await {
                Ok(result) => {
                    let mut metadata = StateMap::new();
                    metadata.insert("operation".into(), json!(description));
                    metadata.insert("phase".into(), json!("post_attempt"));
                    metadata.insert("attempt".into(), json!(attempt + 1));
                    let success_cp = self
                        .checkpoint(
                            result.clone(),
                            metadata,
                            &format!("Completed: {description}"),
                            &format!("{description}:success"),
                        )
                        .await?;
                    if attempt > 0 {
                        info!(operation = %description, attempt, "operation succeeded after retry");
                    }
                    return Ok((result, success_cp));
                }
                Err(error) => {
                    self.inner.write().await.metrics.errors_caught += 1;
                    warn!(
                        operation = %description,
                        attempt,
                        max_retries = options.max_retries,
                        error = %error,
                        "attempt failed"
                    );

                    let decision = options.strategy.handle(&error, &current_state, attempt);
                    last_error = Some(error);

                    match decision {
                        RecoveryDecision::Retry { state, delay } if attempt < options.max_retries => {
                            if !delay.is_zero() {
                                if let Some(token) = &options.cancel {
                                    tokio::select! {
                                        _ = token.cancelled() => {
                                            warn!(operation = %description, "cancelled during retry delay");
                                            self.rollback_to(&pre_cp.id).await?;
                                            return Err(EngineError::Cancelled);
                                        }
                                        _ = tokio::time::sleep(delay) => {}
                                    }
                                } else {
                                    tokio::time::sleep(delay).await;
                                }
                            }
                            current_state = state;
                        }
                        RecoveryDecision::Retry { state, .. } => {
                            // Out of attempts; the modified state still
                            // flows into the fallback path.
                            current_state = state;
                            break;
                        }
                        RecoveryDecision::Fallback { state } => {
                            current_state = state;
                            break;
                        }
                        RecoveryDecision::GiveUp => break,
                    }
                }
            }
        }

        // Step 3: restore the pre-attempt state, then try the fallback.
        self.rollback_to(&pre_cp.id).await?;
        {
            let mut inner = self.inner.write().await;
            inner.metrics.time_saved += started.elapsed();
        }

        if let Some(fallback) = &options.fallback {
            match fallback(current_state.clone()).await {
                Ok(result) => {
                    let mut metadata = StateMap::new();
                    metadata.insert("operation".into(), json!(description));
                    metadata.insert("recovery".into(), json!("fallback"));
                    let fallback_cp = self
                        .checkpoint(
                            result.clone(),
                            metadata,
                            &format!("Fallback succeeded: {description}"),
                            &format!("{description}:fallback"),
                        )
                        .await?;
                    self.inner.write().await.metrics.recoveries += 1;
                    info!(operation = %description, "fallback recovery succeeded");
                    return Ok((result, fallback_cp));
                }
                Err(fallback_error) => {
                    warn!(operation = %description, error = %fallback_error, "fallback failed");
                }
            }
        }

        Err(EngineError::Execution {
            description,
            source: last_error.unwrap_or_else(|| "no attempts were made".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn state_of(pairs: &[(&str, serde_json::Value)]) -> StateMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn zero_backoff() -> Arc<dyn RecoveryStrategy> {
        Arc::new(RetryWithBackoff::new(Duration::ZERO, Duration::ZERO).with_max_retries(10))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let session = Session::new("exec-agent").await.unwrap();
        let (result, cp) = session
            .safe_execute(
                |_state| async { Ok(state_of(&[("ok", serde_json::json!(true))])) },
                state_of(&[("input", serde_json::json!(1))]),
                ExecuteOptions::new("easy step"),
            )
            .await
            .unwrap();

        assert_eq!(result["ok"], serde_json::json!(true));
        assert_eq!(cp.metadata["phase"], serde_json::json!("post_attempt"));

        let metrics = session.metrics().await;
        assert_eq!(metrics.errors_caught, 0);
        assert_eq!(metrics.rollbacks, 0);
        // Pre-attempt plus post-attempt.
        assert_eq!(metrics.checkpoints_created, 2);
    }

    #[tokio::test]
    async fn test_strategy_modified_state_reaches_next_attempt() {
        let session = Session::new("exec-agent").await.unwrap();
        let strategy = Arc::new(crate::strategies::AlternativePath::new(state_of(&[(
            "source",
            serde_json::json!("cache"),
        )])));

        let attempts = AtomicU32::new(0);
        let (result, _) = session
            .safe_execute(
                |state| {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err("live source down".into())
                        } else {
                            assert_eq!(state["source"], serde_json::json!("cache"));
                            Ok(state)
                        }
                    }
                },
                state_of(&[("source", serde_json::json!("live"))]),
                ExecuteOptions::new("fetch").with_strategy(strategy),
            )
            .await
            .unwrap();

        assert_eq!(result["source"], serde_json::json!("cache"));
        assert_eq!(session.metrics().await.errors_caught, 1);
    }

    #[tokio::test]
    async fn test_give_up_without_fallback_wraps_last_error() {
        let session = Session::new("exec-agent").await.unwrap();
        let err = session
            .safe_execute(
                |_state| async { Err::<StateMap, _>("always broken".into()) },
                StateMap::new(),
                ExecuteOptions::new("doomed")
                    .with_max_retries(2)
                    .with_strategy(zero_backoff()),
            )
            .await
            .unwrap_err();

        match err {
            EngineError::Execution { description, source } => {
                assert_eq!(description, "doomed");
                assert_eq!(source.to_string(), "always broken");
            }
            other => panic!("expected execution error, got {other:?}"),
        }
        let metrics = session.metrics().await;
        assert_eq!(metrics.errors_caught, 3);
        assert_eq!(metrics.rollbacks, 1);
        assert_eq!(metrics.recoveries, 0);
    }

    #[tokio::test]
    async fn test_cancellation_during_delay() {
        let session = Session::new("exec-agent").await.unwrap();
        let token = CancellationToken::new();
        let strategy =
            Arc::new(RetryWithBackoff::new(Duration::from_secs(30), Duration::from_secs(30)));

        let cancel_after = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_after.cancel();
        });

        let started = Instant::now();
        let err = session
            .safe_execute(
                |_state| async { Err::<StateMap, _>("flaky".into()) },
                StateMap::new(),
                ExecuteOptions::new("slow retry")
                    .with_strategy(strategy)
                    .with_fallback(|state| async move { Ok(state) })
                    .with_cancel(token),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Cancelled));
        // Woke from the 30s delay early, and the fallback did not run.
        assert!(started.elapsed() < Duration::from_secs(5));
        let metrics = session.metrics().await;
        assert_eq!(metrics.recoveries, 0);
        assert_eq!(metrics.rollbacks, 1);
    }
}
