//! Recovery strategies for protected calls
//!
//! When an error surfaces inside [`safe_execute`], the configured strategy
//! decides what happens next: retry with a (possibly modified) state after a
//! delay, switch to the fallback path, or give up. Strategies are stateless
//! between protected calls; everything they need to count is derived from
//! the attempt index they are handed.
//!
//! [`safe_execute`]: crate::session::Session::safe_execute

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::StepError;
use mindgit_checkpoint::StateMap;

/// Outcome of consulting a recovery strategy after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryDecision {
    /// Sleep for `delay`, replace the working state, and try again
    Retry { state: StateMap, delay: Duration },
    /// Stop attempting and hand `state` to the fallback path
    Fallback { state: StateMap },
    /// Stop attempting with the state as it stands
    GiveUp,
}

/// Policy object deciding how to react to an error during a protected call
pub trait RecoveryStrategy: Send + Sync {
    fn handle(&self, error: &StepError, state: &StateMap, attempt: u32) -> RecoveryDecision;
}

/// Shallow key-wise override: every key of `overrides` replaces (or adds to)
/// the corresponding key of `state`.
fn overlay(state: &StateMap, overrides: &StateMap) -> StateMap {
    let mut merged = state.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Wait, then try again, with exponentially growing delays
///
/// Returns `Retry(state, min(max, base * factor^attempt))` for the first
/// `max_retries` attempts, then `GiveUp`. Optional jitter adds up to 25%
/// to each delay so simultaneous retries spread out.
#[derive(Debug, Clone)]
pub struct RetryWithBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    max_retries: u32,
    jitter: bool,
}

impl RetryWithBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            factor: 2.0,
            max_retries: 3,
            jitter: false,
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for a given attempt, before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }
}

impl Default for RetryWithBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl RecoveryStrategy for RetryWithBackoff {
    fn handle(&self, _error: &StepError, state: &StateMap, attempt: u32) -> RecoveryDecision {
        if attempt >= self.max_retries {
            return RecoveryDecision::GiveUp;
        }
        let mut delay = self.backoff_delay(attempt);
        if self.jitter {
            let extra = delay.as_secs_f64() * 0.25 * rand::thread_rng().gen::<f64>();
            delay += Duration::from_secs_f64(extra);
        }
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backoff retry");
        RecoveryDecision::Retry {
            state: state.clone(),
            delay,
        }
    }
}

/// Try once more along a different path
///
/// Overrides the state with the configured modifiers on the first attempt,
/// then gives up.
#[derive(Debug, Clone, Default)]
pub struct AlternativePath {
    modifiers: StateMap,
}

impl AlternativePath {
    pub fn new(modifiers: StateMap) -> Self {
        Self { modifiers }
    }
}

impl RecoveryStrategy for AlternativePath {
    fn handle(&self, _error: &StepError, state: &StateMap, attempt: u32) -> RecoveryDecision {
        if attempt > 0 {
            return RecoveryDecision::GiveUp;
        }
        RecoveryDecision::Retry {
            state: overlay(state, &self.modifiers),
            delay: Duration::ZERO,
        }
    }
}

/// Stop retrying and produce a simpler answer
///
/// Routes straight to the fallback path with the state marked degraded,
/// once; afterwards gives up.
#[derive(Debug, Clone, Copy, Default)]
pub struct DegradeGracefully;

impl DegradeGracefully {
    pub fn new() -> Self {
        Self
    }
}

impl RecoveryStrategy for DegradeGracefully {
    fn handle(&self, _error: &StepError, state: &StateMap, attempt: u32) -> RecoveryDecision {
        if attempt > 0 {
            return RecoveryDecision::GiveUp;
        }
        let mut overrides = StateMap::new();
        overrides.insert("mode".into(), serde_json::json!("degraded"));
        overrides.insert("simplified".into(), serde_json::json!(true));
        RecoveryDecision::Fallback {
            state: overlay(state, &overrides),
        }
    }
}

/// Try child strategies in order; the first one that does not give up
/// determines the outcome
pub struct CompositeStrategy {
    children: Vec<Box<dyn RecoveryStrategy>>,
}

impl CompositeStrategy {
    pub fn new(children: Vec<Box<dyn RecoveryStrategy>>) -> Self {
        Self { children }
    }
}

impl RecoveryStrategy for CompositeStrategy {
    fn handle(&self, error: &StepError, state: &StateMap, attempt: u32) -> RecoveryDecision {
        for child in &self.children {
            match child.handle(error, state, attempt) {
                RecoveryDecision::GiveUp => continue,
                decision => return decision,
            }
        }
        RecoveryDecision::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step_error() -> StepError {
        "boom".into()
    }

    fn state_of(pairs: &[(&str, serde_json::Value)]) -> StateMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_backoff_delay_exponential_and_capped() {
        let strategy = RetryWithBackoff::new(Duration::from_secs(1), Duration::from_secs(5));

        assert_eq!(strategy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(strategy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(strategy.backoff_delay(3), Duration::from_secs(5)); // capped
    }

    #[test]
    fn test_backoff_retries_then_gives_up() {
        let strategy = RetryWithBackoff::new(Duration::ZERO, Duration::ZERO).with_max_retries(2);
        let state = state_of(&[("k", json!(1))]);

        for attempt in 0..2 {
            match strategy.handle(&step_error(), &state, attempt) {
                RecoveryDecision::Retry { delay, .. } => assert_eq!(delay, Duration::ZERO),
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert_eq!(
            strategy.handle(&step_error(), &state, 2),
            RecoveryDecision::GiveUp
        );
    }

    #[test]
    fn test_alternative_path_overrides_once() {
        let strategy = AlternativePath::new(state_of(&[("source", json!("cache"))]));
        let state = state_of(&[("source", json!("live")), ("step", json!(1))]);

        match strategy.handle(&step_error(), &state, 0) {
            RecoveryDecision::Retry { state: modified, delay } => {
                assert_eq!(delay, Duration::ZERO);
                assert_eq!(modified["source"], json!("cache"));
                assert_eq!(modified["step"], json!(1));
            }
            other => panic!("expected retry, got {other:?}"),
        }
        assert_eq!(
            strategy.handle(&step_error(), &state, 1),
            RecoveryDecision::GiveUp
        );
    }

    #[test]
    fn test_degrade_gracefully_marks_state() {
        let strategy = DegradeGracefully::new();
        let state = state_of(&[("task", json!("t"))]);

        match strategy.handle(&step_error(), &state, 0) {
            RecoveryDecision::Fallback { state: degraded } => {
                assert_eq!(degraded["mode"], json!("degraded"));
                assert_eq!(degraded["simplified"], json!(true));
                assert_eq!(degraded["task"], json!("t"));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(
            strategy.handle(&step_error(), &state, 1),
            RecoveryDecision::GiveUp
        );
    }

    #[test]
    fn test_composite_first_non_give_up_wins() {
        let composite = CompositeStrategy::new(vec![
            Box::new(RetryWithBackoff::new(Duration::ZERO, Duration::ZERO).with_max_retries(1)),
            Box::new(DegradeGracefully::new()),
        ]);
        let state = StateMap::new();

        // Attempt 0: backoff still has retries left, so it wins.
        assert!(matches!(
            composite.handle(&step_error(), &state, 0),
            RecoveryDecision::Retry { .. }
        ));
        // Attempt 1: backoff gives up, degrade takes over... but degrade
        // only acts on attempt 0, so the whole chain gives up.
        assert_eq!(
            composite.handle(&step_error(), &state, 1),
            RecoveryDecision::GiveUp
        );

        let composite = CompositeStrategy::new(vec![
            Box::new(RetryWithBackoff::new(Duration::ZERO, Duration::ZERO).with_max_retries(0)),
            Box::new(DegradeGracefully::new()),
        ]);
        assert!(matches!(
            composite.handle(&step_error(), &state, 0),
            RecoveryDecision::Fallback { .. }
        ));
    }
}
