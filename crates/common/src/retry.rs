//! Retry engine for outbound calls
//!
//! One loop serves every retry flavour. A policy decides three things:
//! - how long to wait between attempts (fixed delay or capped exponential
//!   backoff with optional ±25% jitter)
//! - what counts as success (status not in the retryable set, an exact
//!   target status, or a caller predicate over status and body)
//! - an optional body check ANDed with the status condition
//!
//! The overall timeout is only checked at attempt boundaries; an in-flight
//! call is never interrupted.

use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::CallResult;

/// Statuses retried when a policy does not override them.
/// 0 is the synthetic "no response" status.
pub const DEFAULT_RETRYABLE_STATUSES: &[u16] = &[
    0, 408, 429, 500, 501, 502, 503, 504, 505, 507, 508, 509, 510, 511,
];

/// Lower bound on a jittered sleep
pub const MIN_JITTERED_DELAY: Duration = Duration::from_millis(100);

/// Jitter spread as a fraction of the computed delay
const JITTER_FRACTION: f64 = 0.25;

/// Success test over `(status, body)`
pub type StatusPredicate = Arc<dyn Fn(u16, &Value) -> bool + Send + Sync>;

/// Extra success test over the body alone
pub type BodyPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Source of blocking waits between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested sleeps without waiting
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

/// Wait strategy between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: bool,
    },
}

/// What ends the retry loop early
#[derive(Clone)]
pub enum SuccessCondition {
    /// Any status outside the policy's retryable set
    NotRetryable,
    /// Exactly this status
    UntilStatus(u16),
    /// Caller predicate; the retryable set is ignored
    Custom(StatusPredicate),
}

impl fmt::Debug for SuccessCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessCondition::NotRetryable => write!(f, "NotRetryable"),
            SuccessCondition::UntilStatus(status) => write!(f, "UntilStatus({})", status),
            SuccessCondition::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Retry configuration for one logical call
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Overall budget, checked before each attempt
    pub timeout: Option<Duration>,
    pub retry_on: BTreeSet<u16>,
    pub condition: SuccessCondition,
    pub body_check: Option<BodyPredicate>,
    /// Label used in progress logs
    pub description: String,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("timeout", &self.timeout)
            .field("retry_on", &self.retry_on)
            .field("condition", &self.condition)
            .field("body_check", &self.body_check.is_some())
            .field("description", &self.description)
            .finish()
    }
}

impl RetryPolicy {
    fn with_backoff(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
            timeout: None,
            retry_on: DEFAULT_RETRYABLE_STATUSES.iter().copied().collect(),
            condition: SuccessCondition::NotRetryable,
            body_check: None,
            description: "API call".to_string(),
        }
    }

    /// Fixed delay between attempts
    pub fn linear(max_attempts: u32, delay: Duration) -> Self {
        Self::with_backoff(max_attempts, Backoff::Fixed(delay))
    }

    /// Delay grows by `multiplier` after every failed attempt, capped at `max`
    pub fn exponential(
        max_attempts: u32,
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: bool,
    ) -> Self {
        Self::with_backoff(
            max_attempts,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
                jitter,
            },
        )
    }

    /// Retry until the response carries `target`
    pub fn until_status(target: u16, max_attempts: u32, delay: Duration) -> Self {
        Self::linear(max_attempts, delay).with_condition(SuccessCondition::UntilStatus(target))
    }

    /// Retry until `predicate(status, body)` holds
    pub fn until<F>(predicate: F, max_attempts: u32, delay: Duration) -> Self
    where
        F: Fn(u16, &Value) -> bool + Send + Sync + 'static,
    {
        Self::linear(max_attempts, delay).with_condition(SuccessCondition::Custom(Arc::new(predicate)))
    }

    pub fn with_condition(mut self, condition: SuccessCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the retryable status set
    pub fn retry_on<I: IntoIterator<Item = u16>>(mut self, statuses: I) -> Self {
        self.retry_on = statuses.into_iter().collect();
        self
    }

    /// Require the body to satisfy `check` on top of the status condition
    pub fn with_body_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.body_check = Some(Arc::new(check));
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if let Backoff::Exponential {
            initial,
            max,
            multiplier,
            ..
        } = &self.backoff
        {
            if !multiplier.is_finite() || *multiplier < 1.0 {
                return Err(Error::InvalidConfig(format!(
                    "backoff multiplier must be >= 1.0, got {}",
                    multiplier
                )));
            }
            if initial > max {
                return Err(Error::InvalidConfig(format!(
                    "initial delay {:?} exceeds max delay {:?}",
                    initial, max
                )));
            }
        }
        Ok(())
    }

    /// Whether `(status, body)` ends the loop
    pub fn is_success(&self, status: u16, body: &Value) -> bool {
        let status_ok = match &self.condition {
            SuccessCondition::NotRetryable => !self.retry_on.contains(&status),
            SuccessCondition::UntilStatus(target) => status == *target,
            SuccessCondition::Custom(predicate) => predicate(status, body),
        };
        status_ok && self.body_check.as_ref().map_or(true, |check| check(body))
    }

    /// Un-jittered wait after the failed attempt with 0-based index `k`
    pub fn base_delay(&self, k: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
                ..
            } => {
                let grown = initial.as_secs_f64() * multiplier.powi(k.min(i32::MAX as u32) as i32);
                let capped = grown.min(max.as_secs_f64());
                Duration::from_secs_f64(capped.max(0.0))
            }
        }
    }

    /// Un-jittered waits between consecutive attempts
    pub fn delay_schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|k| self.base_delay(k))
            .collect()
    }

    /// Actual wait after attempt `k`, jitter applied
    fn sleep_for(&self, k: u32) -> Duration {
        let delay = self.base_delay(k);
        match self.backoff {
            Backoff::Exponential { jitter: true, .. } => jittered(delay),
            _ => delay,
        }
    }
}

/// `delay` ± 25% drawn uniformly, floored at [`MIN_JITTERED_DELAY`]
pub fn jittered(delay: Duration) -> Duration {
    let secs = delay.as_secs_f64();
    let spread = secs * JITTER_FRACTION;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((secs + offset).max(MIN_JITTERED_DELAY.as_secs_f64()))
}

/// A call that raised instead of returning a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    /// Error type name, e.g. `Timeout`
    pub kind: String,
    pub message: String,
}

impl CallFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Runs a call under a [`RetryPolicy`]
pub struct RetryEngine {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            sleeper: Arc::new(ThreadSleeper),
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `call` (given the 1-based attempt number) until the policy is
    /// satisfied, attempts run out, or the timeout budget is spent.
    ///
    /// Failures from `call` become status-0 results and are always retried.
    pub fn execute<F>(&self, mut call: F) -> CallResult
    where
        F: FnMut(u32) -> std::result::Result<CallResult, CallFailure>,
    {
        let policy = &self.policy;
        let description = policy.description.as_str();
        let start = Instant::now();
        let mut attempt = 1;

        loop {
            if let Some(budget) = policy.timeout {
                let elapsed = start.elapsed();
                if elapsed > budget {
                    warn!(
                        "{} timed out after {:.1}s (budget {:.1}s)",
                        description,
                        elapsed.as_secs_f64(),
                        budget.as_secs_f64()
                    );
                    return CallResult::budget_exhausted(elapsed.as_secs_f64());
                }
            }

            let result = match call(attempt) {
                Ok(result) => result,
                Err(failure) => {
                    warn!("{} attempt {} failed with {}", description, attempt, failure);
                    CallResult::transport_failure(None, &failure.kind, &failure.message, Some(attempt))
                }
            };

            let body = result.body.to_value();
            if !result.is_transport_failure() && policy.is_success(result.status, &body) {
                if attempt > 1 {
                    info!(
                        "{} succeeded on attempt {} after {:.1}s",
                        description,
                        attempt,
                        start.elapsed().as_secs_f64()
                    );
                }
                return result;
            }

            if attempt >= policy.max_attempts {
                if policy.max_attempts > 1 {
                    warn!(
                        "{} failed after {} attempts (final status: {})",
                        description, policy.max_attempts, result.status
                    );
                }
                return result;
            }

            let delay = policy.sleep_for(attempt - 1);
            debug!(
                "{} attempt {} not satisfied (status: {}). Retrying in {:.2}s",
                description,
                attempt,
                result.status,
                delay.as_secs_f64()
            );
            self.sleeper.sleep(delay);
            attempt += 1;
        }
    }

    /// [`execute`](Self::execute) for calls that never fail outright
    pub fn execute_infallible<F>(&self, mut call: F) -> CallResult
    where
        F: FnMut(u32) -> CallResult,
    {
        self.execute(|attempt| Ok(call(attempt)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HeaderMap, ResponseBody, TransportKind};
    use serde_json::json;

    fn response(status: u16, body: Value) -> CallResult {
        CallResult::new(status, HeaderMap::new(), ResponseBody::Json(body), TransportKind::Mock)
    }

    /// Fails `failures` times with 503, then answers 200
    fn flaky(failures: u32) -> impl FnMut(u32) -> CallResult {
        let mut calls = 0;
        move |_| {
            calls += 1;
            if calls <= failures {
                response(503, json!({ "status": "Running" }))
            } else {
                response(200, json!({ "status": "Successful", "message": "Service ready" }))
            }
        }
    }

    fn engine_with_sleeper(policy: RetryPolicy) -> (RetryEngine, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let engine = RetryEngine::new(policy).unwrap().with_sleeper(sleeper.clone());
        (engine, sleeper)
    }

    #[test]
    fn test_single_attempt_never_sleeps() {
        let (engine, sleeper) = engine_with_sleeper(RetryPolicy::linear(1, Duration::from_secs(5)));
        let result = engine.execute_infallible(flaky(3));
        assert_eq!(result.status, 503);
        assert!(sleeper.sleeps().is_empty());

        let (engine, sleeper) = engine_with_sleeper(RetryPolicy::linear(1, Duration::from_secs(5)));
        let result = engine.execute_infallible(flaky(0));
        assert_eq!(result.status, 200);
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn test_enough_attempts_reach_success() {
        for n in 1..4 {
            let policy = RetryPolicy::linear(n + 1, Duration::from_millis(500)).retry_on([503]);
            let (engine, sleeper) = engine_with_sleeper(policy);
            let (status, body) = engine.execute_infallible(flaky(n)).into_pair();
            assert_eq!(status, 200);
            assert_eq!(body["message"], "Service ready");
            assert_eq!(sleeper.sleeps().len(), n as usize);
        }
    }

    #[test]
    fn test_too_few_attempts_return_last_failure() {
        for n in 1..4 {
            let policy = RetryPolicy::linear(n, Duration::from_millis(500)).retry_on([503]);
            let (engine, _) = engine_with_sleeper(policy);
            assert_eq!(engine.execute_infallible(flaky(n)).status, 503);
        }
    }

    #[test]
    fn test_non_retryable_returns_without_delay() {
        let (engine, sleeper) = engine_with_sleeper(RetryPolicy::linear(5, Duration::from_secs(1)));
        let mut calls = 0;
        let result = engine.execute_infallible(|_| {
            calls += 1;
            response(401, json!({ "detail": "Invalid credentials" }))
        });
        assert_eq!(result.status, 401);
        assert_eq!(calls, 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[test]
    fn test_exponential_schedule() {
        let policy = RetryPolicy::exponential(
            8,
            Duration::from_millis(100),
            Duration::from_secs(2),
            2.0,
            false,
        );
        let schedule = policy.delay_schedule();
        assert_eq!(schedule.len(), 7);
        for (k, delay) in schedule.iter().enumerate() {
            let expected = (0.1 * 2f64.powi(k as i32)).min(2.0);
            assert!((delay.as_secs_f64() - expected).abs() < 1e-6, "k={} {:?}", k, delay);
            assert!(*delay <= Duration::from_secs(2));
        }
        assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_exponential_sleeps_follow_schedule_without_jitter() {
        let policy = RetryPolicy::exponential(4, Duration::from_millis(200), Duration::from_millis(500), 2.0, false);
        let expected = policy.delay_schedule();
        let (engine, sleeper) = engine_with_sleeper(policy);
        engine.execute_infallible(flaky(10));
        assert_eq!(sleeper.sleeps(), expected);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..200 {
            let d = jittered(Duration::from_secs(2));
            assert!(d >= Duration::from_millis(1500) && d <= Duration::from_millis(2500), "{:?}", d);
        }
        for _ in 0..50 {
            assert!(jittered(Duration::from_millis(20)) >= MIN_JITTERED_DELAY);
        }
    }

    #[test]
    fn test_call_failure_becomes_status_zero_and_retries() {
        let (engine, sleeper) = engine_with_sleeper(RetryPolicy::linear(3, Duration::from_millis(10)).retry_on([503]));
        let result = engine.execute(|attempt| {
            if attempt < 3 {
                Err(CallFailure::new("ConnectionRefused", "connection refused"))
            } else {
                Ok(response(200, json!({})))
            }
        });
        assert_eq!(result.status, 200);
        assert_eq!(sleeper.sleeps().len(), 2);

        let (engine, _) = engine_with_sleeper(RetryPolicy::linear(2, Duration::from_millis(10)));
        let (status, body) = engine
            .execute(|_| Err(CallFailure::new("Timeout", "timed out")))
            .into_pair();
        assert_eq!(status, 0);
        assert_eq!(body["exception_type"], "Timeout");
        assert_eq!(body["attempt"], 2);
    }

    #[test]
    fn test_until_status() {
        let (engine, _) = engine_with_sleeper(RetryPolicy::until_status(200, 5, Duration::from_millis(1)));
        let mut calls = 0;
        let result = engine.execute_infallible(|_| {
            calls += 1;
            // 404 is not in the retryable set, but the target wins
            response(if calls < 3 { 404 } else { 200 }, json!({}))
        });
        assert_eq!(result.status, 200);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_custom_predicate_overrides_status_set() {
        let policy = RetryPolicy::until(
            |status, body| status == 200 && body["status"] == "Successful",
            5,
            Duration::from_millis(1),
        );
        let (engine, _) = engine_with_sleeper(policy);
        let mut calls = 0;
        let result = engine.execute_infallible(|_| {
            calls += 1;
            let state = if calls < 4 { "Running" } else { "Successful" };
            response(200, json!({ "status": state }))
        });
        assert_eq!(calls, 4);
        assert_eq!(result.body.to_value()["status"], "Successful");
    }

    #[test]
    fn test_body_check_composes_with_status_set() {
        let policy = RetryPolicy::linear(5, Duration::from_millis(1))
            .retry_on([503])
            .with_body_check(|body| body["status"] != "Running");
        let (engine, _) = engine_with_sleeper(policy);
        let mut calls = 0;
        let result = engine.execute_infallible(|_| {
            calls += 1;
            match calls {
                1 => response(503, json!({ "status": "Running" })),
                2 => response(200, json!({ "status": "Running" })),
                _ => response(200, json!({ "status": "Done" })),
            }
        });
        assert_eq!(calls, 3);
        assert_eq!(result.status, 200);
    }

    #[test]
    fn test_timeout_budget_returns_synthetic_408() {
        let policy = RetryPolicy::linear(5, Duration::ZERO).with_timeout(Duration::from_millis(20));
        let (engine, _) = engine_with_sleeper(policy);
        let mut calls = 0;
        let result = engine.execute_infallible(|_| {
            calls += 1;
            std::thread::sleep(Duration::from_millis(30));
            response(503, json!({}))
        });
        assert_eq!(calls, 1);
        assert_eq!(result.status, 408);
        assert!(result.is_budget_exhausted());
        assert!(result.body.to_value()["elapsed_time"].as_f64().unwrap() >= 0.02);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryEngine::new(RetryPolicy::linear(0, Duration::ZERO)).is_err());
        let bad = RetryPolicy::exponential(3, Duration::from_secs(5), Duration::from_secs(1), 2.0, false);
        assert!(bad.validate().is_err());
        let shrinking = RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(5), 0.5, false);
        assert!(shrinking.validate().is_err());
    }
}
