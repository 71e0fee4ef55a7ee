//! # Retry executor
//! Bounded, fixed-delay retries around a single upstream call.
//!
//! Upstream clients translate transport errors into an [`UpstreamFailure`]
//! so the policy only ever sees a failure kind and an optional status code.
//! Classification decides whether a failure is worth another attempt; the
//! executor always hands back a structured [`FinalFailure`] once it gives up.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;

use crate::config::{ConfigError, RetrySettings};

/// Coarse failure classes an upstream call can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connect or response timeout.
    Timeout,
    /// 503-style responses.
    ServerUnavailable,
    /// 4xx responses.
    ClientError,
    /// Anything else: other 5xx, decode errors, refused connections.
    Unknown,
}

impl FailureKind {
    /// Kind for a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            503 => FailureKind::ServerUnavailable,
            400..=499 => FailureKind::ClientError,
            _ => FailureKind::Unknown,
        }
    }
}

/// One failed upstream attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub cause: String,
}

impl UpstreamFailure {
    pub fn new(kind: FailureKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            cause: cause.into(),
        }
    }

    pub fn timeout(cause: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, cause)
    }

    pub fn status(status: u16, cause: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::from_status(status),
            status: Some(status),
            cause: cause.into(),
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{:?} ({code}): {}", self.kind, self.cause),
            None => write!(f, "{:?}: {}", self.kind, self.cause),
        }
    }
}

/// Outcome of a single upstream call.
pub type CallOutcome<T> = Result<T, UpstreamFailure>;

/// Returned when the executor gives up on an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream call failed after {attempts} attempt(s): {kind:?}, status {status:?}: {cause}")]
pub struct FinalFailure {
    pub kind: FailureKind,
    /// Present only when the last failure carried an HTTP status.
    pub status: Option<u16>,
    pub cause: String,
    pub attempts: u32,
}

impl FinalFailure {
    /// Final verdict built from the last attempt's failure.
    pub fn from_last(failure: UpstreamFailure, attempts: u32) -> Self {
        Self {
            kind: failure.kind,
            status: failure.status,
            cause: failure.cause,
            attempts,
        }
    }

    /// A fill that died without producing an outcome (panic or abort).
    pub fn aborted(cause: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Unknown,
            status: None,
            cause: cause.into(),
            attempts: 0,
        }
    }
}

/// Decides whether a failed attempt may be retried.
pub type Classifier = Arc<dyn Fn(&UpstreamFailure) -> bool + Send + Sync>;

/// Timeouts and statuses in `transient` are retryable; everything else is terminal.
pub fn transient_classifier(transient: impl IntoIterator<Item = u16>) -> Classifier {
    let transient: HashSet<u16> = transient.into_iter().collect();
    Arc::new(move |failure: &UpstreamFailure| {
        failure.kind == FailureKind::Timeout
            || failure.status.is_some_and(|s| transient.contains(&s))
    })
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    classifier: Classifier,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// `max_attempts` counts every call, the first one included. Defaults to
    /// retrying timeouts and 503 only.
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            delay,
            classifier: transient_classifier([503]),
        })
    }

    pub fn from_settings(s: &RetrySettings) -> Result<Self, ConfigError> {
        Ok(Self::new(s.max_attempts, Duration::from_millis(s.delay_ms))?
            .with_classifier(transient_classifier(s.transient_statuses.iter().copied())))
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_retryable(&self, failure: &UpstreamFailure) -> bool {
        (self.classifier)(failure)
    }
}

/// Runs upstream operations under a shared [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: Arc<RetryPolicy>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `operation` until it succeeds, fails terminally, or the attempt
    /// budget runs out.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, FinalFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("upstream_attempts_total").increment(1);

            let failure = match operation().await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            let retryable = self.policy.is_retryable(&failure);
            tracing::warn!(
                target: "upstream",
                attempt,
                max_attempts = self.policy.max_attempts,
                retryable,
                kind = ?failure.kind,
                status = ?failure.status,
                cause = %failure.cause,
                "upstream call failed"
            );

            if !retryable || attempt >= self.policy.max_attempts {
                counter!("upstream_failures_total").increment(1);
                return Err(FinalFailure::from_last(failure, attempt));
            }

            counter!("upstream_retries_total").increment(1);
            tokio::time::sleep(self.policy.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::new(attempts, Duration::ZERO).unwrap())
    }

    #[test]
    fn zero_attempts_is_a_config_error() {
        assert!(RetryPolicy::new(0, Duration::ZERO).is_err());
    }

    #[test]
    fn default_classifier_retries_timeouts_and_503_only() {
        let p = RetryPolicy::new(3, Duration::ZERO).unwrap();
        assert!(p.is_retryable(&UpstreamFailure::timeout("read timed out")));
        assert!(p.is_retryable(&UpstreamFailure::status(503, "unavailable")));
        assert!(!p.is_retryable(&UpstreamFailure::status(500, "boom")));
        assert!(!p.is_retryable(&UpstreamFailure::status(404, "missing")));
        assert!(!p.is_retryable(&UpstreamFailure::new(FailureKind::Unknown, "decode")));
    }

    #[tokio::test]
    async fn exhaustion_carries_last_status_and_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = executor(2)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamFailure::status(503, "still down")) }
            })
            .await;

        let err = res.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.attempts, 2);
        assert_eq!(err.status, Some(503));
        assert_eq!(err.kind, FailureKind::ServerUnavailable);
    }

    #[tokio::test]
    async fn timeout_exhaustion_has_no_status() {
        let res: Result<(), _> = executor(2)
            .execute(|| async { Err(UpstreamFailure::timeout("connect timed out")) })
            .await;
        let err = res.unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout);
        assert_eq!(err.status, None);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_delay_between_attempts() {
        let exec = RetryExecutor::new(RetryPolicy::new(3, Duration::from_secs(2)).unwrap());
        let start = tokio::time::Instant::now();
        let _: Result<(), _> = exec
            .execute(|| async { Err(UpstreamFailure::timeout("slow")) })
            .await;
        // two sleeps between three attempts, not exponential
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(4) && waited < Duration::from_secs(5));
    }
}
