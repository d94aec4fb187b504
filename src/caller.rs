//! Two-level resilient calls: retry transient failures on one key, then
//! rotate to another key.

use crate::error::ErrorCategory;
use crate::keys::{ApiKey, KeyHealthRegistry};
use crate::resilience::circuit_breaker::{CallOutcome, CircuitBreaker};
use crate::resilience::retry::{retry_with_config, RetryPolicy, RetryPolicyKind};
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Runs provider calls against a shared key pool
#[derive(Debug, Clone)]
pub struct ResilientCaller {
    keys: Arc<KeyHealthRegistry>,
    retry_policy: RetryPolicy,
    max_key_attempts: u32,
    key_rotation_delay: Duration,
}

impl ResilientCaller {
    pub fn new(keys: Arc<KeyHealthRegistry>) -> Self {
        Self {
            keys,
            retry_policy: RetryPolicy::default(),
            max_key_attempts: 3,
            key_rotation_delay: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Number of keys tried before giving up; clamped to at least one
    #[must_use]
    pub fn with_max_key_attempts(mut self, attempts: u32) -> Self {
        self.max_key_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub const fn with_key_rotation_delay(mut self, delay: Duration) -> Self {
        self.key_rotation_delay = delay;
        self
    }

    #[must_use]
    pub const fn keys(&self) -> &Arc<KeyHealthRegistry> {
        &self.keys
    }

    #[must_use]
    pub const fn max_key_attempts(&self) -> u32 {
        self.max_key_attempts
    }

    /// Run `operation` with a healthy key.
    ///
    /// Each key attempt gets the retry policy for `kind`. A failed attempt
    /// is recorded against its key, and the next attempt starts after
    /// `key_rotation_delay` with whatever key the registry picks. When the
    /// last attempt fails the result is [`Error::ProviderExhausted`] wrapping
    /// the last provider error. Fatal errors are returned immediately.
    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        kind: RetryPolicyKind,
        operation: F,
    ) -> Result<T>
    where
        F: Fn(ApiKey) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry_config = self.retry_policy.config_for(kind);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let key = self.keys.get_healthy_key();
            debug!(
                operation = operation_name,
                key_id = %key.id(),
                attempt,
                "Starting key attempt"
            );

            let result = retry_with_config(
                || operation(key.clone()),
                retry_config,
                self.keys.classifier(),
                operation_name,
            )
            .await;

            let error = match result {
                Ok(value) => {
                    self.keys.record_success(&key);
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            key_id = %key.id(),
                            attempt,
                            "Operation succeeded after key rotation"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            self.keys.record_failure(&key, &error);

            if self.keys.classifier().classify(&error) == ErrorCategory::Fatal {
                warn!(operation = operation_name, "Operation aborted on fatal error: {}", error);
                return Err(error);
            }

            if attempt >= self.max_key_attempts {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    "Operation failed on every key attempt: {}", error
                );
                return Err(Error::ProviderExhausted {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            debug!(
                operation = operation_name,
                key_id = %key.id(),
                delay = ?self.key_rotation_delay,
                "Key attempt failed, rotating: {}", error
            );
            sleep(self.key_rotation_delay).await;
        }
    }

    /// [`Self::execute`] behind a circuit breaker, degrading to `fallback`
    /// when the breaker is open or every key attempt failed.
    pub async fn execute_guarded<T, F, Fut, FB, FbFut>(
        &self,
        breaker: &CircuitBreaker,
        operation_name: &str,
        kind: RetryPolicyKind,
        operation: F,
        fallback: FB,
    ) -> CallOutcome<T>
    where
        F: Fn(ApiKey) -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = T>,
    {
        breaker
            .execute(|| self.execute(operation_name, kind, operation), fallback)
            .await
    }
}
