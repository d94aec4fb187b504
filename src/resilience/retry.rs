use crate::error::ErrorCategory;
use crate::resilience::classifier::ErrorClassifier;
use crate::resilience::timeout::with_timeout;
use crate::Result;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Maximum jitter as percentage of delay
    pub jitter: f64,
    /// Timeout for individual attempts
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1, // 10% jitter
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create config for fast retries (short text completions)
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 1.5,
            jitter: 0.1,
            attempt_timeout: Duration::from_secs(15),
        }
    }

    /// Create config for slow retries (image generation and other long calls)
    #[must_use]
    pub const fn patient() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            attempt_timeout: Duration::from_secs(120),
        }
    }

    /// Single attempt, no retry
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Named retry profile chosen per call site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicyKind {
    #[default]
    Standard,
    Fast,
    Patient,
    None,
}

/// Retry configs for each [`RetryPolicyKind`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    standard: RetryConfig,
    fast: RetryConfig,
    patient: RetryConfig,
    none: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            standard: RetryConfig::default(),
            fast: RetryConfig::fast(),
            patient: RetryConfig::patient(),
            none: RetryConfig::none(),
        }
    }
}

impl RetryPolicy {
    /// Use the same config for every kind except `None`
    #[must_use]
    pub fn uniform(config: RetryConfig) -> Self {
        Self {
            standard: config.clone(),
            fast: config.clone(),
            patient: config,
            none: RetryConfig::none(),
        }
    }

    /// Replace the config used for one kind
    #[must_use]
    pub fn with(mut self, kind: RetryPolicyKind, config: RetryConfig) -> Self {
        *self.slot(kind) = config;
        self
    }

    #[must_use]
    pub const fn config_for(&self, kind: RetryPolicyKind) -> &RetryConfig {
        match kind {
            RetryPolicyKind::Standard => &self.standard,
            RetryPolicyKind::Fast => &self.fast,
            RetryPolicyKind::Patient => &self.patient,
            RetryPolicyKind::None => &self.none,
        }
    }

    fn slot(&mut self, kind: RetryPolicyKind) -> &mut RetryConfig {
        match kind {
            RetryPolicyKind::Standard => &mut self.standard,
            RetryPolicyKind::Fast => &mut self.fast,
            RetryPolicyKind::Patient => &mut self.patient,
            RetryPolicyKind::None => &mut self.none,
        }
    }
}

/// Execute an operation, retrying transient failures.
///
/// Rate-limit, persistent and fatal errors are returned after the first
/// attempt: they say something about the key or the configuration, and
/// hammering the same key will not help.
pub async fn retry_with_config<T, F, Fut>(
    operation: F,
    config: &RetryConfig,
    classifier: &dyn ErrorClassifier,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        debug!(
            "Executing operation '{}' (attempt {})",
            operation_name, attempt
        );

        let result = with_timeout(operation(), config.attempt_timeout)
            .await
            .and_then(|inner| inner);

        let error = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        operation_name, attempt
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let category = classifier.classify(&error);
        if category != ErrorCategory::Transient {
            debug!(
                "Operation '{}' failed with non-retryable error ({:?}): {}",
                operation_name, category, error
            );
            return Err(error);
        }

        if attempt >= config.max_attempts {
            warn!(
                "Operation '{}' failed after {} attempts: {}",
                operation_name, attempt, error
            );
            return Err(error);
        }

        let delay = calculate_delay(attempt - 1, config);
        debug!(
            "Operation '{}' failed (attempt {}), retrying after {:?}: {}",
            operation_name, attempt, delay, error
        );

        sleep(delay).await;
        attempt += 1;
    }
}

/// Calculate delay for retry attempt
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]
fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay_ms = config.initial_delay.as_millis() as f64;
    let exponential_delay_ms = base_delay_ms * config.multiplier.powi(attempt as i32);
    let capped_delay_ms = exponential_delay_ms.min(config.max_delay.as_millis() as f64);
    let delay = Duration::from_millis(capped_delay_ms as u64);

    // Add jitter to prevent thundering herd
    add_jitter(delay, config.jitter)
}

/// Add jitter to delay
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn add_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return delay;
    }

    use rand::Rng;
    let mut rng = rand::thread_rng();
    let jitter_ms = (delay.as_millis() as f64 * jitter_factor) as u64;
    let jitter = rng.gen_range(0..=jitter_ms);

    delay + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::classifier::DefaultClassifier;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn retry<T, F, Fut>(operation: F, operation_name: &str) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_config(
            operation,
            &RetryConfig::default(),
            &DefaultClassifier,
            operation_name,
        )
        .await
    }

    fn unavailable() -> Error {
        Error::ServiceUnavailable {
            service: "test".to_string(),
            reason: "temporary failure".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let result = retry(|| async { Ok::<u32, Error>(42) }, "test_operation").await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(
            move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(unavailable())
                    } else {
                        Ok(42u32)
                    }
                }
            },
            "test_operation",
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_permanent_error_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(
            move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<u32, Error>(Error::AuthenticationFailed("bad key".to_string()))
                }
            },
            "test_operation",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1); // Should not retry
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried_on_same_key() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry(
            move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<u32, Error>(Error::Provider {
                        status: Some(429),
                        message: "slow down".to_string(),
                    })
                }
            },
            "test_operation",
        )
        .await;

        assert!(matches!(result, Err(Error::Provider { status: Some(429), .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let config = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };

        let result = retry_with_config(
            move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async move { Err::<u32, Error>(unavailable()) }
            },
            &config,
            &DefaultClassifier,
            "test_operation",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2); // Should try exactly max_attempts times
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let config = RetryConfig {
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(50),
            ..RetryConfig::fast()
        };

        let result = retry_with_config(
            move || {
                let count = counter_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count == 0 {
                        sleep(Duration::from_secs(10)).await;
                    }
                    Ok::<u32, Error>(7)
                }
            },
            &config,
            &DefaultClassifier,
            "test_operation",
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_jitter_calculation() {
        let delay = Duration::from_millis(1000);
        let jittered = add_jitter(delay, 0.1);

        // Jittered delay should be between 1000ms and 1100ms
        assert!(jittered >= delay);
        assert!(jittered <= delay + Duration::from_millis(100));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: 0.0,
            ..Default::default()
        };

        assert_eq!(calculate_delay(0, &config), Duration::from_secs(1));
        assert_eq!(calculate_delay(1, &config), Duration::from_secs(2));
        assert_eq!(calculate_delay(5, &config), Duration::from_secs(4));
    }

    #[test]
    fn test_policy_kinds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.config_for(RetryPolicyKind::None).max_attempts, 1);
        assert_eq!(
            policy.config_for(RetryPolicyKind::Patient),
            &RetryConfig::patient()
        );

        let policy = RetryPolicy::uniform(RetryConfig::fast())
            .with(RetryPolicyKind::Standard, RetryConfig::patient());
        assert_eq!(
            policy.config_for(RetryPolicyKind::Standard),
            &RetryConfig::patient()
        );
        assert_eq!(policy.config_for(RetryPolicyKind::Fast), &RetryConfig::fast());
        assert_eq!(policy.config_for(RetryPolicyKind::None).max_attempts, 1);
    }
}
