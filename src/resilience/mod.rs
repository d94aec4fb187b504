pub mod circuit_breaker;
pub mod classifier;
pub mod manager;
pub mod retry;
pub mod timeout;


pub use circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    DegradeReason,
};
pub use classifier::{DefaultClassifier, ErrorClassifier, PatternClassifier};
pub use manager::{CircuitBreakerManager, OverallStatus, SystemHealth};
pub use retry::{retry_with_config, RetryConfig, RetryPolicy, RetryPolicyKind};
pub use timeout::with_timeout;
