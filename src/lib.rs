pub mod app;
pub mod caller;
pub mod config;
pub mod error;
pub mod keys;
pub mod resilience;
pub mod server;
pub mod telemetry;

pub use crate::app::App;
pub use crate::caller::ResilientCaller;
pub use crate::config::{Config, LogFormat, LoggingConfig};
pub use crate::error::{Error, ErrorCategory, Result};
pub use crate::keys::{ApiKey, ApiKeyHealth, HttpKeyProbe, KeyHealthRegistry, KeyId, KeyProbe, KeySource};
pub use crate::resilience::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerManager, CircuitState,
    DegradeReason, ErrorClassifier, OverallStatus, RetryConfig, RetryPolicy, RetryPolicyKind,
    SystemHealth,
};
pub use crate::server::{Server, StatusServer};
