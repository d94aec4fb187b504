pub mod api_key;
pub mod health;
pub mod probe;
pub mod registry;

pub use api_key::{ApiKey, KeyId, KeySource};
pub use health::{ApiKeyHealth, KeyPoolSettings};
pub use probe::{HttpKeyProbe, KeyProbe, DEFAULT_KEY_HEADER};
pub use registry::{HealthCheckReport, KeyHealthRegistry};
