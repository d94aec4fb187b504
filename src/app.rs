//! Composition root: builds the shared breaker manager, key registry and
//! caller from one [`Config`].

use crate::caller::ResilientCaller;
use crate::config::Config;
use crate::keys::{HttpKeyProbe, KeyHealthRegistry, KeyProbe, KeySource};
use crate::resilience::{CircuitBreakerManager, ErrorClassifier, PatternClassifier};
use crate::server::AppState;
use crate::Result;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct App {
    config: Arc<Config>,
    manager: Arc<CircuitBreakerManager>,
    keys: Arc<KeyHealthRegistry>,
    caller: ResilientCaller,
}

impl App {
    /// Build from `config`, reading keys from the configured environment
    /// variables
    pub fn from_config(config: Config) -> Result<Self> {
        let source = config.key_source();
        Self::with_key_source(config, &source)
    }

    /// Build with an explicit key source
    pub fn with_key_source(config: Config, source: &KeySource) -> Result<Self> {
        config.validate()?;

        let classifier = Self::classifier(&config)?;
        let keys = Arc::new(KeyHealthRegistry::load(
            source,
            config.key_pool_settings(),
            classifier,
        )?);
        let manager = Arc::new(CircuitBreakerManager::with_config(config.breaker_config()));
        let caller = ResilientCaller::new(keys.clone())
            .with_max_key_attempts(config.keys.max_key_attempts)
            .with_key_rotation_delay(config.key_rotation_delay());

        info!(
            keys = keys.len(),
            max_key_attempts = caller.max_key_attempts(),
            "Resilience core initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            manager,
            keys,
            caller,
        })
    }

    fn classifier(config: &Config) -> Result<Arc<dyn ErrorClassifier>> {
        let classifier = match &config.keys.rate_limit_pattern {
            Some(pattern) => PatternClassifier::new(pattern)?,
            None => PatternClassifier::default(),
        };
        Ok(Arc::new(classifier))
    }

    /// Probe used by the active key health check
    pub fn key_probe(&self) -> Result<Arc<dyn KeyProbe>> {
        let probe = HttpKeyProbe::new(&self.config.probe.url, self.config.probe_timeout())?;
        Ok(Arc::new(probe))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn manager(&self) -> &Arc<CircuitBreakerManager> {
        &self.manager
    }

    #[must_use]
    pub const fn keys(&self) -> &Arc<KeyHealthRegistry> {
        &self.keys
    }

    #[must_use]
    pub const fn caller(&self) -> &ResilientCaller {
        &self.caller
    }

    #[must_use]
    pub fn status_state(&self) -> AppState {
        AppState {
            manager: self.manager.clone(),
            keys: self.keys.clone(),
        }
    }
}
