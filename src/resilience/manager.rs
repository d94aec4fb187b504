use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Overall status across every registered breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    /// At least 80% of breakers are closed
    Healthy,
    /// At least 50% of breakers are closed
    Degraded,
    /// Fewer than half of the breakers are closed
    Critical,
}

impl OverallStatus {
    /// Classify a `healthy / total` ratio. An empty registry is healthy.
    #[must_use]
    pub const fn classify(healthy: usize, total: usize) -> Self {
        if total == 0 || healthy * 10 >= total * 8 {
            Self::Healthy
        } else if healthy * 2 >= total {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

/// Aggregated breaker health, backing the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub healthy: usize,
    pub total: usize,
    pub unhealthy_names: Vec<String>,
    pub overall_status: OverallStatus,
}

/// Registry of named circuit breakers, one per external dependency
#[derive(Debug)]
pub struct CircuitBreakerManager {
    circuit_breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    /// Create a manager whose breakers default to
    /// [`CircuitBreakerConfig::default`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a manager with a custom default breaker config
    #[must_use]
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            circuit_breakers: RwLock::new(HashMap::new()),
            default_config: config,
        }
    }

    /// Get the breaker for `name`, creating it with `config` (or the
    /// manager default) on first use. Later configs for an existing name
    /// are ignored.
    pub async fn get_breaker(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.circuit_breakers.read().await.get(name) {
            return breaker.clone();
        }

        let mut breakers = self.circuit_breakers.write().await;
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Creating new circuit breaker for service: {}", name);
                Arc::new(CircuitBreaker::new(
                    name,
                    config.unwrap_or_else(|| self.default_config.clone()),
                ))
            })
            .clone()
    }

    /// Registered breaker names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.circuit_breakers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get detailed stats for all circuit breakers
    pub async fn get_all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let breakers = self.circuit_breakers.read().await;
        breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats()))
            .collect()
    }

    /// Reset all circuit breakers
    pub async fn reset_all(&self) {
        let breakers = self.circuit_breakers.read().await;

        for (service_name, breaker) in breakers.iter() {
            breaker.reset();
            info!("Reset circuit breaker for service: {}", service_name);
        }
    }

    /// Reset a specific circuit breaker
    pub async fn reset(&self, name: &str) -> Result<()> {
        let breaker = self.lookup(name).await?;
        breaker.reset();
        Ok(())
    }

    /// Force a circuit breaker to open (for testing or maintenance)
    pub async fn force_open(&self, name: &str) -> Result<()> {
        let breaker = self.lookup(name).await?;
        breaker.force_open();
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Arc<CircuitBreaker>> {
        self.circuit_breakers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| {
                warn!("Circuit breaker not found for service: {}", name);
                Error::UnknownBreaker {
                    name: name.to_string(),
                }
            })
    }

    /// Summarize breaker health. Reads state only, never mutates.
    pub async fn get_system_health(&self) -> SystemHealth {
        let breakers = self.circuit_breakers.read().await;
        let total = breakers.len();

        let mut unhealthy_names: Vec<String> = breakers
            .iter()
            .filter(|(_, breaker)| breaker.state() != CircuitState::Closed)
            .map(|(name, _)| name.clone())
            .collect();
        unhealthy_names.sort();

        let healthy = total - unhealthy_names.len();

        SystemHealth {
            healthy,
            total,
            unhealthy_names,
            overall_status: OverallStatus::classify(healthy, total),
        }
    }
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new()
    }
}
