//! Per-key health records.
//!
//! Decisions use the monotonic tokio clock; the wall-clock fields exist for
//! reporting only.

use super::api_key::KeyId;
use crate::error::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Thresholds that drive key disablement and recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPoolSettings {
    /// When false, every call uses the primary key
    pub fallback_enabled: bool,
    /// Start each key search after the last chosen key instead of at the primary
    pub key_rotation_enabled: bool,
    pub max_errors_before_disable: u32,
    /// Time after the last failure before a disabled key is tried again
    pub key_recovery_time: Duration,
    /// Cooldown applied to a rate-limited key when the provider gives no hint
    pub rate_limit_cooldown: Duration,
}

impl Default for KeyPoolSettings {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            key_rotation_enabled: true,
            max_errors_before_disable: 5,
            key_recovery_time: Duration::from_secs(300),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

/// Health snapshot for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyHealth {
    pub key_id: KeyId,
    /// Position in the configured list; 0 is the primary key
    pub position: usize,
    pub is_healthy: bool,
    pub error_count: u32,
    pub success_count: u64,
    pub total_requests: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub rate_limit_reset_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub(crate) struct KeyHealthState {
    record: ApiKeyHealth,
    failed_at: Option<Instant>,
    rate_limited_until: Option<Instant>,
}

impl KeyHealthState {
    pub(crate) const fn new(key_id: KeyId, position: usize) -> Self {
        Self {
            record: ApiKeyHealth {
                key_id,
                position,
                is_healthy: true,
                error_count: 0,
                success_count: 0,
                total_requests: 0,
                last_used: None,
                last_error: None,
                last_error_at: None,
                rate_limit_reset_time: None,
            },
            failed_at: None,
            rate_limited_until: None,
        }
    }

    /// Whether the key is inside an active rate-limit cooldown
    pub(crate) fn is_cooling_down(&mut self, now: Instant) -> bool {
        match self.rate_limited_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.rate_limited_until = None;
                self.record.rate_limit_reset_time = None;
                false
            }
            None => false,
        }
    }

    /// Usable if not cooling down and either healthy or past its recovery
    /// window. Crossing the recovery window re-enables the key.
    pub(crate) fn is_usable(&mut self, now: Instant, key_recovery_time: Duration) -> bool {
        if self.is_cooling_down(now) {
            return false;
        }
        if self.record.is_healthy {
            return true;
        }

        let recovered = self
            .failed_at
            .map_or(true, |failed_at| now.duration_since(failed_at) >= key_recovery_time);
        if recovered {
            self.record.is_healthy = true;
            self.record.error_count = 0;
            info!(
                key_id = %self.record.key_id,
                "API key re-enabled after recovery window"
            );
        }
        recovered
    }

    pub(crate) fn record_success(&mut self) {
        self.record.success_count += 1;
        self.record.total_requests += 1;
        self.record.is_healthy = true;
        // one success forgives one error, so a flapping key still trends
        // toward disablement
        self.record.error_count = self.record.error_count.saturating_sub(1);
        self.record.last_used = Some(Utc::now());
    }

    /// Returns true when this failure disabled the key
    pub(crate) fn record_failure(
        &mut self,
        category: ErrorCategory,
        message: String,
        cooldown: Duration,
        settings: &KeyPoolSettings,
    ) -> bool {
        let now = Instant::now();
        self.record.error_count += 1;
        self.record.total_requests += 1;
        self.record.last_used = Some(Utc::now());
        self.record.last_error = Some(message);
        self.record.last_error_at = Some(Utc::now());
        self.failed_at = Some(now);

        if category == ErrorCategory::RateLimited {
            self.start_cooldown(now, cooldown);
            return false;
        }

        if self.record.is_healthy && self.record.error_count >= settings.max_errors_before_disable {
            self.record.is_healthy = false;
            return true;
        }
        false
    }

    pub(crate) fn start_cooldown(&mut self, now: Instant, cooldown: Duration) {
        self.rate_limited_until = Some(now + cooldown);
        self.record.rate_limit_reset_time = chrono::Duration::from_std(cooldown)
            .ok()
            .map(|cooldown| Utc::now() + cooldown);
    }

    /// A successful active probe clears disablement without organic traffic
    pub(crate) fn record_probe_success(&mut self) -> bool {
        let was_disabled = !self.record.is_healthy;
        self.record.is_healthy = true;
        self.record.error_count = 0;
        self.failed_at = None;
        was_disabled
    }

    pub(crate) fn snapshot(&mut self, now: Instant) -> ApiKeyHealth {
        self.is_cooling_down(now);
        self.record.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> KeyHealthState {
        KeyHealthState::new(KeyId::from_secret("k"), 0)
    }

    fn fail(state: &mut KeyHealthState, category: ErrorCategory, settings: &KeyPoolSettings) -> bool {
        state.record_failure(
            category,
            "boom".to_string(),
            settings.rate_limit_cooldown,
            settings,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_after_max_errors() {
        let settings = KeyPoolSettings {
            max_errors_before_disable: 3,
            ..Default::default()
        };
        let mut state = state();

        assert!(!fail(&mut state, ErrorCategory::Persistent, &settings));
        assert!(!fail(&mut state, ErrorCategory::Transient, &settings));
        assert!(fail(&mut state, ErrorCategory::Persistent, &settings));

        let snapshot = state.snapshot(Instant::now());
        assert!(!snapshot.is_healthy);
        assert_eq!(snapshot.error_count, 3);
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_forgives_one_error() {
        let settings = KeyPoolSettings::default();
        let mut state = state();

        fail(&mut state, ErrorCategory::Persistent, &settings);
        fail(&mut state, ErrorCategory::Persistent, &settings);
        state.record_success();
        let snapshot = state.snapshot(Instant::now());
        assert_eq!(snapshot.error_count, 1);

        state.record_success();
        state.record_success();
        let snapshot = state.snapshot(Instant::now());
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(snapshot.success_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_cools_down_without_disabling() {
        let settings = KeyPoolSettings {
            max_errors_before_disable: 1,
            rate_limit_cooldown: Duration::from_secs(60),
            ..Default::default()
        };
        let mut state = state();

        assert!(!fail(&mut state, ErrorCategory::RateLimited, &settings));
        assert!(state.snapshot(Instant::now()).is_healthy);
        assert!(state.snapshot(Instant::now()).rate_limit_reset_time.is_some());
        assert!(!state.is_usable(Instant::now(), settings.key_recovery_time));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(state.is_usable(Instant::now(), settings.key_recovery_time));
        assert!(state.snapshot(Instant::now()).rate_limit_reset_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_window_re_enables() {
        let settings = KeyPoolSettings {
            max_errors_before_disable: 1,
            key_recovery_time: Duration::from_secs(300),
            ..Default::default()
        };
        let mut state = state();
        fail(&mut state, ErrorCategory::Persistent, &settings);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!state.is_usable(Instant::now(), settings.key_recovery_time));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(state.is_usable(Instant::now(), settings.key_recovery_time));
        let snapshot = state.snapshot(Instant::now());
        assert!(snapshot.is_healthy);
        assert_eq!(snapshot.error_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_clears_disablement() {
        let settings = KeyPoolSettings {
            max_errors_before_disable: 1,
            ..Default::default()
        };
        let mut state = state();
        fail(&mut state, ErrorCategory::Persistent, &settings);

        assert!(state.record_probe_success());
        assert!(!state.record_probe_success());
        assert!(state.is_usable(Instant::now(), settings.key_recovery_time));
    }
}
