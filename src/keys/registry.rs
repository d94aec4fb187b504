//! Health-aware selection across an ordered pool of interchangeable keys.

use super::api_key::{ApiKey, KeyId, KeySource};
use super::health::{ApiKeyHealth, KeyHealthState, KeyPoolSettings};
use super::probe::KeyProbe;
use crate::error::ErrorCategory;
use crate::resilience::classifier::ErrorClassifier;
use crate::resilience::timeout::with_timeout;
use crate::{Error, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct KeySlot {
    key: ApiKey,
    health: Mutex<KeyHealthState>,
}

impl KeySlot {
    fn health(&self) -> MutexGuard<'_, KeyHealthState> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of one active health-check pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthCheckReport {
    pub probed: usize,
    /// Keys that were disabled and came back through the probe
    pub recovered: Vec<KeyId>,
    pub failed: Vec<KeyId>,
    /// Keys skipped because they are inside a rate-limit cooldown
    pub skipped: usize,
}

/// One health record per key, shared by every caller of a provider
pub struct KeyHealthRegistry {
    slots: Vec<KeySlot>,
    settings: KeyPoolSettings,
    classifier: Arc<dyn ErrorClassifier>,
    cursor: AtomicUsize,
    check_in_flight: AtomicBool,
}

impl std::fmt::Debug for KeyHealthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHealthRegistry")
            .field("keys", &self.slots.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl KeyHealthRegistry {
    /// Resolve keys from `source`. No keys at all is a fatal startup error.
    pub fn load(
        source: &KeySource,
        settings: KeyPoolSettings,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self> {
        let keys = source.resolve().into_iter().map(ApiKey::new);
        Self::from_keys(keys, settings, classifier).map_err(|e| match e {
            Error::NoCredentials { .. } => Error::NoCredentials {
                source_hint: source.describe(),
            },
            other => other,
        })
    }

    /// Build from keys in priority order. Duplicate secrets collapse onto
    /// the first occurrence.
    pub fn from_keys<I>(
        keys: I,
        settings: KeyPoolSettings,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = ApiKey>,
    {
        let mut seen = HashSet::new();
        let slots: Vec<KeySlot> = keys
            .into_iter()
            .filter(|key| seen.insert(key.expose_secret().to_string()))
            .enumerate()
            .map(|(position, key)| KeySlot {
                health: Mutex::new(KeyHealthState::new(key.id().clone(), position)),
                key,
            })
            .collect();

        if slots.is_empty() {
            return Err(Error::NoCredentials {
                source_hint: "at least one API key".to_string(),
            });
        }

        info!(
            keys = slots.len(),
            fallback_enabled = settings.fallback_enabled,
            rotation_enabled = settings.key_rotation_enabled,
            "API key pool loaded"
        );

        Ok(Self {
            slots,
            settings,
            classifier,
            cursor: AtomicUsize::new(0),
            check_in_flight: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &KeyPoolSettings {
        &self.settings
    }

    #[must_use]
    pub fn classifier(&self) -> &dyn ErrorClassifier {
        self.classifier.as_ref()
    }

    #[must_use]
    pub fn primary(&self) -> &ApiKey {
        &self.slots[0].key
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ApiKey> {
        self.slots.iter().map(|slot| &slot.key)
    }

    fn slot(&self, key: &ApiKey) -> Option<&KeySlot> {
        self.slots
            .iter()
            .find(|slot| slot.key.expose_secret() == key.expose_secret())
    }

    /// Pick the key for the next call.
    ///
    /// Scans from the rotation cursor (or the primary when rotation is off)
    /// and returns the first usable key. When no key is usable the primary
    /// is returned anyway so the provider gets to report the real error.
    #[must_use]
    pub fn get_healthy_key(&self) -> ApiKey {
        if !self.settings.fallback_enabled {
            return self.primary().clone();
        }

        let n = self.slots.len();
        let start = if self.settings.key_rotation_enabled {
            self.cursor.load(Ordering::Relaxed) % n
        } else {
            0
        };
        let now = Instant::now();

        for offset in 0..n {
            let idx = (start + offset) % n;
            let slot = &self.slots[idx];
            if slot
                .health()
                .is_usable(now, self.settings.key_recovery_time)
            {
                if self.settings.key_rotation_enabled {
                    self.cursor.store((idx + 1) % n, Ordering::Relaxed);
                }
                if idx != 0 {
                    debug!(key_id = %slot.key.id(), position = idx, "Using fallback API key");
                }
                return slot.key.clone();
            }
        }

        warn!(
            keys = n,
            "No usable API key, falling back to the primary key"
        );
        self.primary().clone()
    }

    /// Whether `key` would be picked right now. Crossing the recovery window
    /// re-enables the key as a side effect.
    #[must_use]
    pub fn is_key_usable(&self, key: &ApiKey) -> bool {
        self.slot(key).map_or(false, |slot| {
            slot.health()
                .is_usable(Instant::now(), self.settings.key_recovery_time)
        })
    }

    pub fn record_success(&self, key: &ApiKey) {
        if let Some(slot) = self.slot(key) {
            slot.health().record_success();
        }
    }

    /// Record a failed call. Rate limiting cools the key down for the
    /// provider's retry-after hint, or `rate_limit_cooldown` without one.
    pub fn record_failure(&self, key: &ApiKey, error: &Error) {
        let Some(slot) = self.slot(key) else {
            return;
        };

        let category = self.classifier.classify(error);
        let cooldown = error
            .retry_after()
            .unwrap_or(self.settings.rate_limit_cooldown);

        let disabled =
            slot.health()
                .record_failure(category, error.to_string(), cooldown, &self.settings);

        match category {
            ErrorCategory::RateLimited => {
                warn!(key_id = %key.id(), ?cooldown, "API key rate limited, cooling down");
            }
            _ if disabled => {
                warn!(
                    key_id = %key.id(),
                    max_errors = self.settings.max_errors_before_disable,
                    "API key disabled after repeated errors: {}", error
                );
            }
            _ => debug!(key_id = %key.id(), ?category, "API key call failed: {}", error),
        }
    }

    /// Snapshot of every key, primary first
    #[must_use]
    pub fn get_health_status(&self) -> Vec<ApiKeyHealth> {
        let now = Instant::now();
        self.slots
            .iter()
            .map(|slot| slot.health().snapshot(now))
            .collect()
    }

    /// Probe every key that is not cooling down.
    ///
    /// Returns `None` when another check is still running. No lock is held
    /// while a probe is in flight.
    pub async fn run_health_check(
        &self,
        probe: &dyn KeyProbe,
        probe_timeout: Duration,
    ) -> Option<HealthCheckReport> {
        if self
            .check_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Key health check already in flight, skipping");
            return None;
        }
        let _guard = InFlight(&self.check_in_flight);

        let now = Instant::now();
        let (targets, cooling): (Vec<&KeySlot>, Vec<&KeySlot>) = self
            .slots
            .iter()
            .partition(|slot| !slot.health().is_cooling_down(now));

        let results = join_all(
            targets
                .iter()
                .map(|slot| with_timeout(probe.probe(&slot.key), probe_timeout)),
        )
        .await;

        let mut report = HealthCheckReport {
            probed: targets.len(),
            skipped: cooling.len(),
            ..Default::default()
        };

        for (slot, result) in targets.into_iter().zip(results) {
            match result.and_then(|inner| inner) {
                Ok(()) => {
                    if slot.health().record_probe_success() {
                        info!(key_id = %slot.key.id(), "API key recovered by health check");
                        report.recovered.push(slot.key.id().clone());
                    }
                }
                Err(error) => {
                    if self.classifier.classify(&error) == ErrorCategory::RateLimited {
                        let cooldown = error
                            .retry_after()
                            .unwrap_or(self.settings.rate_limit_cooldown);
                        slot.health().start_cooldown(Instant::now(), cooldown);
                    }
                    debug!(key_id = %slot.key.id(), "API key probe failed: {}", error);
                    report.failed.push(slot.key.id().clone());
                }
            }
        }

        info!(
            probed = report.probed,
            recovered = report.recovered.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "Key health check completed"
        );
        Some(report)
    }

    /// Run [`Self::run_health_check`] every `interval` until `shutdown` is
    /// cancelled.
    pub fn spawn_health_monitor(
        self: Arc<Self>,
        probe: Arc<dyn KeyProbe>,
        interval: Duration,
        probe_timeout: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(?interval, keys = self.len(), "Key health monitor starting");

            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_health_check(probe.as_ref(), probe_timeout).await;
                    }
                    () = shutdown.cancelled() => {
                        info!("Key health monitor received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
