//! Provider-specific error classification.
//!
//! The circuit breaker counts every failure; key health and retry decisions
//! need to know *what kind* of failure happened. Providers report rate
//! limiting in different shapes (a 429 status, a `RESOURCE_EXHAUSTED` body,
//! a "quota exceeded" message), so classification is a trait supplied per
//! provider instead of substring checks scattered through the caller.

use crate::error::{Error, ErrorCategory};
use regex::Regex;

/// Maps an error to the category that drives retry and key-health decisions
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &Error) -> ErrorCategory;
}

/// Classifier that relies on error variants and HTTP status codes only
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &Error) -> ErrorCategory {
        error.category()
    }
}

/// Default pattern for rate-limit signals in provider error messages
pub const DEFAULT_RATE_LIMIT_PATTERN: &str =
    r"(?i)\b429\b|resource[_ ]exhausted|rate[ _-]?limit|quota";

/// Classifier that also inspects provider error messages.
///
/// Structural categories win, except that a message matching the rate-limit
/// pattern upgrades a `Transient` or `Persistent` error to `RateLimited`.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    rate_limit: Regex,
}

impl PatternClassifier {
    pub fn new(rate_limit_pattern: &str) -> crate::Result<Self> {
        let rate_limit = Regex::new(rate_limit_pattern).map_err(|e| Error::InvalidInput {
            field: "rate_limit_pattern".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { rate_limit })
    }

    fn message_of(error: &Error) -> Option<String> {
        match error {
            Error::Provider { message, .. } | Error::Service(message) => Some(message.clone()),
            Error::ServiceUnavailable { reason, .. } => Some(reason.clone()),
            Error::Http(e) => Some(e.to_string()),
            _ => None,
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self {
            rate_limit: Regex::new(DEFAULT_RATE_LIMIT_PATTERN)
                .expect("default rate-limit pattern is valid"),
        }
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, error: &Error) -> ErrorCategory {
        let category = error.category();
        if matches!(
            category,
            ErrorCategory::Transient | ErrorCategory::Persistent
        ) {
            if let Some(message) = Self::message_of(error) {
                if self.rate_limit.is_match(&message) {
                    return ErrorCategory::RateLimited;
                }
            }
        }
        category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(status: Option<u16>, message: &str) -> Error {
        Error::Provider {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_default_classifier_uses_status() {
        let classifier = DefaultClassifier;
        assert_eq!(
            classifier.classify(&provider(Some(429), "")),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            classifier.classify(&provider(None, "RESOURCE_EXHAUSTED")),
            ErrorCategory::Transient
        );
    }

    #[test]
    fn test_pattern_classifier_matches_messages() {
        let classifier = PatternClassifier::default();

        assert_eq!(
            classifier.classify(&provider(None, "RESOURCE_EXHAUSTED: try later")),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            classifier.classify(&provider(Some(403), "Quota exceeded for project")),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            classifier.classify(&provider(Some(500), "internal error")),
            ErrorCategory::Transient
        );
        assert_eq!(
            classifier.classify(&provider(Some(401), "API key not valid")),
            ErrorCategory::Persistent
        );
    }

    #[test]
    fn test_pattern_classifier_never_downgrades_fatal() {
        let classifier = PatternClassifier::default();
        let err = Error::NoCredentials {
            source_hint: "quota".to_string(),
        };
        assert_eq!(classifier.classify(&err), ErrorCategory::Fatal);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(matches!(
            PatternClassifier::new("(unclosed"),
            Err(Error::InvalidInput { .. })
        ));
    }
}
