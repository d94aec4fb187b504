use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Non-secret identifier for a key, safe to log and expose on status routes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Derive the id from the first 8 bytes of a SHA-256 digest of the secret
    #[must_use]
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut id = String::with_capacity(20);
        id.push_str("key-");
        for byte in &digest[..8] {
            let _ = write!(id, "{byte:02x}");
        }
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A provider credential. Cloning is cheap; formatting never shows the secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey {
    id: KeyId,
    secret: Arc<str>,
}

impl ApiKey {
    pub fn new(secret: impl Into<String>) -> Self {
        let secret: String = secret.into();
        Self {
            id: KeyId::from_secret(&secret),
            secret: Arc::from(secret),
        }
    }

    /// Key with a chosen id, for exercising id collisions
    #[cfg(test)]
    pub(crate) fn with_id(secret: &str, id: &str) -> Self {
        Self {
            id: KeyId(id.to_string()),
            secret: Arc::from(secret),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &KeyId {
        &self.id
    }

    /// The raw secret, for building the provider request only
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("id", &self.id)
            .field("secret", &"[redacted]")
            .finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

/// Where the ordered key list comes from: primary first, then fallbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// `VAR`, then `VAR_1` .. `VAR_<max_fallbacks>`
    Env { var: String, max_fallbacks: usize },
    /// An explicit list, primary first
    List(Vec<String>),
}

impl KeySource {
    pub fn env(var: impl Into<String>, max_fallbacks: usize) -> Self {
        Self::Env {
            var: var.into(),
            max_fallbacks,
        }
    }

    /// Resolve against the process environment
    #[must_use]
    pub fn resolve(&self) -> Vec<String> {
        self.resolve_from(|name| std::env::var(name).ok())
    }

    /// Resolve with a custom variable lookup. Blank values are skipped; a
    /// gap in the numbering does not end the scan.
    pub fn resolve_from<F>(&self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: Vec<String> = match self {
            Self::Env { var, max_fallbacks } => std::iter::once(var.clone())
                .chain((1..=*max_fallbacks).map(|n| format!("{var}_{n}")))
                .filter_map(|name| lookup(&name))
                .collect(),
            Self::List(keys) => keys.clone(),
        };

        raw.into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect()
    }

    /// Human-readable hint for error messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Env { var, max_fallbacks } => {
                format!("{var} (and optionally {var}_1..{var}_{max_fallbacks})")
            }
            Self::List(_) => "a non-empty key list".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_key_id_is_stable_and_non_secret() {
        let key = ApiKey::new("AIzaSy-super-secret");
        let again = ApiKey::new("AIzaSy-super-secret");

        assert_eq!(key.id(), again.id());
        assert!(key.id().as_str().starts_with("key-"));
        assert_eq!(key.id().as_str().len(), 20);
        assert!(!key.id().as_str().contains("secret"));
        assert_ne!(key.id(), ApiKey::new("other").id());
    }

    #[test]
    fn test_formatting_redacts_secret() {
        let key = ApiKey::new("AIzaSy-super-secret");

        let debug = format!("{key:?}");
        let display = key.to_string();

        assert!(!debug.contains("super-secret"));
        assert!(!display.contains("super-secret"));
        assert_eq!(display, key.id().to_string());
        assert_eq!(key.expose_secret(), "AIzaSy-super-secret");
    }

    #[test]
    fn test_env_source_reads_numbered_fallbacks() {
        let vars: HashMap<&str, &str> = [
            ("GEMINI_API_KEY", "primary"),
            ("GEMINI_API_KEY_1", "first"),
            ("GEMINI_API_KEY_2", "  "),
            ("GEMINI_API_KEY_3", "third"),
            ("GEMINI_API_KEY_9", "beyond-limit"),
        ]
        .into_iter()
        .collect();

        let source = KeySource::env("GEMINI_API_KEY", 5);
        let keys = source.resolve_from(|name| vars.get(name).map(|v| (*v).to_string()));

        assert_eq!(keys, vec!["primary", "first", "third"]);
    }

    #[test]
    fn test_env_source_without_primary() {
        let source = KeySource::env("GEMINI_API_KEY", 2);
        let keys = source.resolve_from(|name| {
            (name == "GEMINI_API_KEY_2").then(|| "fallback-only".to_string())
        });

        assert_eq!(keys, vec!["fallback-only"]);
    }

    #[test]
    fn test_list_source_trims() {
        let source = KeySource::List(vec![" a ".to_string(), String::new(), "b".to_string()]);
        assert_eq!(source.resolve(), vec!["a", "b"]);
        assert_eq!(source.describe(), "a non-empty key list");
    }
}
