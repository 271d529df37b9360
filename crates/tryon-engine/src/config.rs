use std::env;
use std::fmt;
use std::sync::{Arc, RwLock};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Credential shared between the generation client and whatever selects keys
/// for it. Reads always see the latest selection.
#[derive(Clone, Default)]
pub struct SharedCredential {
    inner: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for SharedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedCredential")
            .field("present", &self.get().is_some())
            .finish()
    }
}

impl SharedCredential {
    pub fn new(value: Option<String>) -> Self {
        let credential = Self::default();
        credential.set(value);
        credential
    }

    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn set(&self, value: Option<String>) {
        let value = value
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());
        if let Ok(mut guard) = self.inner.write() {
            *guard = value;
        }
    }

    pub fn is_present(&self) -> bool {
        self.get().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credential: SharedCredential,
    pub api_base: String,
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub retry_backoff_s: f64,
    pub standard_model: Option<String>,
    pub enhanced_model: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            credential: SharedCredential::default(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_s: 120.0,
            transport_retries: 1,
            retry_backoff_s: 1.2,
            standard_model: None,
            enhanced_model: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        let api_key = get("API_KEY")
            .or_else(|| get("GEMINI_API_KEY"))
            .or_else(|| get("GOOGLE_API_KEY"));
        Self {
            credential: SharedCredential::new(api_key),
            api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            request_timeout_s: parse_clamped(
                get("TRYON_REQUEST_TIMEOUT"),
                defaults.request_timeout_s,
                15.0,
                300.0,
            ),
            transport_retries: parse_clamped(
                get("TRYON_TRANSPORT_RETRIES"),
                defaults.transport_retries as f64,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff_s: defaults.retry_backoff_s,
            standard_model: get("TRYON_STANDARD_MODEL"),
            enhanced_model: get("TRYON_ENHANCED_MODEL"),
        }
    }
}

fn parse_clamped(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{ClientConfig, SharedCredential, DEFAULT_API_BASE};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn credential_precedence() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "gemini"),
            ("GOOGLE_API_KEY", "google"),
        ]));
        assert_eq!(config.credential.get().as_deref(), Some("gemini"));

        let config = ClientConfig::from_lookup(lookup(&[
            ("API_KEY", "primary"),
            ("GEMINI_API_KEY", "gemini"),
        ]));
        assert_eq!(config.credential.get().as_deref(), Some("primary"));

        let config = ClientConfig::from_lookup(lookup(&[("API_KEY", "   ")]));
        assert!(!config.credential.is_present());
    }

    #[test]
    fn numeric_settings_are_clamped() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TRYON_REQUEST_TIMEOUT", "9000"),
            ("TRYON_TRANSPORT_RETRIES", "nope"),
            ("GEMINI_API_BASE", "http://localhost:8080/v1/"),
        ]));
        assert_eq!(config.request_timeout_s, 300.0);
        assert_eq!(config.transport_retries, 1);
        assert_eq!(config.api_base, "http://localhost:8080/v1");

        let defaults = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(defaults.api_base, DEFAULT_API_BASE);
        assert_eq!(defaults.request_timeout_s, 120.0);
    }

    #[test]
    fn shared_credential_updates_are_visible_to_clones() {
        let credential = SharedCredential::default();
        let reader = credential.clone();
        assert!(!reader.is_present());
        credential.set(Some(" key-123 ".to_string()));
        assert_eq!(reader.get().as_deref(), Some("key-123"));
        credential.set(Some(String::new()));
        assert!(!reader.is_present());
    }
}
