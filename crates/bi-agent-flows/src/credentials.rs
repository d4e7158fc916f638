//! LLM provider credentials
//!
//! The auth flow only talks to [`CredentialStore`]; where keys end up (memory,
//! a keychain, a dotenv file) is the implementation's business.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{FlowsError, Result};

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI
    OpenAi,
    /// Anthropic
    Anthropic,
    /// Google Gemini
    Gemini,
}

impl Provider {
    /// Every provider, in menu order
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::Gemini];

    /// Stable identifier
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }

    /// Human-readable name
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Gemini => "Google Gemini",
        }
    }

    /// Environment variable the key is conventionally read from
    #[must_use]
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Where users create a key
    #[must_use]
    pub fn key_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://platform.openai.com/api-keys",
            Provider::Anthropic => "https://console.anthropic.com/settings/keys",
            Provider::Gemini => "https://aistudio.google.com/app/apikey",
        }
    }

    /// Whether `key` looks like a key issued by this provider
    #[must_use]
    pub fn key_format_ok(&self, key: &str) -> bool {
        let key = key.trim();
        let prefix_ok = match self {
            Provider::OpenAi => key.starts_with("sk-") && !key.starts_with("sk-ant-"),
            Provider::Anthropic => key.starts_with("sk-ant-"),
            Provider::Gemini => key.starts_with("AIza"),
        };
        prefix_ok && key.len() >= 20 && !key.chars().any(char::is_whitespace)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = FlowsError;

    fn from_str(s: &str) -> Result<Self> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| FlowsError::UnknownProvider(s.to_string()))
    }
}

/// Storage and verification of provider API keys
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether `key` is accepted by the provider
    async fn verify_key(&self, provider: Provider, key: &str) -> Result<bool>;

    /// Persist a verified key, replacing any previous one
    async fn save_key(&self, provider: Provider, key: SecretString) -> Result<()>;

    /// Whether a key is stored for the provider
    async fn has_key(&self, provider: Provider) -> bool;
}

type KeyVerifier = Box<dyn Fn(Provider, &str) -> bool + Send + Sync>;

/// In-memory credential store
///
/// Verification defaults to an offline format check; tests and embedders can
/// swap in their own verifier.
pub struct MemoryCredentialStore {
    keys: RwLock<HashMap<Provider, SecretString>>,
    verifier: KeyVerifier,
}

impl MemoryCredentialStore {
    /// Empty store using the format check
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            verifier: Box::new(|provider, key| provider.key_format_ok(key)),
        }
    }

    /// Replace the key verifier
    #[must_use]
    pub fn with_verifier<F>(mut self, verifier: F) -> Self
    where
        F: Fn(Provider, &str) -> bool + Send + Sync + 'static,
    {
        self.verifier = Box::new(verifier);
        self
    }

    /// Run `f` on the stored key without copying it out
    pub async fn with_key<R>(&self, provider: Provider, f: impl FnOnce(&str) -> R) -> Option<R> {
        let keys = self.keys.read().await;
        keys.get(&provider).map(|key| f(key.expose_secret()))
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCredentialStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn verify_key(&self, provider: Provider, key: &str) -> Result<bool> {
        let ok = (self.verifier)(provider, key);
        debug!(provider = %provider, ok, "API key verified");
        Ok(ok)
    }

    async fn save_key(&self, provider: Provider, key: SecretString) -> Result<()> {
        self.keys.write().await.insert(provider, key);
        info!(provider = %provider, "API key saved");
        Ok(())
    }

    async fn has_key(&self, provider: Provider) -> bool {
        self.keys.read().await.contains_key(&provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!(" gemini ".parse::<Provider>().unwrap(), Provider::Gemini);
        assert!(matches!(
            "mistral".parse::<Provider>(),
            Err(FlowsError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_key_format() {
        assert!(Provider::OpenAi.key_format_ok("sk-proj-abcdefghijklmnop"));
        assert!(!Provider::OpenAi.key_format_ok("sk-ant-abcdefghijklmnop"));
        assert!(Provider::Anthropic.key_format_ok("sk-ant-api03-abcdefghijk"));
        assert!(Provider::Gemini.key_format_ok("AIzaSyabcdefghijklmnop"));
        assert!(!Provider::Gemini.key_format_ok("AIza short"));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert!(!store.has_key(Provider::Anthropic).await);

        store
            .save_key(
                Provider::Anthropic,
                SecretString::from("sk-ant-secret-key-value".to_string()),
            )
            .await
            .unwrap();

        assert!(store.has_key(Provider::Anthropic).await);
        assert_eq!(
            store.with_key(Provider::Anthropic, |k| k.len()).await,
            Some("sk-ant-secret-key-value".len())
        );
        assert!(!format!("{:?}", store).contains("secret"));
    }
}
