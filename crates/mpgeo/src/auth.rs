//! API credential resolution.
//!
//! Credentials are looked up in priority order: the OS credential store,
//! the environment, explicit parameters, and finally an interactive prompt.
//! Only the resulting `Authorization` header string is handed to the
//! transport.

use std::fmt;
use std::io::{BufRead, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Credential store service name.
pub const KEYRING_SERVICE: &str = "mp-geo-export";
/// Credential store account name.
pub const KEYRING_ACCOUNT: &str = "matterport-basic";
/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "MATTERPORT_API_KEY";
/// Environment variable holding the API secret.
pub const ENV_API_SECRET: &str = "MATTERPORT_API_SECRET";

/// An API key and secret pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    #[must_use]
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }

    /// A pair only counts when both parts are present and non-empty.
    #[must_use]
    pub fn from_parts(key: Option<&str>, secret: Option<&str>) -> Option<Self> {
        match (key, secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(Self::new(key, secret))
            }
            _ => None,
        }
    }

    /// Read the pair from `MATTERPORT_API_KEY` / `MATTERPORT_API_SECRET`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let key = std::env::var(ENV_API_KEY).ok();
        let secret = std::env::var(ENV_API_SECRET).ok();
        Self::from_parts(key.as_deref(), secret.as_deref())
    }

    /// Parse the `key:secret` form used in the credential store.
    #[must_use]
    pub fn from_stored(value: &str) -> Option<Self> {
        let (key, secret) = value.split_once(':')?;
        Self::from_parts(Some(key), Some(secret))
    }

    /// The `key:secret` form used in the credential store.
    #[must_use]
    pub fn to_stored(&self) -> String {
        format!("{}:{}", self.key, self.secret)
    }

    /// The `Authorization` header value: `Basic base64(key:secret)`.
    #[must_use]
    pub fn auth_header(&self) -> String {
        format!("Basic {}", STANDARD.encode(self.to_stored()))
    }
}

/// Persistent storage for a credential pair.
pub trait CredentialStore {
    /// Load the stored `key:secret` value, if any.
    fn load(&self) -> Result<Option<String>>;

    /// Persist a `key:secret` value.
    fn save(&self, value: &str) -> Result<()>;
}

/// The OS keyring (Keychain, Credential Manager, kernel keyutils).
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
    account: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_ACCOUNT)
    }
}

impl KeyringStore {
    #[must_use]
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, &self.account)?)
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, value: &str) -> Result<()> {
        Ok(self.entry()?.set_password(value)?)
    }
}

/// Asks the user for credentials.
pub trait Prompt {
    /// Ask for whichever parts are missing; known parts are passed in.
    fn prompt(&self, key: Option<&str>, secret: Option<&str>) -> Result<Credentials>;
}

/// Prompts on the terminal, reading the secret without echo.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn prompt(&self, key: Option<&str>, secret: Option<&str>) -> Result<Credentials> {
        let prompt_error = |e: std::io::Error| Error::Credentials {
            message: format!("failed to read credentials: {e}"),
        };

        eprintln!("Enter Matterport API credentials:");
        let key = match key.filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => {
                eprint!("API key: ");
                std::io::stderr().flush().map_err(prompt_error)?;
                let mut line = String::new();
                std::io::stdin()
                    .lock()
                    .read_line(&mut line)
                    .map_err(prompt_error)?;
                line.trim().to_string()
            }
        };
        let secret = match secret.filter(|s| !s.is_empty()) {
            Some(secret) => secret.to_string(),
            None => rpassword::prompt_password("API secret: ")
                .map_err(prompt_error)?
                .trim()
                .to_string(),
        };

        Credentials::from_parts(Some(&key), Some(&secret)).ok_or_else(|| Error::Credentials {
            message: "API key and secret must not be empty".to_string(),
        })
    }
}

/// The places credentials may come from.
#[derive(Default)]
pub struct CredentialSources<'a> {
    /// Checked first.
    pub store: Option<&'a dyn CredentialStore>,
    /// Pair read from the environment.
    pub env: Option<Credentials>,
    /// Explicit key, e.g. from `--api-key`.
    pub api_key: Option<String>,
    /// Explicit secret, e.g. from `--api-secret`.
    pub api_secret: Option<String>,
    /// Used when no other source has a complete pair.
    pub prompt: Option<&'a dyn Prompt>,
    /// Persist prompted credentials back to the store.
    pub save_to_store: bool,
}

impl CredentialSources<'_> {
    /// Resolve a credential pair from the first source that has one.
    pub fn resolve(&self) -> Result<Credentials> {
        if let Some(store) = self.store {
            match store.load() {
                Ok(Some(value)) => {
                    if let Some(credentials) = Credentials::from_stored(&value) {
                        tracing::debug!("using credentials from credential store");
                        return Ok(credentials);
                    }
                    tracing::warn!("ignoring malformed entry in credential store");
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "credential store unavailable"),
            }
        }

        if let Some(credentials) = &self.env {
            tracing::debug!("using credentials from environment");
            return Ok(credentials.clone());
        }

        if let Some(credentials) =
            Credentials::from_parts(self.api_key.as_deref(), self.api_secret.as_deref())
        {
            tracing::debug!("using explicit credentials");
            return Ok(credentials);
        }

        let Some(prompt) = self.prompt else {
            return Err(Error::Credentials {
                message: format!(
                    "no API credentials found; set {ENV_API_KEY} and {ENV_API_SECRET} \
                     or pass them explicitly"
                ),
            });
        };

        let credentials = prompt.prompt(self.api_key.as_deref(), self.api_secret.as_deref())?;
        if self.save_to_store {
            if let Some(store) = self.store {
                store.save(&credentials.to_stored())?;
                tracing::info!("saved credentials to credential store");
            }
        }
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        value: RefCell<Option<String>>,
    }

    impl CredentialStore for MemoryStore {
        fn load(&self) -> Result<Option<String>> {
            Ok(self.value.borrow().clone())
        }

        fn save(&self, value: &str) -> Result<()> {
            *self.value.borrow_mut() = Some(value.to_string());
            Ok(())
        }
    }

    struct BrokenStore;

    impl CredentialStore for BrokenStore {
        fn load(&self) -> Result<Option<String>> {
            Err(Error::Credentials {
                message: "no backend".into(),
            })
        }

        fn save(&self, _value: &str) -> Result<()> {
            Ok(())
        }
    }

    struct FixedPrompt;

    impl Prompt for FixedPrompt {
        fn prompt(&self, key: Option<&str>, _secret: Option<&str>) -> Result<Credentials> {
            Ok(Credentials::new(key.unwrap_or("typed-key"), "typed-secret"))
        }
    }

    #[test]
    fn test_auth_header() {
        let credentials = Credentials::new("key", "secret");
        // base64("key:secret")
        assert_eq!(credentials.auth_header(), "Basic a2V5OnNlY3JldA==");
    }

    #[test]
    fn test_from_stored() {
        assert_eq!(
            Credentials::from_stored("k:s:with:colons"),
            Some(Credentials::new("k", "s:with:colons"))
        );
        assert_eq!(Credentials::from_stored("no-separator"), None);
        assert_eq!(Credentials::from_stored(":secret"), None);
    }

    #[test]
    fn test_store_wins_over_env_and_explicit() {
        let store = MemoryStore::default();
        store.save("stored:pair").unwrap();
        let sources = CredentialSources {
            store: Some(&store),
            env: Some(Credentials::new("env", "pair")),
            api_key: Some("flag".into()),
            api_secret: Some("pair".into()),
            ..CredentialSources::default()
        };
        assert_eq!(sources.resolve().unwrap().key, "stored");
    }

    #[test]
    fn test_env_wins_over_explicit() {
        let sources = CredentialSources {
            store: Some(&BrokenStore),
            env: Some(Credentials::new("env", "pair")),
            api_key: Some("flag".into()),
            api_secret: Some("pair".into()),
            ..CredentialSources::default()
        };
        assert_eq!(sources.resolve().unwrap().key, "env");
    }

    #[test]
    fn test_partial_explicit_falls_through_to_prompt_and_saves() {
        let store = MemoryStore::default();
        let sources = CredentialSources {
            store: Some(&store),
            api_key: Some("flag-key".into()),
            prompt: Some(&FixedPrompt),
            save_to_store: true,
            ..CredentialSources::default()
        };

        let credentials = sources.resolve().unwrap();
        assert_eq!(credentials, Credentials::new("flag-key", "typed-secret"));
        assert_eq!(
            store.value.borrow().as_deref(),
            Some("flag-key:typed-secret")
        );
    }

    #[test]
    fn test_no_source_is_an_error() {
        let err = CredentialSources::default().resolve().unwrap_err();
        assert!(matches!(err, Error::Credentials { .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let text = format!("{:?}", Credentials::new("key", "hunter2"));
        assert!(!text.contains("hunter2"));
    }
}
