//! YAML configuration with environment overrides.
//!
//! ```yaml
//! store:
//!   url: https://example.supabase.co
//!   api_key: ...
//!   page_size: 1000
//! session:
//!   user: maria
//!   password_sha256: 5e88...
//! log:
//!   capacity: 6
//! ```

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::conflict::CredentialHash;
use crate::pipeline::{Operator, DEFAULT_LOG_CAPACITY};
use crate::store::{HttpStore, DEFAULT_PAGE_SIZE};

pub const DEFAULT_CONFIG_FILE: &str = "hr-sheet-import.yaml";

pub const ENV_STORE_URL: &str = "HR_STORE_URL";
pub const ENV_STORE_KEY: &str = "HR_STORE_KEY";
pub const ENV_SESSION_USER: &str = "HR_SESSION_USER";
pub const ENV_SESSION_PASSWORD: &str = "HR_SESSION_PASSWORD_SHA256";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub api_key: String,
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub user: String,
    /// Hex SHA-256 of the operator's password.
    pub password_sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl Config {
    /// Reads `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Unreadable file or invalid YAML.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml_ng::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Overrides fields from `lookup` (normally `std::env::var`).
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |target: &mut String, var: &str| {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };
        set(&mut self.store.url, ENV_STORE_URL);
        set(&mut self.store.api_key, ENV_STORE_KEY);
        set(&mut self.session.user, ENV_SESSION_USER);
        if let Some(digest) = lookup(ENV_SESSION_PASSWORD).filter(|v| !v.trim().is_empty()) {
            self.session.password_sha256 = Some(digest);
        }
        self
    }

    /// [`Config::load`] followed by process environment overrides.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn from_file_and_env(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::load(path)?.with_overrides(|var| std::env::var(var).ok()))
    }

    /// # Errors
    ///
    /// Missing or invalid store URL or key.
    pub fn http_store(&self) -> anyhow::Result<HttpStore> {
        HttpStore::new(&self.store.url, &self.store.api_key, self.store.page_size)
            .context("Store is not configured (store.url / store.api_key or HR_STORE_URL / HR_STORE_KEY)")
    }

    /// # Errors
    ///
    /// A configured password hash that is not 64 hex digits.
    pub fn operator(&self) -> anyhow::Result<Operator> {
        let credential = self
            .session
            .password_sha256
            .as_deref()
            .map(CredentialHash::from_hex)
            .transpose()
            .context("session.password_sha256")?;
        Ok(Operator {
            name: self.session.user.clone(),
            credential,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.store.page_size, 1000);
        assert_eq!(config.log.capacity, 6);
        assert!(config.http_store().is_err());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "store:\n  url: https://db.example\n  api_key: k\nsession:\n  user: maria\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store.url, "https://db.example");
        assert_eq!(config.store.page_size, 1000);
        assert_eq!(config.session.user, "maria");
        assert!(config.http_store().is_ok());
        assert!(config.operator().unwrap().credential.is_none());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "store: [").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, String> = [
            (ENV_STORE_URL, "https://env.example".to_string()),
            (ENV_SESSION_PASSWORD, CredentialHash::from_password("x").as_hex().to_string()),
            (ENV_SESSION_USER, "  ".to_string()),
        ]
        .into_iter()
        .collect();
        let base = Config {
            session: SessionConfig {
                user: "maria".to_string(),
                password_sha256: None,
            },
            ..Config::default()
        };

        let config = base.with_overrides(|var| env.get(var).cloned());
        assert_eq!(config.store.url, "https://env.example");
        assert_eq!(config.session.user, "maria");
        let operator = config.operator().unwrap();
        assert!(operator.credential.unwrap().verify("x"));
    }

    #[test]
    fn malformed_password_hash_is_rejected() {
        let config = Config {
            session: SessionConfig {
                user: "maria".to_string(),
                password_sha256: Some("nope".to_string()),
            },
            ..Config::default()
        };
        assert!(config.operator().is_err());
    }
}
