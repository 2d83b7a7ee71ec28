//! TOML-based configuration for mergeflow.
//!
//! Every section is optional; a missing file yields [`EngineConfig::default`].
//! The author identity can be overridden from the environment via
//! [`EngineConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::models::Identity;

/// Environment variable overriding `identity.name`.
pub const AUTHOR_NAME_ENV: &str = "MERGEFLOW_AUTHOR_NAME";
/// Environment variable overriding `identity.email`.
pub const AUTHOR_EMAIL_ENV: &str = "MERGEFLOW_AUTHOR_EMAIL";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Author identity for resolution commits.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Remote used by "reset to remote state".
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Commit behaviour.
    #[serde(default)]
    pub commit: CommitConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Author identity. When unset, the repository's `user.name` / `user.email`
/// are used instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,
}

impl IdentityConfig {
    /// The configured identity, if both name and email are present.
    pub fn identity(&self) -> Option<Identity> {
        match (&self.name, &self.email) {
            (Some(name), Some(email)) => Some(Identity::new(name.as_str(), email.as_str())),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Remote
// ---------------------------------------------------------------------------

/// Remote tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote name (default `origin`).
    #[serde(default = "default_remote_name")]
    pub name: String,

    /// Branch to reset to. Defaults to the checked-out branch.
    #[serde(default)]
    pub branch: Option<String>,
}

fn default_remote_name() -> String {
    "origin".into()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { name: default_remote_name(), branch: None }
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Resolution commit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Message used when the caller supplies none.
    #[serde(default = "default_message")]
    pub default_message: String,

    /// Refuse to commit while manually resolved files still contain conflict markers.
    #[serde(default)]
    pub validate_markers: bool,
}

fn default_message() -> String {
    "Merge conflicts resolved".into()
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self { default_message: default_message(), validate_markers: false }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Default location: `<config dir>/mergeflow/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("mergeflow").join("config.toml"))
    }

    /// Load an [`EngineConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Ok(config) => Ok(config),
            Err(ConfigError::FileNotFound(p)) => {
                debug!(path = %p, "no configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply `MERGEFLOW_AUTHOR_NAME` / `MERGEFLOW_AUTHOR_EMAIL` overrides.
    pub fn resolve_env_vars(&mut self) {
        if let Some(name) = non_empty_env(AUTHOR_NAME_ENV) {
            debug!(env_name = AUTHOR_NAME_ENV, "identity.name overridden");
            self.identity.name = Some(name);
        }
        if let Some(email) = non_empty_env(AUTHOR_EMAIL_ENV) {
            debug!(env_name = AUTHOR_EMAIL_ENV, "identity.email overridden");
            self.identity.email = Some(email);
        }
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.name.is_some() != self.identity.email.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "identity".into(),
                detail: "name and email must be set together".into(),
            });
        }
        if let Some(email) = &self.identity.email {
            if !email.contains('@') {
                return Err(ConfigError::InvalidValue {
                    field: "identity.email".into(),
                    detail: format!("'{}' is not an email address", email),
                });
            }
        }
        if self.remote.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.name".into(),
                detail: "remote name must not be empty".into(),
            });
        }
        if self.commit.default_message.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "commit.default_message".into(),
                detail: "default commit message must not be empty".into(),
            });
        }
        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: format!("unknown level '{}'", self.logging.level),
            });
        }
        Ok(())
    }

    /// Convenience: load (or default), resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_or_default(path)?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[identity]
name = "Alice Example"
email = "alice@example.com"

[remote]
name = "upstream"
branch = "main"

[commit]
default_message = "Resolve merge"
validate_markers = true

[logging]
level = "debug"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: EngineConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(
            config.identity.identity(),
            Some(Identity::new("Alice Example", "alice@example.com"))
        );
        assert_eq!(config.remote.name, "upstream");
        assert_eq!(config.remote.branch.as_deref(), Some("main"));
        assert!(config.commit.validate_markers);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = EngineConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_file_not_found() {
        let result = EngineConfig::load_from_file("/nonexistent/mergeflow.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));

        let config = EngineConfig::load_or_default("/nonexistent/mergeflow.toml").unwrap();
        assert_eq!(config.remote.name, "origin");
    }

    #[test]
    fn test_validate_rejects_half_identity() {
        let config: EngineConfig = toml::from_str("[identity]\nname = \"Bob\"\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "identity"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let config: EngineConfig = toml::from_str("[logging]\nlevel = \"loud\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert!(config.identity.identity().is_none());
        assert_eq!(config.remote.name, "origin");
        assert!(config.remote.branch.is_none());
        assert_eq!(config.commit.default_message, "Merge conflicts resolved");
        assert!(!config.commit.validate_markers);
        assert_eq!(config.logging.level, "warn");
    }
}
