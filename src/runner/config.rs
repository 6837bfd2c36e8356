//! Runtime configuration file parsing.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::ds::error::{Result, RuntimeError};

/// Application settings a request runs with.
///
/// The server supplies the defaults; a request may replace its own copy
/// with [`Context::update_settings`](crate::runner::context::Context::update_settings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name. Empty means the request has no application.
    pub name: String,
    /// Whether requests get a session scope.
    pub session_management: bool,
    /// Idle seconds before a session expires. 0 never expires.
    pub session_timeout: u64,
    /// Idle seconds before an application expires. 0 never expires.
    pub application_timeout: u64,
}

impl ApplicationSettings {
    pub fn named(name: &str) -> Self {
        ApplicationSettings {
            name: name.to_string(),
            ..ApplicationSettings::default()
        }
    }

    pub fn with_sessions(mut self, enabled: bool) -> Self {
        self.session_management = enabled;
        self
    }

    pub fn has_application(&self) -> bool {
        !self.name.trim().is_empty()
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        non_zero(self.session_timeout)
    }

    pub fn application_timeout(&self) -> Option<Duration> {
        non_zero(self.application_timeout)
    }
}

fn non_zero(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        ApplicationSettings {
            name: String::new(),
            session_management: false,
            session_timeout: 1800,
            application_timeout: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub application: ApplicationSettings,
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Expected format:
    /// ```toml
    /// [application]
    /// name = "shop"
    /// session_management = true
    /// session_timeout = 1800
    /// application_timeout = 0
    ///
    /// [logging]
    /// filter = "cfml_runtime=debug"
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RuntimeError::InvalidConfig(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string. Missing keys take defaults.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RuntimeError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_empty_config() {
        let config = RuntimeConfig::parse("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(!config.application.has_application());
        assert_eq!(config.application.session_timeout(), Some(Duration::from_secs(1800)));
        assert_eq!(config.application.application_timeout(), None);
    }

    #[test]
    fn test_parse_application_section() {
        let config = RuntimeConfig::parse(
            r#"
            [application]
            name = "shop"
            session_management = true
            session_timeout = 0

            [logging]
            filter = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.application.name, "shop");
        assert!(config.application.session_management);
        assert_eq!(config.application.session_timeout(), None);
        assert_eq!(config.logging.filter, "debug");
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let err = RuntimeConfig::parse("[application]\nsession_management = \"yes\"").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig(_)));
    }
}
