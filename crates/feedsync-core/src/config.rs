//! Configuration system for feedsync.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;

/// Main configuration struct for feedsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Synthetic paging settings
    pub paging: PagingConfig,
    /// Session retention settings
    pub session: SessionConfig,
    /// Refresh request settings
    pub refresh: RefreshConfig,
    /// Payload store settings
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Size of the first reveal; 0 disables synthetic paging
    pub initial_page_size: usize,
    /// Size of later synthetic pages
    pub page_size: usize,
    /// Remainders smaller than this are folded into the previous page
    pub min_page_size: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            initial_page_size: 10,
            page_size: 10,
            min_page_size: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a detached session stays resumable
    pub session_lifetime_ms: u64,
    /// Keep one session's token pages out of other sessions. Set to false
    /// to append every page to every session showing the parent.
    pub limit_page_updates: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_lifetime_ms: 3_600_000,
            limit_page_updates: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Deadline for sessions waiting on a request
    pub timeout_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { timeout_ms: 1_000 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path; in-memory storage when unset
    pub path: Option<PathBuf>,
}

/// Validation result with multiple issues.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "paging.page_size")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_dir = Self::config_dir();

        Figment::new()
            // Default values
            .merge(figment::providers::Serialized::defaults(Config::default()))
            // User config
            .merge(Toml::file(config_dir.join("config.toml")))
            // Project config
            .merge(Toml::file(".feedsync/config.toml"))
            // Environment variables
            .merge(Env::prefixed("FEEDSYNC_").split("__"))
            .extract()
    }

    /// Load configuration from a single TOML file layered over defaults.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(figment::providers::Serialized::defaults(Config::default()))
            .merge(Toml::file(path.into()))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        config.ensure_valid()
    }

    /// Validate, logging warnings and failing on errors.
    pub fn ensure_valid(self) -> Result<Self, Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.paging.initial_page_size > 0 && self.paging.page_size == 0 {
            result.add_error(
                "paging.page_size",
                "page_size must be greater than 0 when synthetic paging is enabled",
            );
        }

        if self.paging.page_size > 0 && self.paging.min_page_size > self.paging.page_size {
            result.add_warning(
                "paging.min_page_size",
                "min_page_size is larger than page_size; every later page will be revealed in full",
            );
        }

        if self.refresh.timeout_ms == 0 {
            result.add_error("refresh.timeout_ms", "timeout_ms must be greater than 0");
        }

        if self.session.session_lifetime_ms == 0 {
            result.add_warning(
                "session.session_lifetime_ms",
                "session_lifetime_ms is 0; detached sessions expire immediately",
            );
        }

        if let Some(ref path) = self.store.path {
            if path.as_os_str().is_empty() {
                result.add_error("store.path", "store path cannot be empty");
            }
        }

        result
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Whether synthetic paging is enabled.
    pub fn paging_enabled(&self) -> bool {
        self.paging.initial_page_size > 0
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("feedsync"))
            .unwrap_or_else(|| PathBuf::from("~/.config/feedsync"))
    }

    /// Get the data directory (for the payload database).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("feedsync"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/feedsync"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
        assert!(config.paging_enabled());
        assert!(config.session.limit_page_updates);
    }

    #[test]
    fn test_zero_page_size_with_paging_is_error() {
        let mut config = Config::default();
        config.paging.page_size = 0;
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "paging.page_size"));
    }

    #[test]
    fn test_zero_page_size_without_paging_is_fine() {
        let mut config = Config::default();
        config.paging.initial_page_size = 0;
        config.paging.page_size = 0;
        config.paging.min_page_size = 0;
        assert!(config.validate().is_ok());
        assert!(!config.paging_enabled());
    }

    #[test]
    fn test_large_min_page_is_warning() {
        let mut config = Config::default();
        config.paging.min_page_size = 50;
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result.warnings().iter().any(|w| w.field == "paging.min_page_size"));
    }

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = Config::default();
        config.refresh.timeout_ms = 0;
        let err = config.ensure_valid().unwrap_err();
        assert!(err.to_string().contains("refresh.timeout_ms"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = std::env::temp_dir().join(format!("feedsync-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            "[paging]\ninitial_page_size = 4\npage_size = 4\nmin_page_size = 2\n\n[session]\nlimit_page_updates = false\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.paging.initial_page_size, 4);
        assert_eq!(config.paging.min_page_size, 2);
        assert!(!config.session.limit_page_updates);
        assert_eq!(config.refresh.timeout_ms, 1_000);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_toml_rendering_has_sections() {
        let text = Config::default().to_toml_string().unwrap();
        assert!(text.contains("[paging]"));
        assert!(text.contains("initial_page_size = 10"));
        assert!(text.contains("[refresh]"));
    }
}
