//! Configuration file parser for feedmill.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields`
//! off), though we log a warning when the top level contains potential
//! typos.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::coordinator::CoordinatorConfig;
use crate::fetch::{ApiCodes, FetchConfig, RateLimiterConfig};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSection,
    pub limiter: LimiterSection,
    pub fetch: FetchSection,
    pub export: ExportSection,
    pub notify: NotifySection,
    /// Platform integrations keyed by platform name (the first segment of
    /// every resource key).
    pub platforms: HashMap<String, PlatformSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// "sqlite" (persistent, default) or "memory".
    pub backend: String,
    /// Database path for the sqlite backend. Defaults next to the binary.
    pub path: PathBuf,
    /// TTL for feed documents, in seconds.
    pub feed_ttl_secs: u64,
    /// TTL for slow-moving resources (release feeds and the like).
    pub slow_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from("feedmill.db"),
            feed_ttl_secs: 2 * 60 * 60,
            slow_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimiterSection {
    pub base_interval_ms: u64,
    pub jitter_ms: u64,
}

impl Default for LimiterSection {
    fn default() -> Self {
        let defaults = RateLimiterConfig::default();
        Self {
            base_interval_ms: defaults.base_interval.as_millis() as u64,
            jitter_ms: defaults.jitter.as_millis() as u64,
        }
    }
}

impl From<&LimiterSection> for RateLimiterConfig {
    fn from(section: &LimiterSection) -> Self {
        Self {
            base_interval: Duration::from_millis(section.base_interval_ms),
            jitter: Duration::from_millis(section.jitter_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub max_retry: u32,
    pub timeout_secs: u64,
    /// API envelope code overrides, for platforms that deviate from the
    /// common 0/401/400/403 convention.
    pub code_success: i64,
    pub code_need_login: i64,
    pub code_bad_request: i64,
    pub code_invalid_sign: i64,
}

impl Default for FetchSection {
    fn default() -> Self {
        let fetch = FetchConfig::default();
        let codes = ApiCodes::default();
        Self {
            max_retry: fetch.max_retry,
            timeout_secs: fetch.timeout.as_secs(),
            code_success: codes.success,
            code_need_login: codes.need_login,
            code_bad_request: codes.bad_request,
            code_invalid_sign: codes.invalid_sign,
        }
    }
}

impl FetchSection {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            max_retry: self.max_retry,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn api_codes(&self) -> ApiCodes {
        ApiCodes {
            success: self.code_success,
            need_login: self.code_need_login,
            bad_request: self.code_bad_request,
            invalid_sign: self.code_invalid_sign,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    /// Root directory for the local object store backend.
    pub root: PathBuf,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("exports"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    /// Webhook endpoint for export notifications. None disables them.
    pub webhook_url: Option<String>,
}

/// One platform integration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    /// Feed endpoint template; `{kind}` and `{ident}` are substituted
    /// from the resource key.
    pub endpoint: String,
    /// Signing secret for the platform API.
    pub app_secret: Option<String>,
    /// Credential kind looked up in the credential store.
    pub credential_kind: String,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            app_secret: None,
            credential_kind: "token".to_string(),
        }
    }
}

/// Mask app_secret in Debug output to prevent secret leakage in logs.
impl std::fmt::Debug for PlatformSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformSection")
            .field("endpoint", &self.endpoint)
            .field("app_secret", &self.app_secret.as_ref().map(|_| "[REDACTED]"))
            .field("credential_kind", &self.credential_kind)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    pub fn feed_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.feed_ttl_secs)
    }

    pub fn slow_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.slow_ttl_secs)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            ttl: self.feed_ttl(),
            ..CoordinatorConfig::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid slurping a corrupted or
        // maliciously large file into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["cache", "limiter", "fetch", "export", "notify", "platforms"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            backend = %config.cache.backend,
            platforms = config.platforms.len(),
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
