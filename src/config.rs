//! Service settings for Tollgate.
//!
//! Settings come from an optional file followed by `TOLLGATE__*` environment
//! variables (for example `TOLLGATE__LIMITER__MAX_COUNTER_ENTRIES=50000`),
//! later sources overriding earlier ones. Tier tables are not settings; they
//! live in their own files and are hot-reloaded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{Result, TollgateError};
use crate::ratelimit::counter::DEFAULT_MAX_ENTRIES;
use crate::ratelimit::identity::{IdentityExtractor, DEFAULT_CUSTOM_HEADERS};
use crate::ratelimit::reload::FileSource;

/// Prefix of environment variables read as settings.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Counter store configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Tier reload configuration
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Identity extraction configuration
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum number of live counters
    #[serde(default = "default_max_counter_entries")]
    pub max_counter_entries: usize,

    /// How often expired counters are purged, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_counter_entries: default_max_counter_entries(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_max_counter_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_sweep_interval() -> u64 {
    30
}

/// Tier reload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Path to the tier YAML file
    pub tiers_path: Option<PathBuf>,

    /// Path to an optional service-account JSON export
    pub accounts_path: Option<PathBuf>,

    /// How often the tier files are polled, in seconds
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            tiers_path: None,
            accounts_path: None,
            reload_interval_secs: default_reload_interval(),
        }
    }
}

fn default_reload_interval() -> u64 {
    60
}

/// Identity extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Headers carrying an access key directly, tried in order
    #[serde(default = "default_custom_headers")]
    pub custom_headers: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            custom_headers: default_custom_headers(),
        }
    }
}

fn default_custom_headers() -> Vec<String> {
    DEFAULT_CUSTOM_HEADERS.iter().map(|h| h.to_string()).collect()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load settings from an optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("identity.custom_headers")
                .try_parsing(true),
        );

        let settings: TollgateConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Check values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.max_counter_entries == 0 {
            return Err(invalid("limiter.max_counter_entries must be greater than zero"));
        }
        if self.limiter.sweep_interval_secs == 0 {
            return Err(invalid("limiter.sweep_interval_secs must be greater than zero"));
        }
        if self.reload.reload_interval_secs == 0 {
            return Err(invalid("reload.reload_interval_secs must be greater than zero"));
        }
        if self.reload.accounts_path.is_some() && self.reload.tiers_path.is_none() {
            return Err(invalid("reload.accounts_path requires reload.tiers_path"));
        }
        self.extractor()?;
        self.log_level()?;
        Ok(())
    }

    /// Build the identity extractor described by these settings.
    pub fn extractor(&self) -> Result<IdentityExtractor> {
        IdentityExtractor::with_custom_headers(&self.identity.custom_headers)
            .map_err(|e| invalid(format!("identity.custom_headers: {}", e)))
    }

    /// Parsed default log level.
    pub fn log_level(&self) -> Result<Level> {
        self.logging
            .level
            .parse()
            .map_err(|_| invalid(format!("unknown log level \"{}\"", self.logging.level)))
    }

    /// The tier source, if a tier file is configured.
    pub fn file_source(&self) -> Option<FileSource> {
        let tiers = self.reload.tiers_path.as_ref()?;
        let source = FileSource::new(tiers);
        Some(match &self.reload.accounts_path {
            Some(accounts) => source.with_accounts(accounts),
            None => source,
        })
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.limiter.sweep_interval_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload.reload_interval_secs)
    }
}

fn invalid(message: impl Into<String>) -> TollgateError {
    TollgateError::InvalidSettings(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TollgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limiter.max_counter_entries, 100_000);
        assert_eq!(config.identity.custom_headers, vec!["x-api-key", "x-access-key"]);
        assert_eq!(config.log_level().unwrap(), Level::INFO);
        assert!(config.file_source().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let file = settings_file(
            r#"
limiter:
  max_counter_entries: 500
reload:
  tiers_path: /etc/tollgate/tiers.yaml
  accounts_path: /etc/tollgate/accounts.json
  reload_interval_secs: 5
identity:
  custom_headers: [x-tenant-key]
logging:
  level: debug
  json: true
"#,
        );

        let config = TollgateConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.limiter.max_counter_entries, 500);
        assert_eq!(config.reload_interval(), Duration::from_secs(5));
        assert_eq!(config.identity.custom_headers, vec!["x-tenant-key"]);
        assert!(config.logging.json);
        assert_eq!(config.extractor().unwrap().custom_headers().len(), 1);
        assert!(config.file_source().is_some());
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = settings_file("limiter:\n  sweep_interval_secs: 10\n");

        std::env::set_var("TOLLGATE__LIMITER__SWEEP_INTERVAL_SECS", "7");
        let config = TollgateConfig::load(Some(file.path()));
        std::env::remove_var("TOLLGATE__LIMITER__SWEEP_INTERVAL_SECS");

        assert_eq!(config.unwrap().sweep_interval(), Duration::from_secs(7));
    }

    #[test]
    fn test_missing_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = TollgateConfig::load(Some(&dir.path().join("absent.yaml")));
        assert!(matches!(result, Err(TollgateError::Settings(_))));
    }

    #[test]
    fn test_rejects_unusable_values() {
        let mut config = TollgateConfig::default();
        config.limiter.max_counter_entries = 0;
        assert!(matches!(config.validate(), Err(TollgateError::InvalidSettings(_))));

        let mut config = TollgateConfig::default();
        config.identity.custom_headers = vec!["not a header".to_string()];
        assert!(config.validate().is_err());

        let mut config = TollgateConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = TollgateConfig::default();
        config.reload.accounts_path = Some(PathBuf::from("accounts.json"));
        assert!(config.validate().is_err());
    }
}
