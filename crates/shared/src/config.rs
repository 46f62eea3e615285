//! Application configuration management.
//!
//! Sources are layered: `config/default`, then `config/{RUN_MODE}`, then
//! environment variables prefixed with `MINIGL` (e.g.
//! `MINIGL__LEDGER__MAX_APPLY_RETRIES=5`).

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Ledger engine configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ledger engine configuration.
///
/// Passed explicitly to the chart store and posting engine instead of being
/// read from process-wide state.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Zero padding used for generated account code suffixes.
    #[serde(default = "default_padding")]
    pub default_padding: usize,
    /// Require child account codes to start with their parent's code.
    #[serde(default = "default_strict_account_codes")]
    pub strict_account_codes: bool,
    /// Code of the composite holding bridge liability accounts.
    #[serde(default = "default_bridge_liabilities")]
    pub bridge_liabilities_code: String,
    /// Code of the composite holding bridge asset accounts.
    #[serde(default = "default_bridge_assets")]
    pub bridge_assets_code: String,
    /// How many times a snapshot write is retried after a version conflict.
    #[serde(default = "default_max_apply_retries")]
    pub max_apply_retries: u32,
    /// Maximum entries held by the snapshot read cache.
    #[serde(default = "default_snapshot_cache_capacity")]
    pub snapshot_cache_capacity: u64,
    /// Time-to-live of snapshot read cache entries, in seconds.
    #[serde(default = "default_snapshot_cache_ttl")]
    pub snapshot_cache_ttl_secs: u64,
    /// IANA time zone used for limit windows when a limit names none.
    #[serde(default = "default_time_zone")]
    pub default_time_zone: String,
}

fn default_padding() -> usize {
    2
}

fn default_strict_account_codes() -> bool {
    true
}

fn default_bridge_liabilities() -> String {
    "bridge-liabilities".to_string()
}

fn default_bridge_assets() -> String {
    "bridge-assets".to_string()
}

fn default_max_apply_retries() -> u32 {
    3
}

fn default_snapshot_cache_capacity() -> u64 {
    10_000
}

fn default_snapshot_cache_ttl() -> u64 {
    300 // 5 minutes
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_padding: default_padding(),
            strict_account_codes: default_strict_account_codes(),
            bridge_liabilities_code: default_bridge_liabilities(),
            bridge_assets_code: default_bridge_assets(),
            max_apply_retries: default_max_apply_retries(),
            snapshot_cache_capacity: default_snapshot_cache_capacity(),
            snapshot_cache_ttl_secs: default_snapshot_cache_ttl(),
            default_time_zone: default_time_zone(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "minigl_core=info,minigl_seeder=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("MINIGL").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_sources() {
        let config = temp_env::with_vars_unset(
            ["MINIGL__LEDGER__MAX_APPLY_RETRIES", "MINIGL__LOGGING__JSON"],
            AppConfig::load,
        )
        .unwrap();

        assert_eq!(config.ledger.default_padding, 2);
        assert!(config.ledger.strict_account_codes);
        assert_eq!(config.ledger.max_apply_retries, 3);
        assert_eq!(config.ledger.default_time_zone, "UTC");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_environment_overrides() {
        let config = temp_env::with_vars(
            [
                ("MINIGL__LEDGER__MAX_APPLY_RETRIES", Some("7")),
                ("MINIGL__LEDGER__BRIDGE_ASSETS_CODE", Some("99")),
                ("MINIGL__LOGGING__JSON", Some("true")),
            ],
            AppConfig::load,
        )
        .unwrap();

        assert_eq!(config.ledger.max_apply_retries, 7);
        assert_eq!(config.ledger.bridge_assets_code, "99");
        assert!(config.logging.json);
        assert_eq!(config.ledger.default_padding, 2);
    }
}
