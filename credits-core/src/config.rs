//! Configuration for the credits ledger
//!
//! All product knobs (bonus amount, extension fee, transfer limits) live
//! here and are consumed through [`ConfigHandle`], which re-reads the
//! backing file after a short TTL so operators can change fees without a
//! redeploy.

use chrono::FixedOffset;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Fixed UTC offset of the marketplace's local timezone, in minutes.
    /// Calendar-date logic (daily bonus) is anchored to this offset.
    pub timezone_offset_minutes: i32,

    /// Default lifetime of newly issued credits, in days. Also the fresh
    /// expiry horizon for transfer-in credits (transfers reset the clock).
    pub default_expiry_days: i64,

    /// Lifetime of stored idempotency records, in seconds
    pub idempotency_ttl_secs: u64,

    /// Daily bonus configuration
    pub daily_bonus: DailyBonusConfig,

    /// Expiry extension configuration
    pub extension: ExtensionConfig,

    /// Peer-to-peer transfer configuration
    pub transfer: TransferConfig,

    /// Background sweep configuration
    pub sweep: SweepConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/credits"),
            service_name: "credits-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            timezone_offset_minutes: 0,
            default_expiry_days: 90,
            idempotency_ttl_secs: 86_400,
            daily_bonus: DailyBonusConfig::default(),
            extension: ExtensionConfig::default(),
            transfer: TransferConfig::default(),
            sweep: SweepConfig::default(),
            rocksdb: RocksDbConfig::default(),
        }
    }
}

/// Daily bonus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBonusConfig {
    /// Granted amount
    pub amount: Decimal,

    /// Bonus credit lifetime in hours (designed to lapse by next midnight)
    pub validity_hours: i64,

    /// Feature flag
    pub enabled: bool,
}

impl Default for DailyBonusConfig {
    fn default() -> Self {
        Self {
            amount: Decimal::new(500, 2), // 5.00 credits
            validity_hours: 24,
            enabled: true,
        }
    }
}

/// Expiry extension configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Fee as a percentage of the remaining amount
    pub fee_percent: Decimal,

    /// Days added to the original expiry
    pub extra_days: i64,

    /// Feature flag
    pub enabled: bool,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            fee_percent: Decimal::from(20),
            extra_days: 30,
            enabled: true,
        }
    }
}

/// Peer-to-peer transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Maximum amount per transfer
    pub max_amount: Decimal,

    /// Maximum executed transfers per sender within the rolling window
    pub rate_limit_count: u32,

    /// Rolling window length in seconds
    pub rate_limit_window_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_amount: Decimal::from(10_000),
            rate_limit_count: 3,
            rate_limit_window_secs: 60,
        }
    }
}

/// Background sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Seconds between sweep passes
    pub interval_secs: u64,

    /// Accounts processed per short-lived lock batch
    pub batch_size: usize,

    /// Feature flag
    pub enabled: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3_600,
            batch_size: 64,
            enabled: true,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults with environment overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CREDITS_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(offset) = std::env::var("CREDITS_TZ_OFFSET_MINUTES") {
            config.timezone_offset_minutes = offset
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid timezone offset: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.extension.fee_percent < Decimal::ZERO || self.extension.fee_percent > Decimal::from(100) {
            return Err(crate::Error::Config(format!(
                "extension.fee_percent must be within [0, 100], got {}",
                self.extension.fee_percent
            )));
        }
        if self.transfer.max_amount <= Decimal::ZERO {
            return Err(crate::Error::Config(
                "transfer.max_amount must be positive".to_string(),
            ));
        }
        if self.default_expiry_days <= 0 {
            return Err(crate::Error::Config(
                "default_expiry_days must be positive".to_string(),
            ));
        }
        if self.extension.extra_days <= 0 {
            return Err(crate::Error::Config(
                "extension.extra_days must be positive".to_string(),
            ));
        }
        if self.daily_bonus.amount <= Decimal::ZERO || self.daily_bonus.validity_hours <= 0 {
            return Err(crate::Error::Config(
                "daily_bonus.amount and daily_bonus.validity_hours must be positive".to_string(),
            ));
        }
        if self.timezone().is_none() {
            return Err(crate::Error::Config(format!(
                "timezone_offset_minutes out of range: {}",
                self.timezone_offset_minutes
            )));
        }
        Ok(())
    }

    /// Fixed offset of the configured marketplace timezone
    pub fn timezone(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.timezone_offset_minutes * 60)
    }
}

struct CachedConfig {
    config: Config,
    loaded_at: Instant,
}

/// Live view of the configuration with hot-reload semantics.
///
/// `current()` returns the cached config and transparently re-reads the
/// backing file once the reload TTL has elapsed. A file that fails to parse
/// keeps the previous config in place.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<CachedConfig>>,
    source: Option<PathBuf>,
    reload_ttl: Duration,
}

impl ConfigHandle {
    /// Handle over a fixed config; never reloads
    pub fn fixed(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CachedConfig {
                config,
                loaded_at: Instant::now(),
            })),
            source: None,
            reload_ttl: Duration::from_secs(u64::MAX / 2),
        }
    }

    /// Handle backed by a TOML file, re-read after `reload_ttl`
    pub fn watching(path: impl Into<PathBuf>, reload_ttl: Duration) -> crate::Result<Self> {
        let path = path.into();
        let config = Config::from_file(&path)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(CachedConfig {
                config,
                loaded_at: Instant::now(),
            })),
            source: Some(path),
            reload_ttl,
        })
    }

    /// Current configuration snapshot
    pub fn current(&self) -> Config {
        if let Some(path) = &self.source {
            let stale = self.inner.read().loaded_at.elapsed() >= self.reload_ttl;
            if stale {
                match Config::from_file(path) {
                    Ok(fresh) => {
                        let mut guard = self.inner.write();
                        guard.config = fresh;
                        guard.loaded_at = Instant::now();
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Config reload failed, keeping previous");
                        self.inner.write().loaded_at = Instant::now();
                    }
                }
            }
        }
        self.inner.read().config.clone()
    }

    /// Replace the cached config (admin override, tests)
    pub fn replace(&self, config: Config) {
        let mut guard = self.inner.write();
        guard.config = config;
        guard.loaded_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "credits-core");
        assert_eq!(config.extension.fee_percent, Decimal::from(20));
        assert_eq!(config.extension.extra_days, 30);
        assert_eq!(config.transfer.rate_limit_count, 3);
        assert!(config.daily_bonus.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fee() {
        let mut config = Config::default();
        config.extension.fee_percent = Decimal::from(120);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fixed_handle_replace() {
        let handle = ConfigHandle::fixed(Config::default());
        assert!(handle.current().daily_bonus.enabled);

        let mut updated = Config::default();
        updated.daily_bonus.enabled = false;
        handle.replace(updated);
        assert!(!handle.current().daily_bonus.enabled);
    }

    #[test]
    fn test_watching_handle_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credits.toml");
        let config = Config::default();
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let handle = ConfigHandle::watching(&path, Duration::from_millis(0)).unwrap();
        assert_eq!(handle.current().extension.extra_days, 30);

        let mut updated = Config::default();
        updated.extension.extra_days = 45;
        std::fs::write(&path, toml::to_string(&updated).unwrap()).unwrap();
        assert_eq!(handle.current().extension.extra_days, 45);
    }
}
