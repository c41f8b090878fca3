//! Configuration: a single YAML document. Missing file creates one with
//! documented defaults and exits clean; invalid values reject with a
//! named `ScanError::Config` and a one-line diagnostic rather than
//! panicking.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scanner: ScannerConfig,
    pub discovery: DiscoveryConfig,
    pub concurrency: ConcurrencyConfig,
    pub memory: MemoryConfig,
    pub blacklist: BlacklistConfig,
    pub geolocation: GeolocationConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgresql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,
    pub path: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub pool_size: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            db_type: DatabaseType::Sqlite,
            path: Some("minescan.db".to_string()),
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
            pool_size: Some(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub timeout: f64,
    pub protocol_version: i32,
    pub scan_all_protocols: bool,
    pub protocol_versions: Vec<i32>,
    pub retries: u32,
    pub legacy_support: bool,
    pub rate_limit: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            timeout: 3.0,
            protocol_version: 770,
            scan_all_protocols: false,
            protocol_versions: vec![769, 767, 765, 47],
            retries: 1,
            legacy_support: true,
            rate_limit: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    Range,
    Masscan,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub method: DiscoveryMethod,
    pub ports: Vec<u16>,
    pub batch_size: usize,
    pub masscan_rate: Option<u32>,
    pub masscan_excludes: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            method: DiscoveryMethod::Range,
            ports: vec![25565],
            batch_size: 1000,
            masscan_rate: Some(10000),
            masscan_excludes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrent: usize,
    pub batch_size: usize,
    pub max_connections_per_host: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        ConcurrencyConfig {
            max_concurrent: 500,
            batch_size: 1000,
            max_connections_per_host: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub max_memory_mb: u64,
    pub gc_interval: u64,
    pub enable_monitoring: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            max_memory_mb: 2048,
            gc_interval: 1000,
            enable_monitoring: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistConfig {
    pub enabled: bool,
    pub auto_update: bool,
    pub file_path: Option<String>,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        BlacklistConfig {
            enabled: true,
            auto_update: false,
            file_path: Some("blacklist.txt".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoProviderKind {
    Geoip2,
    Ipapi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationConfig {
    pub enabled: bool,
    pub provider: GeoProviderKind,
    pub database_path: Option<String>,
    pub cache_duration: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        GeolocationConfig {
            enabled: false,
            provider: GeoProviderKind::Ipapi,
            database_path: None,
            cache_duration: 86400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub batch_size: usize,
    pub include_stats: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            enabled: false,
            url: None,
            batch_size: 50,
            include_stats: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig::default(),
            scanner: ScannerConfig::default(),
            discovery: DiscoveryConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            memory: MemoryConfig::default(),
            blacklist: BlacklistConfig::default(),
            geolocation: GeolocationConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Config {
    /// Cross-field invariants that must hold for the scanner to run.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.scanner.timeout <= 0.0 {
            return Err(ScanError::Config("scanner.timeout must be > 0".to_string()));
        }
        if self.scanner.rate_limit <= 0.0 {
            return Err(ScanError::Config(
                "scanner.rate_limit must be > 0".to_string(),
            ));
        }
        if self.scanner.scan_all_protocols && self.scanner.protocol_versions.is_empty() {
            return Err(ScanError::Config(
                "scanner.protocol_versions must be non-empty when scan_all_protocols is true"
                    .to_string(),
            ));
        }
        if self.discovery.ports.is_empty() {
            return Err(ScanError::Config(
                "discovery.ports must be non-empty".to_string(),
            ));
        }
        if self.concurrency.max_concurrent == 0 {
            return Err(ScanError::Config(
                "concurrency.max_concurrent must be > 0".to_string(),
            ));
        }
        if self.concurrency.batch_size == 0 {
            return Err(ScanError::Config(
                "concurrency.batch_size must be > 0".to_string(),
            ));
        }
        if self.memory.max_memory_mb == 0 {
            return Err(ScanError::Config(
                "memory.max_memory_mb must be > 0".to_string(),
            ));
        }
        if matches!(self.database.db_type, DatabaseType::Postgresql) && self.database.host.is_none()
        {
            return Err(ScanError::Config(
                "database.host is required when database.type is postgresql".to_string(),
            ));
        }
        if self.blacklist.enabled && self.blacklist.file_path.is_none() {
            return Err(ScanError::Config(
                "blacklist.file_path is required when blacklist.enabled is true".to_string(),
            ));
        }
        if self.webhook.enabled && self.webhook.url.is_none() {
            return Err(ScanError::Config(
                "webhook.url is required when webhook.enabled is true".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads the config at `path`, writing one with documented defaults if
/// the file doesn't exist.
pub fn load_or_init(path: &Path) -> Result<Config, ScanError> {
    if !path.exists() {
        log::info!(
            "no configuration file found at {}; writing defaults",
            path.display()
        );
        let config = Config::default();
        write(path, &config)?;
        return Ok(config);
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| ScanError::Config(format!("failed to read {}: {e}", path.display())))?;
    let config: Config = serde_yaml::from_str(&contents)
        .map_err(|e| ScanError::Config(format!("invalid configuration: {e}")))?;
    config.validate()?;
    Ok(config)
}

pub fn write(path: &Path, config: &Config) -> Result<(), ScanError> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| ScanError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, yaml)
        .map_err(|e| ScanError::Config(format!("failed to write {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_rate_limit_rejected() {
        let mut config = Config::default();
        config.scanner.rate_limit = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn webhook_without_url_rejected() {
        let mut config = Config::default();
        config.webhook.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn postgresql_without_host_rejected() {
        let mut config = Config::default();
        config.database.db_type = DatabaseType::Postgresql;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.scanner.timeout, config.scanner.timeout);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        let config = load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.scanner.protocol_version, 770);
    }
}
