//! Exporter configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port registered for this exporter on the Prometheus default port list
pub const DEFAULT_PORT: u16 = 9204;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub health: HealthSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// IPv4 or IPv6 literal to listen on
    #[serde(default = "ServerSettings::default_address")]
    pub bind_address: String,
    #[serde(default = "ServerSettings::default_port")]
    pub bind_port: u16,
    /// IPV6_V6ONLY for IPv6 listeners (0 or 1); unset keeps the OS default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_v6only: Option<u8>,
    /// HTTP worker threads; unset means min(32, cpus + 4)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_count: Option<usize>,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: Self::default_address(),
            bind_port: Self::default_port(),
            bind_v6only: None,
            thread_count: None,
            log_level: Self::default_log_level(),
        }
    }
}

impl ServerSettings {
    fn default_address() -> String {
        "::".to_string()
    }

    fn default_port() -> u16 {
        DEFAULT_PORT
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Seconds between health checks
    #[serde(default = "HealthSettings::default_interval")]
    pub interval_secs: u64,
    /// Timeout of the HTTP self-probe in seconds
    #[serde(default = "HealthSettings::default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: Self::default_interval(),
            probe_timeout_secs: Self::default_probe_timeout(),
        }
    }
}

impl HealthSettings {
    fn default_interval() -> u64 {
        30
    }

    fn default_probe_timeout() -> u64 {
        5
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl ExporterConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/temper-exporter/exporter.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: ExporterConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("temper-exporter").join("exporter.toml")
        } else {
            PathBuf::from(".config/temper-exporter/exporter.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.bind_ip()?;

        if let Some(v6only) = self.server.bind_v6only {
            if v6only > 1 {
                return Err(anyhow!("Invalid bind_v6only {}, must be 0 or 1", v6only));
            }
        }

        if self.server.thread_count == Some(0) {
            return Err(anyhow!("thread_count must be greater than 0"));
        }

        if self.health.interval_secs == 0 {
            return Err(anyhow!("health.interval_secs must be greater than 0"));
        }
        if self.health.probe_timeout_secs == 0 {
            return Err(anyhow!("health.probe_timeout_secs must be greater than 0"));
        }

        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr> {
        self.server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.server.bind_address))
    }

    pub fn v6only(&self) -> Option<bool> {
        self.server.bind_v6only.map(|v| v != 0)
    }

    pub fn threads(&self) -> usize {
        self.server
            .thread_count
            .unwrap_or_else(crate::network::default_thread_count)
    }
}

/// Load a config file, expanding a leading `~`
pub fn load_config(path: &str) -> Result<ExporterConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    ExporterConfig::load(Some(path_buf))
}
