// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::config::traits::Configurator;
use crate::version::Version;

/// Environment variable naming the TOML configuration file
pub const CONFIG_ENV: &str = "CRX_UPDATER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding one subdirectory per installed component
    pub components_dir: PathBuf,

    /// Directory for downloaded packages and resumable partials
    pub download_dir: PathBuf,

    /// SQLite database path for update history
    pub history_db_path: PathBuf,

    /// Update check endpoints, tried in order
    pub update_urls: Vec<String>,

    /// Ping endpoints, tried in order. Empty disables pings.
    #[serde(default)]
    pub ping_urls: Vec<String>,

    /// Local API bind address (e.g., "127.0.0.1:8080")
    pub local_api_bind: SocketAddr,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    pub initial_delay_secs: u64,
    pub next_check_delay_secs: u64,
    pub step_delay_secs: u64,
    pub step_delay_medium_secs: u64,
    pub minimum_recheck_wait_secs: u64,
    pub on_demand_delay_secs: u64,

    /// Allow differential packages
    pub deltas_enabled: bool,

    /// Allow resumable background downloads for components that opt in
    pub background_downloads: bool,

    /// Version of the host application
    pub host_version: Version,

    pub channel: String,
    pub lang: String,

    /// Free-form attributes appended to every update check
    #[serde(default)]
    pub extra_request_params: String,

    /// File-based components registered at startup
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
}

/// Declaration of one file-based component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,

    /// Hex encoded SHA-256 of the component's public key
    pub public_key_sha256: String,

    /// Files that must exist in an install directory for it to be valid
    #[serde(default)]
    pub required_files: Vec<String>,

    #[serde(default)]
    pub allow_background_download: bool,

    /// Static attributes sent with every check for this component
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from TOML file with environment variable overrides
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as `load`, reading variables through `lookup`
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let config_path = lookup(CONFIG_ENV).unwrap_or_else(|| "config.toml".to_string());

        let mut config: Config = if std::path::Path::new(&config_path).exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)?
        } else {
            // Use default configuration
            Config::default()
        };

        // Apply environment variable overrides
        if let Some(val) = lookup("CRX_UPDATER_COMPONENTS_DIR") {
            config.components_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("CRX_UPDATER_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("CRX_UPDATER_HISTORY_DB_PATH") {
            config.history_db_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("CRX_UPDATER_UPDATE_URLS") {
            config.update_urls = split_list(&val);
        }
        if let Some(val) = lookup("CRX_UPDATER_PING_URLS") {
            config.ping_urls = split_list(&val);
        }
        if let Some(val) = lookup("CRX_UPDATER_LOCAL_API_BIND") {
            config.local_api_bind = SocketAddr::from_str(&val)?;
        }
        if let Some(val) = lookup("CRX_UPDATER_LOG_LEVEL") {
            config.log_level = val;
        }
        if let Some(val) = lookup("CRX_UPDATER_LOG_JSON") {
            config.log_json = val.parse()?;
        }
        if let Some(val) = lookup("CRX_UPDATER_NEXT_CHECK_DELAY_SECS") {
            config.next_check_delay_secs = val.parse()?;
        }
        if let Some(val) = lookup("CRX_UPDATER_DELTAS_ENABLED") {
            config.deltas_enabled = val.parse()?;
        }
        if let Some(val) = lookup("CRX_UPDATER_BACKGROUND_DOWNLOADS") {
            config.background_downloads = val.parse()?;
        }
        if let Some(val) = lookup("CRX_UPDATER_HOST_VERSION") {
            config.host_version = val.parse()?;
        }
        if let Some(val) = lookup("CRX_UPDATER_CHANNEL") {
            config.channel = val;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.update_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one update URL is required"));
        }
        for url in self.update_urls.iter().chain(self.ping_urls.iter()) {
            Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid endpoint URL {}: {}", url, e))?;
        }
        for component in &self.components {
            let pk_hash = hex::decode(&component.public_key_sha256).map_err(|e| {
                anyhow::anyhow!("Component {} has an invalid public key hash: {}", component.name, e)
            })?;
            if pk_hash.len() != 32 {
                return Err(anyhow::anyhow!(
                    "Component {} public key hash must be 32 bytes, got {}",
                    component.name,
                    pk_hash.len()
                ));
            }
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_urls(urls: &[String]) -> Vec<Url> {
    urls.iter()
        .filter_map(|raw| match Url::parse(raw) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(url = %raw, error = %e, "Ignoring invalid endpoint URL");
                None
            }
        })
        .collect()
}

impl Configurator for Config {
    fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    fn next_check_delay(&self) -> Duration {
        Duration::from_secs(self.next_check_delay_secs)
    }

    fn step_delay(&self) -> Duration {
        Duration::from_secs(self.step_delay_secs)
    }

    fn step_delay_medium(&self) -> Duration {
        Duration::from_secs(self.step_delay_medium_secs)
    }

    fn minimum_recheck_wait(&self) -> Duration {
        Duration::from_secs(self.minimum_recheck_wait_secs)
    }

    fn on_demand_delay(&self) -> Duration {
        Duration::from_secs(self.on_demand_delay_secs)
    }

    fn update_urls(&self) -> Vec<Url> {
        parse_urls(&self.update_urls)
    }

    fn ping_urls(&self) -> Vec<Url> {
        parse_urls(&self.ping_urls)
    }

    fn host_version(&self) -> Version {
        self.host_version.clone()
    }

    fn channel(&self) -> String {
        self.channel.clone()
    }

    fn lang(&self) -> String {
        self.lang.clone()
    }

    fn extra_request_params(&self) -> String {
        self.extra_request_params.clone()
    }

    fn deltas_enabled(&self) -> bool {
        self.deltas_enabled
    }

    fn use_background_downloader(&self) -> bool {
        self.background_downloads
    }

    fn download_dir(&self) -> PathBuf {
        self.download_dir.clone()
    }
}

impl Default for Config {
    fn default() -> Self {
        let update_url = String::from("https://updates.example.com/service/update2/json");
        Self {
            components_dir: PathBuf::from("/var/lib/crx-updater/components"),
            download_dir: std::env::temp_dir().join("crx-updater-downloads"),
            history_db_path: PathBuf::from("history.db"),
            update_urls: vec![update_url.clone()],
            ping_urls: vec![update_url],
            local_api_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: String::from("info"),
            log_json: false,
            initial_delay_secs: 6 * 60,
            next_check_delay_secs: 5 * 60 * 60,
            step_delay_secs: 1,
            step_delay_medium_secs: 10,
            minimum_recheck_wait_secs: 5 * 60 * 60,
            on_demand_delay_secs: 30 * 60,
            deltas_enabled: true,
            background_downloads: true,
            host_version: Version::parse("1.0").unwrap_or_default(),
            channel: String::from("stable"),
            lang: String::from("en-US"),
            extra_request_params: String::new(),
            components: Vec::new(),
        }
    }
}
