use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::dates::AlertWindow;
use crate::sync::DEFAULT_MAX_RETRIES;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "PrepInventory";
const APP_NAME: &str = "prepinv";

const CONFIG_ENV: &str = "PREPINV_CONFIG";
const DATA_ENV: &str = "PREPINV_DATA";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    /// Explicit paths win over the environment, which wins over the
    /// platform defaults.
    pub fn with_overrides(config: Option<PathBuf>, data: Option<PathBuf>) -> Result<Self> {
        let config = config.or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));
        let data = data.or_else(|| env::var_os(DATA_ENV).map(PathBuf::from));
        let paths = ConfigPaths::resolve(config, data)?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
}

impl ConfigPaths {
    /// `config` may name either a directory or a config file.
    pub fn resolve(config: Option<PathBuf>, data: Option<PathBuf>) -> Result<Self> {
        let project_dirs = || {
            ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
                .context("resolving XDG project directories")
        };

        let config_dir = match &config {
            Some(p) if p.is_dir() || p.extension().is_none() => p.clone(),
            Some(p) => p.parent().map(Path::to_path_buf).unwrap_or_else(|| p.clone()),
            None => project_dirs()?.config_dir().to_path_buf(),
        };

        let config_file = config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_dir = match data {
            Some(dir) => dir,
            None => project_dirs()?.data_dir().to_path_buf(),
        };
        let database_path = data_dir.join("inventory.db");

        Ok(Self {
            config_dir,
            config_file,
            data_dir,
            database_path,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub storage: StorageOptions,
    pub display: DisplayConfig,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        if self.remote.timeout_secs == 0 {
            tracing::warn!("remote.timeout_secs must be positive, using default");
            self.remote.timeout_secs = RemoteConfig::default().timeout_secs;
        }
        if self.sync.max_retries == 0 {
            tracing::warn!("sync.max_retries must be positive, using default");
            self.sync.max_retries = DEFAULT_MAX_RETRIES;
        }
        if self.sync.interval_secs == 0 {
            tracing::warn!("sync.interval_secs must be positive, using default");
            self.sync.interval_secs = SyncConfig::default().interval_secs;
        }
        if let Some(endpoint) = &self.remote.endpoint {
            if endpoint.trim().is_empty() {
                self.remote.endpoint = None;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Spreadsheet web-app URL. Without it the app runs from cache only.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 15,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_retries: u32,
    pub interval_secs: u64,
    pub drain_on_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            interval_secs: 300,
            drain_on_start: true,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Alert window applied to new items that carry an expiration date but
    /// no explicit alert date.
    pub default_alert_window: Option<AlertWindow>,
    pub show_empty_sections: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            default_alert_window: None,
            show_empty_sections: true,
        }
    }
}
