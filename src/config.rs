use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::host::ConfigurationStore;
use crate::models::{OctaneConfiguration, ProxyConfiguration};

/// Configuration file structure for the bridge.
///
/// Loaded from the current directory or an explicit path; every section is
/// optional and falls back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Dispatcher and runner policy
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// GitLab host adapter settings
    #[serde(default)]
    pub gitlab: GitLabConfig,

    /// Octane server connection, if the host has been configured
    #[serde(default)]
    pub octane: Option<OctaneConfiguration>,

    /// Outbound proxy
    #[serde(default)]
    pub proxy: Option<ProxySettings>,

    /// Writable storage for the integration
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BridgeConfig {
    /// Upper bound for any single dispatched operation
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Operations allowed to run at the same time
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,

    /// Identical runs inside this window are submitted once (0 disables)
    #[serde(default = "default_run_dedup_window_secs")]
    pub run_dedup_window_secs: u64,

    /// Builds returned by history queries without an explicit limit
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab personal access token
    pub token: Option<String>,

    /// GitLab instance base URL
    #[serde(default = "default_gitlab_base_url")]
    pub base_url: String,

    /// Projects exposed as jobs; empty means every membership project
    #[serde(default)]
    pub projects: Vec<String>,

    /// Ref used when triggering pipelines
    #[serde(default = "default_ref")]
    pub default_ref: String,

    /// Whether GitLab may run several pipelines of a project at once
    #[serde(default = "default_true")]
    pub allow_concurrent_runs: bool,

    /// Instance id reported in server info
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Hosts reached directly: exact names or `*.suffix` wildcards
    #[serde(default)]
    pub no_proxy_hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    pub dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: default_operation_timeout_secs(),
            max_concurrent_operations: default_max_concurrent_operations(),
            run_dedup_window_secs: default_run_dedup_window_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_gitlab_base_url(),
            projects: Vec::new(),
            default_ref: default_ref(),
            allow_concurrent_runs: true,
            instance_id: default_instance_id(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_operations() -> usize {
    16
}

fn default_run_dedup_window_secs() -> u64 {
    10
}

fn default_history_limit() -> usize {
    25
}

fn default_gitlab_base_url() -> String {
    "https://gitlab.com".to_string()
}

fn default_ref() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_instance_id() -> String {
    "gitlab".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

impl BridgeConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn run_dedup_window(&self) -> Duration {
        Duration::from_secs(self.run_dedup_window_secs)
    }
}

impl ProxySettings {
    /// Whether `target_host` bypasses the proxy.
    pub fn bypasses(&self, target_host: &str) -> bool {
        let target = target_host.trim().to_ascii_lowercase();
        self.no_proxy_hosts.iter().any(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            match pattern.strip_prefix("*.") {
                Some(suffix) => target == suffix || target.ends_with(&format!(".{suffix}")),
                None => target == pattern,
            }
        })
    }

    pub fn to_proxy_configuration(&self) -> ProxyConfiguration {
        ProxyConfiguration {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./octane-bridge.toml
    /// 3. ./octane-bridge.json
    /// 4. ./octane-bridge.yaml
    /// 5. ./octane-bridge.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if path.exists() {
                return Self::load_from_path(path);
            }
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let candidates = [
            "octane-bridge.toml",
            "octane-bridge.json",
            "octane-bridge.yaml",
            "octane-bridge.yml",
        ];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        debug!("Loading configuration from {}", path.display());

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

/// Serves the host-managed settings of a [`Config`].
///
/// Readers always get owned copies taken under a read lock, so a reload
/// never produces a half-updated view.
#[derive(Debug)]
pub struct FileConfigurationStore {
    config: RwLock<Config>,
}

impl FileConfigurationStore {
    pub fn new(config: Config) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Swaps in a freshly loaded configuration.
    pub fn reload(&self, path: Option<&Path>) -> Result<()> {
        let fresh = Config::load(path)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        Ok(())
    }

    pub fn snapshot(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ConfigurationStore for FileConfigurationStore {
    fn allowed_storage(&self) -> Option<PathBuf> {
        let configured = self.snapshot().storage.dir;
        let dir = configured.or_else(|| dirs::data_local_dir().map(|d| d.join("octane-ci-bridge")))?;

        match std::fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                warn!("Storage directory {} is not usable: {e}", dir.display());
                None
            }
        }
    }

    fn octane_configuration(&self) -> Option<OctaneConfiguration> {
        self.snapshot().octane
    }

    fn proxy_configuration(&self, target_host: &str) -> Option<ProxyConfiguration> {
        let proxy = self.snapshot().proxy?;
        if proxy.bypasses(target_host) {
            debug!("Target host {target_host} bypasses the proxy");
            return None;
        }
        Some(proxy.to_proxy_configuration())
    }
}
