use crate::models::{DatabaseRecord, HostKeyPolicy};
use crate::utils::error::{Result, TunnelError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Service for reading and writing the tunnel configuration
pub struct ConfigService {
    config_dir: PathBuf,
}

impl ConfigService {
    /// Create a new config service with default directory
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;

        // Create config directory if it doesn't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
            tracing::info!("Created config directory: {:?}", config_dir);

            // Records may hold passwords
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = fs::metadata(&config_dir)?.permissions();
                perms.set_mode(0o700);
                fs::set_permissions(&config_dir, perms)?;
            }
        }

        Ok(Self { config_dir })
    }

    /// Create a config service with custom directory
    pub fn with_dir(config_dir: PathBuf) -> Result<Self> {
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
        }
        Ok(Self { config_dir })
    }

    /// Get default config directory
    fn get_config_dir() -> Result<PathBuf> {
        ProjectDirs::from("com", "dbtunnel", "dbtunnel")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| TunnelError::Config("Failed to get config directory".to_string()))
    }

    fn databases_file(&self) -> PathBuf {
        self.config_dir.join("databases.toml")
    }

    fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.toml")
    }

    /// Load every database record, keyed by alias
    pub fn load_databases(&self) -> Result<BTreeMap<String, DatabaseRecord>> {
        let path = self.databases_file();

        if !path.exists() {
            tracing::info!("No databases file found at {:?}", path);
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&path)?;
        let config: DatabasesConfig = toml::from_str(&content)
            .map_err(|e| TunnelError::Config(format!("Failed to parse databases: {}", e)))?;

        tracing::debug!("Loaded {} database record(s)", config.databases.len());
        Ok(config.databases)
    }

    /// Save all database records
    pub fn save_databases(&self, databases: &BTreeMap<String, DatabaseRecord>) -> Result<()> {
        let config = DatabasesConfig {
            databases: databases.clone(),
        };

        let content = toml::to_string_pretty(&config)
            .map_err(|e| TunnelError::Config(format!("Failed to serialize databases: {}", e)))?;

        let path = self.databases_file();
        fs::write(&path, content)?;

        tracing::info!("Saved {} database record(s) to {:?}", databases.len(), path);
        Ok(())
    }

    /// Get a database record by alias
    pub fn get_database(&self, alias: &str) -> Result<Option<DatabaseRecord>> {
        Ok(self.load_databases()?.remove(alias))
    }

    /// Load tunnel settings
    pub fn load_settings(&self) -> Result<TunnelSettings> {
        let path = self.settings_file();

        if !path.exists() {
            tracing::debug!("No settings file found, using defaults");
            return Ok(TunnelSettings::default());
        }

        let content = fs::read_to_string(&path)?;
        let settings: TunnelSettings = toml::from_str(&content)
            .map_err(|e| TunnelError::Config(format!("Failed to parse settings: {}", e)))?;

        Ok(settings)
    }

    /// Save tunnel settings
    pub fn save_settings(&self, settings: &TunnelSettings) -> Result<()> {
        let content = toml::to_string_pretty(settings)
            .map_err(|e| TunnelError::Config(format!("Failed to serialize settings: {}", e)))?;

        let path = self.settings_file();
        fs::write(&path, content)?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabasesConfig {
    #[serde(default)]
    databases: BTreeMap<String, DatabaseRecord>,
}

/// Settings shared by every tunnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelSettings {
    /// Fill gaps in records from the user's SSH client config
    #[serde(default)]
    pub use_ssh_config: bool,

    /// Overrides `~/.ssh/config`
    #[serde(default)]
    pub ssh_config_path: Option<PathBuf>,

    /// Offer ssh-agent identities
    #[serde(default = "default_use_agent")]
    pub use_agent: bool,

    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,

    /// Overrides `~/.ssh/known_hosts`
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,

    /// Address the local listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_use_agent() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_connect_timeout() -> u64 {
    crate::models::connection::DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            use_ssh_config: false,
            ssh_config_path: None,
            use_agent: default_use_agent(),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            bind_address: default_bind_address(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}
