//! Stack configuration from YAML
//!
//! Every field has a default, so a run with no configuration file provisions
//! the stack exactly as the stock installer would.

use crate::probe::RetryPolicy;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

fn policy(interval_secs: u64, max_attempts: u32) -> RetryPolicy {
    // Literal defaults, both non-zero
    RetryPolicy::from_secs(interval_secs, max_attempts).unwrap_or_else(|_| unreachable!())
}

/// Top-level stack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Pipeline name shown in reports
    pub name: String,

    /// Directory for daemon log artifacts
    pub log_dir: PathBuf,

    /// Prefix privileged commands with sudo
    pub sudo: bool,

    /// Random bytes per generated secret
    pub secret_bytes: usize,

    pub panel: PanelConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub container: ContainerConfig,
    pub web: WebConfig,
    pub tunnel: TunnelConfig,
    pub agent: AgentConfig,
    pub swap: SwapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub dir: PathBuf,
    pub release_url: String,
    pub php_version: String,
    /// Provisional APP_URL until the tunnel publishes an endpoint
    pub local_url: String,
    pub admin_email: String,
    pub admin_username: String,
    pub admin_first_name: String,
    pub admin_last_name: String,
    /// Linux user owning the web root
    pub web_user: String,
    pub composer_installer_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub root_password: String,
    pub name: String,
    pub user: String,
    pub host: String,
    pub port: u16,
    pub repo_setup_url: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub repo_key_url: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub install_script_url: String,
    pub storage_driver: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
    pub site_name: String,
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
    pub fpm_socket: PathBuf,
    pub retry: RetryPolicy,
    pub fpm_retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Environment variable holding the tunnel auth token
    pub authtoken_env: String,
    pub download_url: String,
    pub binary: PathBuf,
    pub config_path: PathBuf,
    pub api_url: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub binary: PathBuf,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub release_url_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    pub path: PathBuf,
    pub size: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "panel-stack".to_string(),
            log_dir: PathBuf::from("/var/log"),
            sudo: false,
            secret_bytes: crate::secret::DEFAULT_SECRET_BYTES,
            panel: PanelConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            container: ContainerConfig::default(),
            web: WebConfig::default(),
            tunnel: TunnelConfig::default(),
            agent: AgentConfig::default(),
            swap: SwapConfig::default(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/www/pterodactyl"),
            release_url: "https://github.com/pterodactyl/panel/releases/latest/download/panel.tar.gz".to_string(),
            php_version: "8.3".to_string(),
            local_url: "http://127.0.0.1".to_string(),
            admin_email: "admin@example.com".to_string(),
            admin_username: "admin".to_string(),
            admin_first_name: "Admin".to_string(),
            admin_last_name: "User".to_string(),
            web_user: "www-data".to_string(),
            composer_installer_url: "https://getcomposer.org/installer".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            root_password: "rootpassword".to_string(),
            name: "panel".to_string(),
            user: "pterodactyl".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3306,
            repo_setup_url: "https://r.mariadb.com/downloads/mariadb_repo_setup".to_string(),
            retry: policy(1, 30),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            repo_key_url: "https://packages.redis.io/gpg".to_string(),
            retry: policy(1, 30),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            install_script_url: "https://get.docker.com/".to_string(),
            storage_driver: "vfs".to_string(),
            retry: policy(2, 15),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 80,
            site_name: "pterodactyl".to_string(),
            sites_available: PathBuf::from("/etc/nginx/sites-available"),
            sites_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
            fpm_socket: PathBuf::from("/run/php/php8.3-fpm.sock"),
            retry: policy(1, 15),
            fpm_retry: policy(1, 15),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            authtoken_env: "NGROK_AUTHTOKEN".to_string(),
            download_url: "https://bin.equinox.io/c/bNyj1mQVY4c/ngrok-v3-stable-linux-amd64.tgz".to_string(),
            binary: PathBuf::from("/usr/local/bin/ngrok"),
            config_path: PathBuf::from("/root/.config/ngrok/ngrok.yml"),
            api_url: "http://127.0.0.1:4040/api/tunnels".to_string(),
            retry: policy(2, 15),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/local/bin/wings"),
            config_dir: PathBuf::from("/etc/pterodactyl"),
            data_dir: PathBuf::from("/var/lib/pterodactyl/volumes"),
            log_dir: PathBuf::from("/var/log/pterodactyl"),
            release_url_base: "https://github.com/pterodactyl/wings/releases/latest/download".to_string(),
        }
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/swapfile"),
            size: "1G".to_string(),
        }
    }
}

impl StackConfig {
    /// Load stack configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse stack configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: StackConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration: explicit file, then the user config file, then defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                debug!("Using configuration from {}", path.display());
                Self::from_file(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// `$XDG_CONFIG_HOME/stackup/stackup.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("stackup").join("stackup.yaml"))
    }

    /// Validate the stack configuration
    pub fn validate(&self) -> Result<()> {
        if self.secret_bytes == 0 {
            anyhow::bail!("secret_bytes must be greater than zero");
        }
        if self.panel.php_version.trim().is_empty() {
            anyhow::bail!("panel.php_version must not be empty");
        }
        if self.tunnel.authtoken_env.trim().is_empty() {
            anyhow::bail!("tunnel.authtoken_env must name an environment variable");
        }
        for (field, value) in [
            ("panel.admin_username", &self.panel.admin_username),
            ("database.name", &self.database.name),
            ("database.user", &self.database.user),
        ] {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                anyhow::bail!("{} must be a non-empty identifier, got '{}'", field, value);
            }
        }
        Ok(())
    }

    /// Log artifact path for a daemon
    pub fn log_path(&self, file_name: &str) -> PathBuf {
        self.log_dir.join(file_name)
    }

    /// php-fpm binary name for the configured PHP version
    pub fn fpm_binary(&self) -> String {
        format!("php-fpm{}", self.panel.php_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_match_stock_install() {
        let config = StackConfig::default();
        assert_eq!(config.database.retry.max_attempts(), 30);
        assert_eq!(config.database.retry.interval(), Duration::from_secs(1));
        assert_eq!(config.secret_bytes, 12);
        assert_eq!(config.fpm_binary(), "php-fpm8.3");
        assert_eq!(config.log_path("mariadb.log"), PathBuf::from("/var/log/mariadb.log"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
log_dir: "/tmp/stack-logs"
database:
  root_password: "hunter2"
  retry:
    interval_secs: 2
    max_attempts: 10
"#;
        let config = StackConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("/tmp/stack-logs"));
        assert_eq!(config.database.root_password, "hunter2");
        assert_eq!(config.database.retry.max_attempts(), 10);
        assert_eq!(config.database.name, "panel");
        assert_eq!(config.cache.port, 6379);
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let yaml = "database:\n  user: \"bad'user\"\n";
        assert!(StackConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_retry_rejected() {
        let yaml = "cache:\n  retry:\n    interval_secs: 1\n    max_attempts: 0\n";
        assert!(StackConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"name: \"lab\"\n").unwrap();
        let config = StackConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.name, "lab");
    }
}
