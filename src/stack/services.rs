//! Collaborator seams and their command-backed implementations
//!
//! Steps talk to daemons and package tooling only through these traits so
//! scenario tests can substitute fakes for a real host.

use crate::core::config::{CacheConfig, DatabaseConfig, StackConfig, TunnelConfig, WebConfig};
use crate::core::template::{render, write_config};
use crate::core::{Context, StepError};
use crate::execution::{DaemonCommand, ProcessHandle, ProcessSupervisor, SupervisorError};
use crate::probe::{fetch_body, tail_lines};
use crate::stack::shell::{cmd, Shell};
use crate::stack::templates;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Bound on short status commands used by checks and probes
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

fn spawn_error(e: SupervisorError) -> StepError {
    StepError::action(e.to_string())
}

#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn refresh(&self) -> Result<(), StepError>;
    async fn install(&self, names: &[String]) -> Result<(), StepError>;
}

#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    async fn start(&self) -> Result<ProcessHandle, StepError>;
    async fn ping(&self) -> bool;
    /// Run SQL as the administrative user; returns tab-separated rows
    async fn execute(&self, statement: &str) -> Result<String, StepError>;
    async fn verify_login(&self, user: &str, password: &str, database: &str) -> Result<(), StepError>;
    fn log_path(&self) -> &Path;
}

#[async_trait]
pub trait CacheEngine: Send + Sync {
    async fn start(&self) -> Result<ProcessHandle, StepError>;
    async fn ping(&self) -> bool;
    fn log_path(&self) -> &Path;
}

/// Fields of `docker info` the pipeline looks at
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerInfo {
    pub server_version: String,
    pub driver: String,
    pub logging_driver: String,
    pub swap_limit: bool,
    pub warnings: Option<Vec<String>>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self) -> Result<ProcessHandle, StepError>;
    async fn info(&self) -> Result<ContainerInfo, StepError>;
    fn log_path(&self) -> &Path;
}

#[async_trait]
pub trait WebServer: Send + Sync {
    /// Render and enable the site configuration; returns the written path
    async fn render_config(&self, ctx: &Context) -> Result<PathBuf, StepError>;
    async fn test_config(&self) -> Result<(), StepError>;
    async fn start(&self) -> Result<ProcessHandle, StepError>;
    async fn reload(&self) -> Result<(), StepError>;
    fn log_paths(&self) -> Vec<PathBuf>;
}

#[async_trait]
pub trait Tunnel: Send + Sync {
    async fn start(&self, local_port: u16) -> Result<ProcessHandle, StepError>;
    /// The published endpoint, or `None` while the tunnel has none yet
    async fn query_public_endpoint(&self) -> Result<Option<String>, StepError>;
    fn log_path(&self) -> &Path;
}

/// Everything the stack pipeline drives
#[derive(Clone)]
pub struct Collaborators {
    pub shell: Shell,
    pub supervisor: ProcessSupervisor,
    pub packages: Arc<dyn PackageManager>,
    pub database: Arc<dyn DatabaseEngine>,
    pub cache: Arc<dyn CacheEngine>,
    pub containers: Arc<dyn ContainerRuntime>,
    pub web: Arc<dyn WebServer>,
    pub fpm: Arc<PhpFpm>,
    pub tunnel: Arc<dyn Tunnel>,
}

impl Collaborators {
    /// Real implementations for the local host
    pub fn system(config: &StackConfig) -> Self {
        let shell = Shell::new(config.sudo);
        let supervisor = ProcessSupervisor::new();
        Self {
            packages: Arc::new(Apt::new(shell.clone())),
            database: Arc::new(MariaDb::new(config, shell.clone(), supervisor.clone())),
            cache: Arc::new(Redis::new(config, shell.clone(), supervisor.clone())),
            containers: Arc::new(Docker::new(config, shell.clone(), supervisor.clone())),
            web: Arc::new(Nginx::new(config, shell.clone(), supervisor.clone())),
            fpm: Arc::new(PhpFpm::new(config, supervisor.clone())),
            tunnel: Arc::new(Ngrok::new(config, supervisor.clone())),
            shell,
            supervisor,
        }
    }
}

/// apt-get, non-interactive
pub struct Apt {
    shell: Shell,
}

impl Apt {
    pub fn new(shell: Shell) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl PackageManager for Apt {
    async fn refresh(&self) -> Result<(), StepError> {
        self.shell
            .run(cmd("apt-get").arg("update").env("DEBIAN_FRONTEND", "noninteractive"))
            .await?;
        Ok(())
    }

    async fn install(&self, names: &[String]) -> Result<(), StepError> {
        info!("Installing {} packages", names.len());
        self.shell
            .run(
                cmd("apt-get")
                    .args(["install", "-y"])
                    .args(names.iter().cloned())
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            )
            .await?;
        Ok(())
    }
}

pub struct MariaDb {
    shell: Shell,
    supervisor: ProcessSupervisor,
    config: DatabaseConfig,
    sudo: bool,
    log_path: PathBuf,
}

impl MariaDb {
    pub fn new(config: &StackConfig, shell: Shell, supervisor: ProcessSupervisor) -> Self {
        Self {
            shell,
            supervisor,
            config: config.database.clone(),
            sudo: config.sudo,
            log_path: config.log_path("mariadb.log"),
        }
    }
}

#[async_trait]
impl DatabaseEngine for MariaDb {
    async fn start(&self) -> Result<ProcessHandle, StepError> {
        self.shell.run(cmd("mkdir").args(["-p", "/var/run/mysqld"])).await?;
        self.shell
            .run(cmd("chown").args(["mysql:mysql", "/var/run/mysqld"]))
            .await?;
        self.supervisor
            .spawn(
                &DaemonCommand::new("mariadbd").arg("--user=mysql").privileged(self.sudo),
                &self.log_path,
            )
            .map_err(spawn_error)
    }

    async fn ping(&self) -> bool {
        self.shell
            .succeeds(
                cmd("mysqladmin")
                    .args(["-u", "root", "ping"])
                    .env("MYSQL_PWD", &self.config.root_password)
                    .timeout(STATUS_TIMEOUT)
                    .sensitive(),
            )
            .await
    }

    async fn execute(&self, statement: &str) -> Result<String, StepError> {
        self.shell
            .run(
                cmd("mariadb")
                    .args(["-u", "root", "-N", "-B"])
                    .env("MYSQL_PWD", &self.config.root_password)
                    .stdin(statement)
                    .sensitive(),
            )
            .await
    }

    async fn verify_login(&self, user: &str, password: &str, database: &str) -> Result<(), StepError> {
        self.shell
            .run(
                cmd("mariadb")
                    .args(["-u", user, "-h", self.config.host.as_str(), database, "-e", "SHOW TABLES;"])
                    .env("MYSQL_PWD", password)
                    .timeout(STATUS_TIMEOUT)
                    .sensitive(),
            )
            .await
            .map_err(|e| {
                StepError::action_with(
                    format!("Failed to connect with {} user", user),
                    e.diagnostic().unwrap_or_default().to_string(),
                )
            })?;
        Ok(())
    }

    fn log_path(&self) -> &Path {
        &self.log_path
    }
}

pub struct Redis {
    shell: Shell,
    supervisor: ProcessSupervisor,
    config: CacheConfig,
    sudo: bool,
    log_path: PathBuf,
}

impl Redis {
    pub fn new(config: &StackConfig, shell: Shell, supervisor: ProcessSupervisor) -> Self {
        Self {
            shell,
            supervisor,
            config: config.cache.clone(),
            sudo: config.sudo,
            log_path: config.log_path("redis.log"),
        }
    }
}

#[async_trait]
impl CacheEngine for Redis {
    async fn start(&self) -> Result<ProcessHandle, StepError> {
        self.supervisor
            .spawn(
                &DaemonCommand::new("redis-server")
                    .args(["--bind", self.config.host.as_str()])
                    .arg("--port")
                    .arg(self.config.port.to_string())
                    .privileged(self.sudo),
                &self.log_path,
            )
            .map_err(spawn_error)
    }

    async fn ping(&self) -> bool {
        let probe = cmd("redis-cli")
            .args(["-h", self.config.host.as_str()])
            .args(["-p", &self.config.port.to_string()])
            .arg("ping")
            .timeout(STATUS_TIMEOUT);
        matches!(self.shell.output(probe).await, Ok(out) if out.success() && out.stdout.contains("PONG"))
    }

    fn log_path(&self) -> &Path {
        &self.log_path
    }
}

pub struct Docker {
    shell: Shell,
    supervisor: ProcessSupervisor,
    storage_driver: String,
    sudo: bool,
    log_path: PathBuf,
}

impl Docker {
    pub fn new(config: &StackConfig, shell: Shell, supervisor: ProcessSupervisor) -> Self {
        Self {
            shell,
            supervisor,
            storage_driver: config.container.storage_driver.clone(),
            sudo: config.sudo,
            log_path: config.log_path("dockerd.log"),
        }
    }
}

#[async_trait]
impl ContainerRuntime for Docker {
    async fn start(&self) -> Result<ProcessHandle, StepError> {
        let command = DaemonCommand::new("dockerd")
            .args(["--bridge=none", "--iptables=false", "--ip6tables=false"])
            .arg(format!("--storage-driver={}", self.storage_driver))
            .privileged(self.sudo);
        self.supervisor.spawn(&command, &self.log_path).map_err(spawn_error)
    }

    async fn info(&self) -> Result<ContainerInfo, StepError> {
        let raw = self
            .shell
            .run(
                cmd("docker")
                    .args(["info", "--format", "{{json .}}"])
                    .timeout(STATUS_TIMEOUT),
            )
            .await?;
        parse_container_info(&raw)
    }

    fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Parse `docker info --format '{{json .}}'`
pub fn parse_container_info(raw: &str) -> Result<ContainerInfo, StepError> {
    serde_json::from_str(raw.trim())
        .map_err(|e| StepError::action_with(format!("Unreadable docker info: {}", e), raw.to_string()))
}

pub struct Nginx {
    shell: Shell,
    supervisor: ProcessSupervisor,
    config: WebConfig,
    panel_dir: PathBuf,
    sudo: bool,
    log_path: PathBuf,
    fpm_log_path: PathBuf,
}

impl Nginx {
    pub fn new(config: &StackConfig, shell: Shell, supervisor: ProcessSupervisor) -> Self {
        Self {
            shell,
            supervisor,
            config: config.web.clone(),
            panel_dir: config.panel.dir.clone(),
            sudo: config.sudo,
            log_path: config.log_path("nginx.log"),
            fpm_log_path: config.log_path("php-fpm.log"),
        }
    }

    fn site_file(&self) -> String {
        format!("{}.conf", self.config.site_name)
    }
}

#[async_trait]
impl WebServer for Nginx {
    async fn render_config(&self, ctx: &Context) -> Result<PathBuf, StepError> {
        let locals = HashMap::from([
            ("SITE_NAME", self.config.site_name.clone()),
            ("WEB_PORT", self.config.port.to_string()),
            ("PANEL_DIR", self.panel_dir.display().to_string()),
            ("FPM_SOCKET", self.config.fpm_socket.display().to_string()),
        ]);
        let contents = render(templates::NGINX_SITE, ctx, &locals)?;

        let available = self.config.sites_available.join(self.site_file());
        let enabled = self.config.sites_enabled.join(self.site_file());
        write_config(&available, &contents).await?;

        self.shell
            .run(cmd("rm").arg("-f").arg(self.config.sites_enabled.join("default").display().to_string()))
            .await?;
        self.shell
            .run(
                cmd("ln")
                    .arg("-sf")
                    .arg(available.display().to_string())
                    .arg(enabled.display().to_string()),
            )
            .await?;
        Ok(available)
    }

    async fn test_config(&self) -> Result<(), StepError> {
        self.shell.run(cmd("nginx").arg("-t")).await?;
        Ok(())
    }

    async fn start(&self) -> Result<ProcessHandle, StepError> {
        self.supervisor
            .spawn(
                &DaemonCommand::new("nginx").args(["-g", "daemon off;"]).privileged(self.sudo),
                &self.log_path,
            )
            .map_err(spawn_error)
    }

    async fn reload(&self) -> Result<(), StepError> {
        self.shell.run(cmd("nginx").args(["-s", "reload"])).await?;
        Ok(())
    }

    fn log_paths(&self) -> Vec<PathBuf> {
        vec![
            self.log_path.clone(),
            PathBuf::from(format!("/var/log/nginx/{}.app-error.log", self.config.site_name)),
            self.fpm_log_path.clone(),
        ]
    }
}

/// PHP FastCGI process manager
pub struct PhpFpm {
    supervisor: ProcessSupervisor,
    binary: String,
    socket: PathBuf,
    sudo: bool,
    log_path: PathBuf,
}

impl PhpFpm {
    pub fn new(config: &StackConfig, supervisor: ProcessSupervisor) -> Self {
        Self {
            supervisor,
            binary: config.fpm_binary(),
            socket: config.web.fpm_socket.clone(),
            sudo: config.sudo,
            log_path: config.log_path("php-fpm.log"),
        }
    }

    pub async fn start(&self) -> Result<ProcessHandle, StepError> {
        if let Some(run_dir) = self.socket.parent() {
            tokio::fs::create_dir_all(run_dir)
                .await
                .map_err(|e| StepError::action(format!("Failed to create {}: {}", run_dir.display(), e)))?;
        }
        self.supervisor
            .spawn(&DaemonCommand::new(&self.binary).arg("-F").privileged(self.sudo), &self.log_path)
            .map_err(spawn_error)
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Tunnel list returned by the ngrok agent API
#[derive(Debug, Deserialize)]
struct TunnelList {
    #[serde(default)]
    tunnels: Vec<TunnelEntry>,
}

#[derive(Debug, Deserialize)]
struct TunnelEntry {
    public_url: String,
}

/// First published URL in a tunnel API response
pub fn parse_public_endpoint(body: &str) -> Result<Option<String>, StepError> {
    let list: TunnelList = serde_json::from_str(body)
        .map_err(|e| StepError::action_with(format!("Unreadable tunnel API response: {}", e), body.to_string()))?;
    Ok(list
        .tunnels
        .into_iter()
        .map(|t| t.public_url)
        .find(|url| !url.is_empty()))
}

pub struct Ngrok {
    supervisor: ProcessSupervisor,
    config: TunnelConfig,
    sudo: bool,
    log_path: PathBuf,
}

impl Ngrok {
    pub fn new(config: &StackConfig, supervisor: ProcessSupervisor) -> Self {
        Self {
            supervisor,
            config: config.tunnel.clone(),
            sudo: config.sudo,
            log_path: config.log_path("ngrok.log"),
        }
    }
}

#[async_trait]
impl Tunnel for Ngrok {
    async fn start(&self, local_port: u16) -> Result<ProcessHandle, StepError> {
        let command = DaemonCommand::new(self.config.binary.display().to_string())
            .arg("http")
            .arg(local_port.to_string())
            .arg("--config")
            .arg(self.config.config_path.display().to_string())
            .args(["--log", "stdout"])
            .privileged(self.sudo);
        self.supervisor.spawn(&command, &self.log_path).map_err(spawn_error)
    }

    async fn query_public_endpoint(&self) -> Result<Option<String>, StepError> {
        let body = fetch_body(&self.config.api_url).await.map_err(|e| {
            StepError::action_with(
                format!("Tunnel API unavailable: {}", e),
                tail_lines(&self.log_path, 40).unwrap_or_default(),
            )
        })?;
        let endpoint = parse_public_endpoint(&body)?;
        debug!("Tunnel endpoint: {:?}", endpoint);
        Ok(endpoint)
    }

    fn log_path(&self) -> &Path {
        &self.log_path
    }
}
