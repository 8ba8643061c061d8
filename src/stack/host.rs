//! Host preparation: packages, repositories, toolchain, compatibility checks

use crate::core::config::StackConfig;
use crate::core::template::{render, write_config};
use crate::core::{Context, ContextDelta, Step, StepError};
use crate::stack::services::Collaborators;
use crate::stack::shell::{all_on_path, cmd, on_path, sh};
use crate::stack::templates;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const BASE_PACKAGES: &[&str] = &[
    "software-properties-common",
    "curl",
    "apt-transport-https",
    "ca-certificates",
    "gnupg",
    "lsb-release",
    "jq",
    "unzip",
    "tar",
    "cron",
];

const BASE_TOOLS: &[&str] = &["curl", "gpg", "jq", "unzip", "tar", "add-apt-repository", "lsb_release"];

const SOURCES_DIR: &str = "/etc/apt/sources.list.d";
const REDIS_KEYRING: &str = "/usr/share/keyrings/redis-archive-keyring.gpg";

/// PHP with the extensions the panel needs, plus the database, web and cache servers
pub fn runtime_packages(php_version: &str) -> Vec<String> {
    let mut packages = vec![format!("php{}", php_version)];
    packages.extend(
        [
            "common", "cli", "gd", "mysql", "mbstring", "bcmath", "xml", "fpm", "curl", "zip",
        ]
        .iter()
        .map(|ext| format!("php{}-{}", php_version, ext)),
    );
    packages.extend(["mariadb-server", "nginx", "redis-server", "git"].map(String::from));
    packages
}

fn runtime_binaries(config: &StackConfig) -> Vec<String> {
    vec![
        format!("php{}", config.panel.php_version),
        config.fpm_binary(),
        "mariadbd".to_string(),
        "nginx".to_string(),
        "redis-server".to_string(),
        "git".to_string(),
    ]
}

fn source_list_mentions(fragment: &str) -> bool {
    std::fs::read_dir(SOURCES_DIR)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .any(|e| e.file_name().to_string_lossy().contains(fragment))
        })
        .unwrap_or(false)
}

/// Warning for virtualization types the container runtime handles badly
pub fn virtualization_warning(virt: &str) -> Option<String> {
    (virt.contains("openvz") || virt.contains("lxc")).then(|| {
        format!(
            "{} detected; the container runtime may not work properly in this environment",
            virt
        )
    })
}

/// Warning for kernels known to lack container features
pub fn kernel_warning(kernel: &str) -> Option<String> {
    (kernel.ends_with("-grs-ipv6-64") || kernel.ends_with("-mod-std-ipv6-64")).then(|| {
        format!(
            "kernel {} may not support important container features",
            kernel
        )
    })
}

pub fn system_packages(c: &Collaborators) -> Step {
    let packages = c.packages.clone();
    Step::from_fn("system-packages", move |_ctx: Context| {
        let packages = packages.clone();
        async move {
            packages.refresh().await?;
            let names: Vec<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
            packages.install(&names).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Install base system tools")
    .skip_if_fn(|| async { all_on_path(BASE_TOOLS) })
}

pub fn package_repositories(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    Step::from_fn("package-repositories", move |ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            shell
                .run(
                    cmd("add-apt-repository")
                        .args(["-y", "ppa:ondrej/php"])
                        .env("LC_ALL", "C.UTF-8"),
                )
                .await?;

            // The Redis signing key is optional; the repository list still goes in
            let key_tmp = "/tmp/redis.gpg";
            match shell
                .run(cmd("curl").args(["-fsSL", cfg.cache.repo_key_url.as_str(), "-o", key_tmp]))
                .await
            {
                Ok(_) => {
                    if let Err(e) = shell
                        .run(cmd("gpg").args(["--batch", "--yes", "--dearmor", "-o", REDIS_KEYRING, key_tmp]))
                        .await
                    {
                        warn!("Could not install Redis signing key: {}", e);
                    }
                }
                Err(e) => warn!("Could not fetch Redis signing key, continuing without it: {}", e),
            }

            let codename = shell.run(cmd("lsb_release").arg("-cs")).await?.trim().to_string();
            let locals = HashMap::from([("CODENAME", codename.clone())]);
            let source = render(templates::REDIS_SOURCE, &ctx, &locals)?;
            write_config(&Path::new(SOURCES_DIR).join("redis.list"), &source).await?;

            let setup = "/tmp/mariadb_repo_setup";
            shell
                .run(cmd("curl").args(["-LsS", cfg.database.repo_setup_url.as_str(), "-o", setup]))
                .await
                .map_err(|e| {
                    StepError::action_with(
                        "Failed to download MariaDB repository setup script",
                        e.diagnostic().unwrap_or_default().to_string(),
                    )
                })?;
            shell.run(cmd("bash").arg(setup)).await?;
            let _ = tokio::fs::remove_file(setup).await;

            Ok(ContextDelta::none().bind("DISTRO_CODENAME", codename))
        }
    })
    .describe("Add PHP, Redis and MariaDB package repositories")
    .skip_if_fn(|| async {
        source_list_mentions("ondrej") && source_list_mentions("redis") && source_list_mentions("mariadb")
    })
}

pub fn runtime_packages_step(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let packages = c.packages.clone();
    let binaries = runtime_binaries(config);
    Step::from_fn("runtime-packages", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        let packages = packages.clone();
        async move {
            packages.refresh().await?;
            let root = &cfg.database.root_password;
            let preseed = format!(
                "mariadb-server mysql-server/root_password password {root}\n\
                 mariadb-server mysql-server/root_password_again password {root}\n"
            );
            shell
                .run(cmd("debconf-set-selections").stdin(preseed).sensitive())
                .await?;
            packages.install(&runtime_packages(&cfg.panel.php_version)).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Install PHP, MariaDB, nginx and Redis")
    .skip_if_fn(move || {
        let ready = binaries.iter().all(|b| on_path(b));
        async move { ready }
    })
}

pub fn composer(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let url = config.panel.composer_installer_url.clone();
    let shell = c.shell.clone();
    Step::from_fn("composer", move |_ctx: Context| {
        let shell = shell.clone();
        let script = format!(
            "curl -sS {} | php -- --install-dir=/usr/local/bin --filename=composer",
            url
        );
        async move {
            shell.run(sh(script)).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Install Composer")
    .skip_if_fn(|| async { on_path("composer") })
}

pub fn host_compatibility(c: &Collaborators) -> Step {
    let shell = c.shell.clone();
    Step::from_fn("host-compatibility", move |_ctx: Context| {
        let shell = shell.clone();
        async move {
            // systemd-detect-virt exits non-zero when it prints "none"
            let virt = match shell.output(cmd("systemd-detect-virt")).await {
                Ok(out) if !out.stdout.trim().is_empty() => out.stdout.trim().to_string(),
                _ => "unknown".to_string(),
            };
            let kernel = shell.run(cmd("uname").arg("-r")).await?.trim().to_string();

            info!("Virtualization: {}, kernel: {}", virt, kernel);
            for warning in [virtualization_warning(&virt), kernel_warning(&kernel)]
                .into_iter()
                .flatten()
            {
                warn!("{}", warning);
            }

            Ok(ContextDelta::none()
                .bind("VIRT_TYPE", virt)
                .bind("KERNEL_VERSION", kernel))
        }
    })
    .describe("Check virtualization and kernel compatibility")
    .soft()
}

pub fn container_runtime_install(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let url = config.container.install_script_url.clone();
    let shell = c.shell.clone();
    Step::from_fn("container-runtime-install", move |_ctx: Context| {
        let shell = shell.clone();
        let script = format!("curl -sSL {} | CHANNEL=stable bash", url);
        async move {
            shell.run(sh(script)).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Install Docker")
    .skip_if_fn(|| async { on_path("docker") })
}

pub fn swap(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let containers = c.containers.clone();
    let check_path = config.swap.path.clone();
    Step::from_fn("swap", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            let path = cfg.swap.path.display().to_string();
            info!("No swap limit support; creating a {} swap file at {}", cfg.swap.size, path);
            shell
                .run(cmd("fallocate").args(["-l", cfg.swap.size.as_str(), path.as_str()]))
                .await?;
            shell.run(cmd("chmod").args(["600", path.as_str()])).await?;
            shell.run(cmd("mkswap").arg(path.as_str())).await?;
            shell.run(cmd("swapon").arg(path.as_str())).await?;
            let status = shell.run(cmd("swapon").arg("--show")).await?;
            info!("Swap status:\n{}", status.trim_end());
            Ok(ContextDelta::none())
        }
    })
    .describe("Enable a swap file when swap limits are unsupported")
    .soft()
    .skip_if_fn(move || {
        let containers = containers.clone();
        let exists = check_path.exists();
        async move {
            if exists {
                return true;
            }
            matches!(containers.info().await, Ok(info) if info.swap_limit)
        }
    })
}
