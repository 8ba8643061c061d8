//! Long-running services: start detached, then wait for readiness

use crate::core::config::StackConfig;
use crate::core::template::{render, write_config};
use crate::core::{Context, ContextDelta, Step, StepError};
use crate::probe::{tail_lines, FnProbe, HttpProbe, ProbeCheck, ReadinessProbe, UnixSocketProbe};
use crate::stack::services::Collaborators;
use crate::stack::shell::cmd;
use crate::stack::templates;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const DIAGNOSTIC_LINES: usize = 40;

/// Marker the panel's landing page must contain
pub const HTML_MARKER: &str = "html";

/// Probe from an async predicate; a failed check carries the tail of `log`
pub fn log_probe<F, Fut>(label: impl Into<String>, log: PathBuf, ready: F) -> impl ReadinessProbe
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    FnProbe::new(move || {
        let pending = ready();
        let log = log.clone();
        async move {
            if pending.await {
                ProbeCheck::Ready
            } else {
                ProbeCheck::NotReady {
                    diagnostic: tail_lines(&log, DIAGNOSTIC_LINES),
                }
            }
        }
    })
    .labeled(label)
}

pub fn database_server(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let db = c.database.clone();
    let (check_db, probe_db) = (db.clone(), db.clone());
    let log = db.log_path().to_path_buf();
    Step::from_fn("database-server", move |_ctx: Context| {
        let db = db.clone();
        async move {
            db.start().await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Start MariaDB")
    .skip_if_fn(move || {
        let db = check_db.clone();
        async move { db.ping().await }
    })
    .probe(
        log_probe("mysqladmin ping", log, move || {
            let db = probe_db.clone();
            async move { db.ping().await }
        }),
        config.database.retry,
    )
}

pub fn cache_server(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cache = c.cache.clone();
    let (check_cache, probe_cache) = (cache.clone(), cache.clone());
    let log = cache.log_path().to_path_buf();
    Step::from_fn("cache-server", move |_ctx: Context| {
        let cache = cache.clone();
        async move {
            cache.start().await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Start Redis")
    .skip_if_fn(move || {
        let cache = check_cache.clone();
        async move { cache.ping().await }
    })
    .probe(
        log_probe("redis-cli ping", log, move || {
            let cache = probe_cache.clone();
            async move { cache.ping().await }
        }),
        config.cache.retry,
    )
}

pub fn container_runtime(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let containers = c.containers.clone();
    let (check_rt, probe_rt) = (containers.clone(), containers.clone());
    let log = containers.log_path().to_path_buf();
    Step::from_fn("container-runtime", move |_ctx: Context| {
        let containers = containers.clone();
        async move {
            containers.start().await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Start the Docker daemon")
    .skip_if_fn(move || {
        let containers = check_rt.clone();
        async move { containers.info().await.is_ok() }
    })
    .probe(
        log_probe("docker info", log, move || {
            let containers = probe_rt.clone();
            async move {
                match containers.info().await {
                    Ok(info) => {
                        info!(
                            "Docker {} up (storage driver {}, logging driver {})",
                            info.server_version, info.driver, info.logging_driver
                        );
                        true
                    }
                    Err(_) => false,
                }
            }
        }),
        config.container.retry,
    )
}

pub fn php_fpm(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let fpm = c.fpm.clone();
    let socket = fpm.socket().to_path_buf();
    let check_socket = socket.clone();
    let log = fpm.log_path().to_path_buf();
    Step::from_fn("php-fpm", move |_ctx: Context| {
        let fpm = fpm.clone();
        async move {
            fpm.start().await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Start PHP-FPM")
    .skip_if_fn(move || {
        let probe = UnixSocketProbe::new(check_socket.clone());
        async move { probe.check().await.is_ready() }
    })
    .probe(UnixSocketProbe::new(socket).with_log(log), config.web.fpm_retry)
}

pub fn web_config(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let web = c.web.clone();
    let local_url = config.panel.local_url.clone();
    Step::from_fn("web-config", move |ctx: Context| {
        let web = web.clone();
        let serving = HttpProbe::new(local_url.clone());
        async move {
            let path = web.render_config(&ctx).await?;
            info!("Site configuration written to {}", path.display());
            web.test_config().await?;
            if serving.check().await.is_ready() {
                web.reload().await?;
            }
            Ok(ContextDelta::none())
        }
    })
    .describe("Configure the nginx site")
}

fn local_panel_probe(config: &StackConfig, c: &Collaborators) -> HttpProbe {
    c.web
        .log_paths()
        .into_iter()
        .fold(
            HttpProbe::new(config.panel.local_url.clone()).expect_body(HTML_MARKER),
            |probe, log| probe.with_log(log),
        )
}

pub fn web_server(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let web = c.web.clone();
    let check = local_panel_probe(config, c);
    Step::from_fn("web-server", move |_ctx: Context| {
        let web = web.clone();
        async move {
            web.start().await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Start nginx")
    .skip_if_fn(move || {
        let check = check.clone();
        async move { check.check().await.is_ready() }
    })
    .probe(local_panel_probe(config, c), config.web.retry)
}

pub fn tunnel_install(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let binary = config.tunnel.binary.clone();
    Step::from_fn("tunnel-install", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            let archive = "/tmp/ngrok.tgz";
            let bin_dir = cfg
                .tunnel
                .binary
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "/usr/local/bin".to_string());
            shell
                .run(cmd("curl").args(["-fsSL", "-o", archive, cfg.tunnel.download_url.as_str()]))
                .await?;
            shell.run(cmd("tar").args(["-xzf", archive, "-C", bin_dir.as_str()])).await?;
            let _ = tokio::fs::remove_file(archive).await;
            let version = shell
                .run(cmd(cfg.tunnel.binary.display().to_string()).arg("--version"))
                .await?;
            info!("Installed {}", version.trim());
            Ok(ContextDelta::none())
        }
    })
    .describe("Install ngrok")
    .skip_if_fn(move || {
        let exists = binary.exists();
        async move { exists }
    })
}

pub fn tunnel_config(config: &Arc<StackConfig>) -> Step {
    let cfg = config.clone();
    Step::from_fn("tunnel-config", move |ctx: Context| {
        let cfg = cfg.clone();
        async move {
            let var = &cfg.tunnel.authtoken_env;
            let token = std::env::var(var)
                .ok()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| {
                    StepError::action(format!("{} is not set; export your ngrok auth token", var))
                })?;
            let locals = HashMap::from([("TUNNEL_AUTHTOKEN", token.trim().to_string())]);
            let contents = render(templates::TUNNEL_CONFIG, &ctx, &locals)?;
            write_config(&cfg.tunnel.config_path, &contents).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Write the ngrok configuration")
}

pub fn tunnel(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let tunnel = c.tunnel.clone();
    let (check_tunnel, probe_tunnel) = (tunnel.clone(), tunnel.clone());
    let log = tunnel.log_path().to_path_buf();
    let port = config.web.port;
    Step::from_fn("tunnel", move |_ctx: Context| {
        let tunnel = tunnel.clone();
        async move {
            tunnel.start(port).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Start the ngrok tunnel")
    .skip_if_fn(move || {
        let tunnel = check_tunnel.clone();
        async move { matches!(tunnel.query_public_endpoint().await, Ok(Some(_))) }
    })
    .probe(
        log_probe("tunnel endpoint", log, move || {
            let tunnel = probe_tunnel.clone();
            async move { matches!(tunnel.query_public_endpoint().await, Ok(Some(_))) }
        }),
        config.tunnel.retry,
    )
}

pub fn tunnel_endpoint(c: &Collaborators) -> Step {
    let tunnel = c.tunnel.clone();
    Step::from_fn("tunnel-endpoint", move |_ctx: Context| {
        let tunnel = tunnel.clone();
        async move {
            match tunnel.query_public_endpoint().await? {
                Some(url) => {
                    info!("Tunnel published at {}", url);
                    Ok(ContextDelta::none().bind("PUBLIC_URL", url))
                }
                None => Err(StepError::action_with(
                    "Failed to retrieve the tunnel URL",
                    tail_lines(tunnel.log_path(), DIAGNOSTIC_LINES).unwrap_or_default(),
                )),
            }
        }
    })
    .describe("Discover the public tunnel URL")
}
