//! Panel application: download, database, environment, workers

use crate::core::config::StackConfig;
use crate::core::template::{render, write_config};
use crate::core::{Context, ContextDelta, Step, StepError};
use crate::execution::DaemonCommand;
use crate::probe::{fetch_body, tail_lines};
use crate::secret::SecretVault;
use crate::stack::daemons::HTML_MARKER;
use crate::stack::services::Collaborators;
use crate::stack::shell::{cmd, on_path, Invocation};
use crate::stack::templates::{self, PLACEHOLDER_APP_KEY};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

fn artisan(config: &StackConfig, args: &[&str]) -> Invocation {
    cmd("php")
        .arg("artisan")
        .args(args.iter().copied())
        .current_dir(&config.panel.dir)
}

fn env_path(config: &StackConfig) -> PathBuf {
    config.panel.dir.join(".env")
}

/// SQL creating (or re-keying) the panel user and its database
pub fn provision_sql(config: &StackConfig, password: &str) -> String {
    let db = &config.database;
    let account = format!("'{}'@'{}'", db.user, db.host);
    let password = password.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "CREATE USER IF NOT EXISTS {account} IDENTIFIED BY '{password}';\n\
         ALTER USER {account} IDENTIFIED BY '{password}';\n\
         CREATE DATABASE IF NOT EXISTS `{name}`;\n\
         GRANT ALL PRIVILEGES ON `{name}`.* TO {account} WITH GRANT OPTION;\n\
         FLUSH PRIVILEGES;\n",
        name = db.name
    )
}

/// Render the panel `.env`, keeping any application key already generated
pub fn render_panel_env(config: &StackConfig, ctx: &Context, app_url: &str) -> Result<String, StepError> {
    let app_key = templates::existing_app_key(&env_path(config)).unwrap_or_else(|| PLACEHOLDER_APP_KEY.to_string());
    let locals = HashMap::from([
        ("APP_KEY", app_key),
        ("APP_URL", app_url.to_string()),
        ("DB_HOST", config.database.host.clone()),
        ("DB_PORT", config.database.port.to_string()),
        ("DB_DATABASE", config.database.name.clone()),
        ("DB_USERNAME", config.database.user.clone()),
        ("REDIS_HOST", config.cache.host.clone()),
        ("REDIS_PORT", config.cache.port.to_string()),
    ]);
    render(templates::PANEL_ENV, ctx, &locals)
}

pub fn panel_download(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let artisan_path = config.panel.dir.join("artisan");
    Step::from_fn("panel-download", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            let dir = &cfg.panel.dir;
            shell.run(cmd("mkdir").arg("-p").arg(dir.display().to_string())).await?;
            shell
                .run(
                    cmd("curl")
                        .args(["-fLo", "panel.tar.gz", cfg.panel.release_url.as_str()])
                        .current_dir(dir),
                )
                .await?;
            shell
                .run(cmd("tar").args(["-xzf", "panel.tar.gz"]).current_dir(dir))
                .await?;
            shell
                .run(cmd("sh").args(["-c", "chmod -R 755 storage/* bootstrap/cache/"]).current_dir(dir))
                .await?;
            shell.run(cmd("rm").args(["-f", "panel.tar.gz"]).current_dir(dir)).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Download the panel release")
    .skip_if_fn(move || {
        let exists = artisan_path.exists();
        async move { exists }
    })
}

pub fn database_provision(config: &Arc<StackConfig>, c: &Collaborators, vault: &Arc<SecretVault>) -> Step {
    let cfg = config.clone();
    let db = c.database.clone();
    let vault = vault.clone();
    Step::from_fn("database-provision", move |_ctx: Context| {
        let cfg = cfg.clone();
        let db = db.clone();
        let vault = vault.clone();
        async move {
            let secret = vault.generate("DB_PASSWORD")?;
            db.execute(&provision_sql(&cfg, &secret.value)).await?;
            db.verify_login(&cfg.database.user, &secret.value, &cfg.database.name)
                .await?;
            info!("Database user {} can log in to {}", cfg.database.user, cfg.database.name);
            Ok(ContextDelta::none().bind_secret("DB_PASSWORD", secret.value))
        }
    })
    .describe("Create the panel database and user")
}

pub fn panel_env(config: &Arc<StackConfig>) -> Step {
    let cfg = config.clone();
    Step::from_fn("panel-env", move |ctx: Context| {
        let cfg = cfg.clone();
        async move {
            let contents = render_panel_env(&cfg, &ctx, &cfg.panel.local_url)?;
            write_config(&env_path(&cfg), &contents).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Write the panel environment file")
}

pub fn panel_dependencies(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let autoload = config.panel.dir.join("vendor").join("autoload.php");
    Step::from_fn("panel-dependencies", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            shell
                .run(
                    cmd("composer")
                        .args(["install", "--no-dev", "--optimize-autoloader", "--no-interaction"])
                        .env("COMPOSER_ALLOW_SUPERUSER", "1")
                        .current_dir(&cfg.panel.dir),
                )
                .await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Install panel PHP dependencies")
    .skip_if_fn(move || {
        let exists = autoload.exists();
        async move { exists }
    })
}

pub fn panel_app_key(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let env = env_path(config);
    Step::from_fn("panel-app-key", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            shell.run(artisan(&cfg, &["key:generate", "--force"])).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Generate the application key")
    .skip_if_fn(move || {
        let generated = templates::is_real_app_key(templates::existing_app_key(&env).as_deref());
        async move { generated }
    })
}

pub fn panel_migrate(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    Step::from_fn("panel-migrate", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            shell.run(artisan(&cfg, &["config:clear"])).await?;
            shell.run(artisan(&cfg, &["cache:clear"])).await?;
            shell.run(artisan(&cfg, &["migrate", "--seed", "--force"])).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Run database migrations")
}

pub fn panel_admin(config: &Arc<StackConfig>, c: &Collaborators, vault: &Arc<SecretVault>) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let vault = vault.clone();
    let (check_cfg, check_db) = (config.clone(), c.database.clone());
    Step::from_fn("panel-admin", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        let vault = vault.clone();
        async move {
            let secret = vault.generate("ADMIN_PASSWORD")?;
            let panel = &cfg.panel;
            let args = [
                "p:user:make".to_string(),
                format!("--email={}", panel.admin_email),
                format!("--username={}", panel.admin_username),
                format!("--name-first={}", panel.admin_first_name),
                format!("--name-last={}", panel.admin_last_name),
                format!("--password={}", secret.value),
                "--admin=1".to_string(),
            ];
            shell
                .run(
                    cmd("php")
                        .arg("artisan")
                        .args(args)
                        .current_dir(&panel.dir)
                        .sensitive(),
                )
                .await?;
            info!("Administrator {} created", panel.admin_username);
            Ok(ContextDelta::none().bind_secret("ADMIN_PASSWORD", secret.value))
        }
    })
    .describe("Create the panel administrator")
    .skip_if_fn(move || {
        let cfg = check_cfg.clone();
        let db = check_db.clone();
        async move {
            let query = format!(
                "SELECT COUNT(*) FROM `{}`.users WHERE username = '{}';",
                cfg.database.name, cfg.panel.admin_username
            );
            match db.execute(&query).await {
                Ok(rows) => rows.trim().parse::<u64>().map(|n| n > 0).unwrap_or(false),
                Err(e) => {
                    debug!("Admin lookup failed: {}", e);
                    false
                }
            }
        }
    })
}

pub fn panel_permissions(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    Step::from_fn("panel-permissions", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            let owner = format!("{0}:{0}", cfg.panel.web_user);
            shell
                .run(
                    cmd("chown")
                        .args(["-R", owner.as_str()])
                        .arg(cfg.panel.dir.display().to_string()),
                )
                .await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Hand the web root to the web server user")
}

pub fn panel_public_url(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    Step::from_fn("panel-public-url", move |ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            let public_url = ctx.require("PUBLIC_URL")?;
            let contents = render_panel_env(&cfg, &ctx, public_url)?;
            write_config(&env_path(&cfg), &contents).await?;
            shell.run(artisan(&cfg, &["config:clear"])).await?;
            info!("APP_URL set to {}", public_url);
            Ok(ContextDelta::none())
        }
    })
    .describe("Point the panel at its public URL")
}

/// pgrep pattern for the worker; the bracket keeps it from matching pgrep's own
/// command line or a sudo parent carrying it
pub const WORKER_PATTERN: &str = "[a]rtisan queue:work";

pub fn queue_worker(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let supervisor = c.supervisor.clone();
    let shell = c.shell.clone();
    Step::from_fn("queue-worker", move |_ctx: Context| {
        let cfg = cfg.clone();
        let supervisor = supervisor.clone();
        async move {
            let command = DaemonCommand::new("php")
                .args(["artisan", "queue:work", "--queue=high,standard,low", "--sleep=3", "--tries=3"])
                .current_dir(&cfg.panel.dir)
                .privileged(cfg.sudo);
            supervisor
                .spawn(&command, &cfg.log_path("pteroq.log"))
                .map_err(|e| StepError::action(e.to_string()))?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Start the queue worker")
    .skip_if_fn(move || {
        let shell = shell.clone();
        async move { shell.succeeds(cmd("pgrep").args(["-f", WORKER_PATTERN])).await }
    })
}

fn cron_line(config: &StackConfig) -> Result<String, StepError> {
    let locals = HashMap::from([("PANEL_DIR", config.panel.dir.display().to_string())]);
    render(templates::SCHEDULER_CRON, &Context::new(), &locals)
}

pub fn scheduler_cron(config: &Arc<StackConfig>, c: &Collaborators) -> Step {
    let cfg = config.clone();
    let shell = c.shell.clone();
    let (check_cfg, check_shell) = (config.clone(), c.shell.clone());
    Step::from_fn("scheduler-cron", move |_ctx: Context| {
        let cfg = cfg.clone();
        let shell = shell.clone();
        async move {
            if !on_path("crontab") {
                return Err(StepError::action("crontab not found; scheduler not installed"));
            }
            let line = cron_line(&cfg)?;
            let existing = shell
                .output(cmd("crontab").arg("-l"))
                .await
                .map(|out| if out.success() { out.stdout } else { String::new() })?;
            let mut table = existing.trim_end().to_string();
            if !table.is_empty() {
                table.push('\n');
            }
            table.push_str(&line);
            table.push('\n');
            shell.run(cmd("crontab").arg("-").stdin(table)).await?;
            Ok(ContextDelta::none())
        }
    })
    .describe("Install the panel scheduler cron entry")
    .soft()
    .skip_if_fn(move || {
        let cfg = check_cfg.clone();
        let shell = check_shell.clone();
        async move {
            let Ok(line) = cron_line(&cfg) else {
                return false;
            };
            matches!(shell.output(cmd("crontab").arg("-l")).await,
                Ok(out) if out.success() && out.stdout.lines().any(|l| l.trim() == line))
        }
    })
}

pub fn panel_public_check(c: &Collaborators) -> Step {
    let logs = c.web.log_paths();
    Step::from_fn("panel-public-check", move |ctx: Context| {
        let logs = logs.clone();
        async move {
            let url = ctx.require("PUBLIC_URL")?;
            let failure = match fetch_body(url).await {
                Ok(body) if body.contains(HTML_MARKER) => return Ok(ContextDelta::none()),
                Ok(_) => format!("Panel at {} did not return an HTML page", url),
                Err(e) => format!("Panel is not accessible at {}: {}", url, e),
            };
            let diagnostic = logs
                .iter()
                .filter_map(|p| tail_lines(p, 40).map(|t| format!("==> {} <==\n{}", p.display(), t)))
                .collect::<Vec<_>>()
                .join("\n");
            Err(StepError::action_with(failure, diagnostic))
        }
    })
    .describe("Check the panel through its public URL")
}
