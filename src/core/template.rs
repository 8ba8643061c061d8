//! `{{ NAME }}` templates rendered from the run context

use crate::core::{context::Context, error::StepError};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Names referenced by a template, in order of first appearance
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in placeholder().captures_iter(template) {
        let name = cap[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Render a template, resolving each placeholder from `locals` first and the
/// context second. An unresolved name fails the whole render.
pub fn render(template: &str, ctx: &Context, locals: &HashMap<&str, String>) -> Result<String, StepError> {
    for name in placeholders(template) {
        if !locals.contains_key(name.as_str()) {
            ctx.require(&name)?;
        }
    }

    let rendered = placeholder().replace_all(template, |cap: &regex::Captures| {
        let name = &cap[1];
        locals
            .get(name)
            .cloned()
            .or_else(|| ctx.get(name).map(str::to_string))
            .unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

/// Write rendered configuration, creating parent directories
pub async fn write_config(path: &Path, contents: &str) -> Result<(), StepError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StepError::config_write(path, e))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| StepError::config_write(path, e))?;
    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_from_context_and_locals() {
        let mut ctx = Context::new();
        ctx.bind("DB_PASSWORD", "pw").unwrap();
        let mut locals = HashMap::new();
        locals.insert("APP_URL", "http://127.0.0.1".to_string());

        let out = render("APP_URL={{ APP_URL }}\nDB_PASSWORD={{DB_PASSWORD}}\n", &ctx, &locals).unwrap();
        assert_eq!(out, "APP_URL=http://127.0.0.1\nDB_PASSWORD=pw\n");
    }

    #[test]
    fn test_unbound_placeholder_fails() {
        let ctx = Context::new();
        let err = render("APP_URL={{ PUBLIC_URL }}", &ctx, &HashMap::new()).unwrap_err();
        assert!(matches!(err, StepError::DependencyUnresolved { ref name } if name == "PUBLIC_URL"));
    }

    #[test]
    fn test_shell_and_nginx_syntax_untouched() {
        let ctx = Context::new();
        let template = "try_files $uri $uri/ /index.php?$query_string;\nserver { listen 80; }";
        assert_eq!(render(template, &ctx, &HashMap::new()).unwrap(), template);
    }

    #[test]
    fn test_placeholders_deduplicated() {
        assert_eq!(placeholders("{{ A }} {{B}} {{ A }}"), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_write_config_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc/pterodactyl/config.yml");
        write_config(&path, "docker: {}\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "docker: {}\n");
    }
}
