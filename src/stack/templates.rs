//! Configuration artifacts written by the stack pipeline

use std::path::Path;

/// Syntactically valid key written before `key:generate` replaces it
pub const PLACEHOLDER_APP_KEY: &str = "base64:MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=";

pub const PANEL_ENV: &str = "\
APP_ENV=production
APP_KEY={{ APP_KEY }}
APP_URL={{ APP_URL }}
DB_HOST={{ DB_HOST }}
DB_PORT={{ DB_PORT }}
DB_DATABASE={{ DB_DATABASE }}
DB_USERNAME={{ DB_USERNAME }}
DB_PASSWORD={{ DB_PASSWORD }}
CACHE_DRIVER=redis
SESSION_DRIVER=redis
QUEUE_CONNECTION=redis
REDIS_HOST={{ REDIS_HOST }}
REDIS_PASSWORD=null
REDIS_PORT={{ REDIS_PORT }}
";

pub const NGINX_SITE: &str = r#"server {
    listen {{ WEB_PORT }};
    server_name _;
    root {{ PANEL_DIR }}/public;
    index index.php;
    access_log /var/log/nginx/{{ SITE_NAME }}.app-access.log;
    error_log /var/log/nginx/{{ SITE_NAME }}.app-error.log error;
    client_max_body_size 100m;
    client_body_timeout 120s;
    sendfile off;
    location / {
        try_files $uri $uri/ /index.php?$query_string;
    }
    location ~ \.php$ {
        fastcgi_pass unix:{{ FPM_SOCKET }};
        fastcgi_index index.php;
        include fastcgi_params;
        fastcgi_param PHP_VALUE "upload_max_filesize = 100M \n post_max_size=100M";
        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
        fastcgi_param HTTP_PROXY "";
        fastcgi_intercept_errors off;
        fastcgi_buffer_size 16k;
        fastcgi_buffers 4 16k;
        fastcgi_connect_timeout 300;
        fastcgi_send_timeout 300;
        fastcgi_read_timeout 300;
    }
    location ~ /\.ht {
        deny all;
    }
}
"#;

pub const TUNNEL_CONFIG: &str = "\
version: 2
authtoken: {{ TUNNEL_AUTHTOKEN }}
";

/// Host networking; the agent must not create its own bridge
pub const AGENT_CONFIG: &str = "\
docker:
  network:
    mode: host
    interface: pterodactyl0
    create_interface: false
";

pub const REDIS_SOURCE: &str =
    "deb [signed-by=/usr/share/keyrings/redis-archive-keyring.gpg] https://packages.redis.io/deb {{ CODENAME }} main\n";

pub const SCHEDULER_CRON: &str = "* * * * * php {{ PANEL_DIR }}/artisan schedule:run >> /dev/null 2>&1";

/// Value of `KEY=` in a dotenv file
pub fn env_value(contents: &str, key: &str) -> Option<String> {
    let prefix = format!("{}=", key);
    contents
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(prefix.as_str()).map(|v| v.trim().to_string()))
        .filter(|v| !v.is_empty())
}

/// APP_KEY already present in a panel `.env`, if readable
pub fn existing_app_key(env_path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(env_path).ok()?;
    env_value(&contents, "APP_KEY")
}

/// A generated key, not the placeholder
pub fn is_real_app_key(key: Option<&str>) -> bool {
    matches!(key, Some(k) if k != PLACEHOLDER_APP_KEY)
}
