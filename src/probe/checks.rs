//! Concrete probes against externally observable signals

use crate::probe::{ProbeCheck, ReadinessProbe};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Per-request bound for HTTP checks
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Lines of log attached to a failed evaluation
const DIAGNOSTIC_LINES: usize = 40;

/// Return the last `lines` lines of a log file, or `None` if unreadable/empty
pub fn tail_lines(path: &Path, lines: usize) -> Option<String> {
    let content = std::fs::read(path).ok()?;
    let content = String::from_utf8_lossy(&content);
    let collected: Vec<&str> = content.lines().collect();
    if collected.is_empty() {
        return None;
    }
    let start = collected.len().saturating_sub(lines);
    Some(collected[start..].join("\n"))
}

fn log_diagnostic(log: Option<&PathBuf>, fallback: String) -> Option<String> {
    log.and_then(|p| tail_lines(p, DIAGNOSTIC_LINES))
        .or_else(|| {
            let trimmed = fallback.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
}

/// Ready when a unix socket accepts a connection
#[derive(Debug, Clone)]
pub struct UnixSocketProbe {
    path: PathBuf,
    log: Option<PathBuf>,
}

impl UnixSocketProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            log: None,
        }
    }

    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log = Some(path.into());
        self
    }
}

#[async_trait]
impl ReadinessProbe for UnixSocketProbe {
    async fn check(&self) -> ProbeCheck {
        match tokio::net::UnixStream::connect(&self.path).await {
            Ok(_) => ProbeCheck::Ready,
            Err(e) => ProbeCheck::NotReady {
                diagnostic: log_diagnostic(self.log.as_ref(), format!("{}: {}", self.path.display(), e)),
            },
        }
    }

    fn describe(&self) -> String {
        format!("socket {}", self.path.display())
    }
}

/// Ready when an HTTP GET succeeds and, optionally, the body contains a marker
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    expect: Option<String>,
    logs: Vec<PathBuf>,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            expect: None,
            logs: Vec::new(),
        }
    }

    pub fn expect_body(mut self, marker: impl Into<String>) -> Self {
        self.expect = Some(marker.into());
        self
    }

    /// Logs consulted, in order, when the request fails
    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.logs.push(path.into());
        self
    }

    fn diagnostic(&self, fallback: String) -> Option<String> {
        let mut parts: Vec<String> = self
            .logs
            .iter()
            .filter_map(|p| tail_lines(p, DIAGNOSTIC_LINES).map(|t| format!("==> {} <==\n{}", p.display(), t)))
            .collect();
        if parts.is_empty() {
            parts.push(fallback);
        }
        Some(parts.join("\n"))
    }
}

/// GET `url` and return the body, failing on transport errors or non-2xx status
pub async fn fetch_body(url: &str) -> Result<String, String> {
    let client = reqwest::Client::builder()
        .timeout(CHECK_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("{} returned {}", url, status));
    }
    response.text().await.map_err(|e| e.to_string())
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check(&self) -> ProbeCheck {
        match fetch_body(&self.url).await {
            Ok(body) => match &self.expect {
                Some(marker) if !body.contains(marker.as_str()) => {
                    debug!("{} responded without '{}'", self.url, marker);
                    ProbeCheck::NotReady {
                        diagnostic: self.diagnostic(format!("response from {} did not contain '{}'", self.url, marker)),
                    }
                }
                _ => ProbeCheck::Ready,
            },
            Err(e) => ProbeCheck::NotReady {
                diagnostic: self.diagnostic(e),
            },
        }
    }

    fn describe(&self) -> String {
        format!("GET {}", self.url)
    }
}
