//! Test utility functions for stackup scenarios

use async_trait::async_trait;
use stackup::core::config::StackConfig;
use stackup::core::{Context, ContextDelta, Pipeline, Step, StepError, StepState};
use stackup::execution::{
    ExecutionEngine, ExecutionEvent, ProcessHandle, ProcessSupervisor, RunResult,
};
use stackup::probe::{FnProbe, ProbeCheck, RetryPolicy};
use stackup::stack::services::{
    CacheEngine, Collaborators, ContainerInfo, ContainerRuntime, DatabaseEngine, PackageManager,
    PhpFpm, Tunnel, WebServer,
};
use stackup::stack::Shell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared, ordered record of side effects
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }
}

/// A step whose action records its id and binds the given names
pub fn recording_step(id: &str, journal: &Journal, binds: &[(&str, &str)]) -> Step {
    let journal = journal.clone();
    let id_owned = id.to_string();
    let binds: Vec<(String, String)> = binds
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Step::from_fn(id, move |_ctx: Context| {
        let journal = journal.clone();
        let id = id_owned.clone();
        let binds = binds.clone();
        async move {
            journal.record(format!("action:{}", id));
            Ok(binds
                .into_iter()
                .fold(ContextDelta::none(), |delta, (k, v)| delta.bind(k, v)))
        }
    })
}

/// A step whose action always fails with the given message
pub fn failing_step(id: &str, journal: &Journal, message: &str) -> Step {
    let journal = journal.clone();
    let id_owned = id.to_string();
    let message = message.to_string();
    Step::from_fn(id, move |_ctx: Context| {
        let journal = journal.clone();
        let id = id_owned.clone();
        let message = message.clone();
        async move {
            journal.record(format!("action:{}", id));
            Err(StepError::action_with(message, "last lines of the daemon log"))
        }
    })
}

/// A step that reads `name` from the context and records it
pub fn consuming_step(id: &str, journal: &Journal, name: &str) -> Step {
    let journal = journal.clone();
    let id_owned = id.to_string();
    let name = name.to_string();
    Step::from_fn(id, move |ctx: Context| {
        let journal = journal.clone();
        let id = id_owned.clone();
        let name = name.clone();
        async move {
            let value = ctx.require(&name)?;
            journal.record(format!("action:{}:{}", id, value));
            Ok(ContextDelta::none())
        }
    })
}

/// Probe that turns ready on the `ready_on`-th evaluation (never if 0)
pub fn counting_probe(
    ready_on: u32,
    evaluations: Arc<AtomicU32>,
) -> FnProbe<impl Fn() -> std::future::Ready<ProbeCheck> + Send + Sync> {
    FnProbe::new(move || {
        let n = evaluations.fetch_add(1, Ordering::SeqCst) + 1;
        let check = if ready_on != 0 && n >= ready_on {
            ProbeCheck::Ready
        } else {
            ProbeCheck::NotReady {
                diagnostic: Some(format!("not ready on evaluation {}", n)),
            }
        };
        std::future::ready(check)
    })
}

pub fn policy(interval_secs: u64, max_attempts: u32) -> RetryPolicy {
    RetryPolicy::from_secs(interval_secs, max_attempts).unwrap()
}

pub fn pipeline(steps: Vec<Step>) -> Pipeline {
    Pipeline::new("scenario", steps).unwrap()
}

/// Run a pipeline, also returning every state transition observed
pub async fn run_recording_states(pipeline: &Pipeline) -> (RunResult, Vec<(String, StepState)>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let mut engine = ExecutionEngine::new();
    engine.add_event_handler(move |event| {
        if let ExecutionEvent::StateChanged { step_id, state } = event {
            sink.lock().unwrap().push((step_id, state));
        }
    });
    let result = engine.run(pipeline).await;
    let states = states.lock().unwrap().clone();
    (result, states)
}

pub async fn run(pipeline: &Pipeline) -> RunResult {
    ExecutionEngine::new().run(pipeline).await
}

fn handle(command: &str) -> ProcessHandle {
    ProcessHandle {
        pid: Some(4242),
        log_path: PathBuf::from(format!("/nonexistent/{}.log", command)),
        command: command.to_string(),
        started_at: chrono::Utc::now(),
    }
}

/// In-memory stand-ins for every collaborator
pub struct FakeHost {
    pub journal: Journal,
    pub db_up: Arc<Mutex<bool>>,
    pub login_ok: Arc<Mutex<bool>>,
    pub endpoint: Arc<Mutex<Option<String>>>,
    pub endpoint_after: Arc<AtomicU32>,
}

impl FakeHost {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            db_up: Arc::new(Mutex::new(false)),
            login_ok: Arc::new(Mutex::new(true)),
            endpoint: Arc::new(Mutex::new(None)),
            endpoint_after: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn collaborators(&self, config: &StackConfig) -> Collaborators {
        let supervisor = ProcessSupervisor::new();
        Collaborators {
            shell: Shell::new(false),
            supervisor: supervisor.clone(),
            packages: Arc::new(FakePackages(self.journal.clone())),
            database: Arc::new(FakeDatabase {
                journal: self.journal.clone(),
                up: Arc::clone(&self.db_up),
                login_ok: Arc::clone(&self.login_ok),
            }),
            cache: Arc::new(FakeCache),
            containers: Arc::new(FakeContainers),
            web: Arc::new(FakeWeb(self.journal.clone())),
            fpm: Arc::new(PhpFpm::new(config, supervisor)),
            tunnel: Arc::new(FakeTunnel {
                journal: self.journal.clone(),
                endpoint: Arc::clone(&self.endpoint),
                queries_before_ready: Arc::clone(&self.endpoint_after),
            }),
        }
    }
}

struct FakePackages(Journal);

#[async_trait]
impl PackageManager for FakePackages {
    async fn refresh(&self) -> Result<(), StepError> {
        self.0.record("packages:refresh");
        Ok(())
    }

    async fn install(&self, names: &[String]) -> Result<(), StepError> {
        self.0.record(format!("packages:install:{}", names.len()));
        Ok(())
    }
}

struct FakeDatabase {
    journal: Journal,
    up: Arc<Mutex<bool>>,
    login_ok: Arc<Mutex<bool>>,
}

#[async_trait]
impl DatabaseEngine for FakeDatabase {
    async fn start(&self) -> Result<ProcessHandle, StepError> {
        self.journal.record("database:start");
        *self.up.lock().unwrap() = true;
        Ok(handle("mariadbd"))
    }

    async fn ping(&self) -> bool {
        *self.up.lock().unwrap()
    }

    async fn execute(&self, statement: &str) -> Result<String, StepError> {
        let first = statement.lines().next().unwrap_or_default().to_string();
        self.journal.record(format!("database:execute:{}", first));
        // Every lookup finds an existing row
        if statement.starts_with("SELECT COUNT") {
            return Ok("1\n".to_string());
        }
        Ok(String::new())
    }

    async fn verify_login(&self, user: &str, _password: &str, _database: &str) -> Result<(), StepError> {
        self.journal.record(format!("database:login:{}", user));
        if *self.login_ok.lock().unwrap() {
            Ok(())
        } else {
            Err(StepError::action_with(
                format!("Failed to connect with {} user", user),
                "ERROR 1045 (28000): Access denied",
            ))
        }
    }

    fn log_path(&self) -> &Path {
        Path::new("/nonexistent/mariadb.log")
    }
}

struct FakeCache;

#[async_trait]
impl CacheEngine for FakeCache {
    async fn start(&self) -> Result<ProcessHandle, StepError> {
        Ok(handle("redis-server"))
    }

    async fn ping(&self) -> bool {
        true
    }

    fn log_path(&self) -> &Path {
        Path::new("/nonexistent/redis.log")
    }
}

struct FakeContainers;

#[async_trait]
impl ContainerRuntime for FakeContainers {
    async fn start(&self) -> Result<ProcessHandle, StepError> {
        Ok(handle("dockerd"))
    }

    async fn info(&self) -> Result<ContainerInfo, StepError> {
        Ok(ContainerInfo::default())
    }

    fn log_path(&self) -> &Path {
        Path::new("/nonexistent/dockerd.log")
    }
}

struct FakeWeb(Journal);

#[async_trait]
impl WebServer for FakeWeb {
    async fn render_config(&self, _ctx: &Context) -> Result<PathBuf, StepError> {
        self.0.record("web:render");
        Ok(PathBuf::from("/nonexistent/site.conf"))
    }

    async fn test_config(&self) -> Result<(), StepError> {
        Ok(())
    }

    async fn start(&self) -> Result<ProcessHandle, StepError> {
        Ok(handle("nginx"))
    }

    async fn reload(&self) -> Result<(), StepError> {
        Ok(())
    }

    fn log_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

struct FakeTunnel {
    journal: Journal,
    endpoint: Arc<Mutex<Option<String>>>,
    /// Queries answered with no endpoint before `endpoint` is reported
    queries_before_ready: Arc<AtomicU32>,
}

#[async_trait]
impl Tunnel for FakeTunnel {
    async fn start(&self, local_port: u16) -> Result<ProcessHandle, StepError> {
        self.journal.record(format!("tunnel:start:{}", local_port));
        Ok(handle("ngrok"))
    }

    async fn query_public_endpoint(&self) -> Result<Option<String>, StepError> {
        let pending = self.queries_before_ready.load(Ordering::SeqCst);
        if pending > 0 {
            self.queries_before_ready.fetch_sub(1, Ordering::SeqCst);
            return Ok(None);
        }
        Ok(self.endpoint.lock().unwrap().clone())
    }

    fn log_path(&self) -> &Path {
        Path::new("/nonexistent/ngrok.log")
    }
}

/// Probe interval used by fake-host scenarios
pub fn fast_config() -> StackConfig {
    let mut config = StackConfig::default();
    let quick = RetryPolicy::new(Duration::from_secs(1), 5).unwrap();
    config.database.retry = quick;
    config.tunnel.retry = quick;
    config
}
