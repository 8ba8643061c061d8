//! Pipeline execution engine and daemon supervision

pub mod engine;
pub mod supervisor;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, RunResult};
pub use supervisor::{DaemonCommand, ProcessHandle, ProcessSupervisor, SupervisorError};
