//! Core domain models
//!
//! Steps, the pipeline that orders them, the append-only run context,
//! step state, the error taxonomy, and stack configuration.

pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod template;

pub use context::*;
pub use error::StepError;
pub use pipeline::*;
pub use state::*;
pub use step::*;
