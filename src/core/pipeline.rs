//! Pipeline domain model

use crate::core::step::Step;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Duplicate step ID: {0}")]
    DuplicateStep(String),

    #[error("Pipeline '{0}' has no steps")]
    Empty(String),
}

/// The fixed, ordered sequence of steps executed by the engine
#[derive(Debug)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    steps: Vec<Step>,
}

impl Pipeline {
    /// Build a pipeline; order is the order given, ids must be unique
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self, PipelineError> {
        let name = name.into();
        if steps.is_empty() {
            return Err(PipelineError::Empty(name));
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.id.as_str()) {
                return Err(PipelineError::DuplicateStep(step.id.clone()));
            }
        }

        Ok(Self { name, steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step ids in execution order
    pub fn execution_order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }
}
