//! Run context - append-only store of runtime-discovered values

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by the context binder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("variable '{name}' is already bound (by {bound_by})")]
    Conflict { name: String, bound_by: String },

    #[error("variable '{name}' is not bound")]
    Unresolved { name: String },
}

/// A single bound value and its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub value: String,

    /// Step that produced the value (or "operator" for seeded values)
    pub bound_by: String,

    /// Whether the value is a credential that must be masked in listings
    pub secret: bool,
}

/// Append-only mapping from name to value, threaded through the pipeline
///
/// Only the engine mutates the context; actions receive a snapshot and
/// return a [`ContextDelta`] with their new bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    bindings: BTreeMap<String, Binding>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a name. Rebinding is a conflict and leaves the original untouched.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), ContextError> {
        self.insert(name.into(), value.into(), "operator", false)
    }

    fn insert(&mut self, name: String, value: String, bound_by: &str, secret: bool) -> Result<(), ContextError> {
        if let Some(existing) = self.bindings.get(&name) {
            return Err(ContextError::Conflict {
                name,
                bound_by: existing.bound_by.clone(),
            });
        }
        self.bindings.insert(
            name,
            Binding {
                value,
                bound_by: bound_by.to_string(),
                secret,
            },
        );
        Ok(())
    }

    /// Look up a value that a later step depends on
    pub fn require(&self, name: &str) -> Result<&str, ContextError> {
        self.get(name).ok_or_else(|| ContextError::Unresolved {
            name: name.to_string(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(|b| b.value.as_str())
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Iterate bindings in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Apply all bindings of a delta, or none of them
    pub fn apply(&mut self, delta: ContextDelta, step_id: &str) -> Result<(), ContextError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &delta.entries {
            if let Some(existing) = self.bindings.get(&entry.name) {
                return Err(ContextError::Conflict {
                    name: entry.name.clone(),
                    bound_by: existing.bound_by.clone(),
                });
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ContextError::Conflict {
                    name: entry.name.clone(),
                    bound_by: step_id.to_string(),
                });
            }
        }

        for entry in delta.entries {
            self.insert(entry.name, entry.value, step_id, entry.secret)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeltaEntry {
    name: String,
    value: String,
    secret: bool,
}

/// New bindings produced by one step's action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextDelta {
    entries: Vec<DeltaEntry>,
}

impl ContextDelta {
    /// An empty delta (the action discovered nothing)
    pub fn none() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push(DeltaEntry {
            name: name.into(),
            value: value.into(),
            secret: false,
        });
        self
    }

    /// Bind a credential; it is masked everywhere except the secrets summary
    pub fn bind_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push(DeltaEntry {
            name: name.into(),
            value: value.into(),
            secret: true,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }
}
