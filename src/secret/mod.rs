//! One-time credential generation
//!
//! Secrets are minted from the OS random source and handed to the operator
//! sink before the caller ever sees them. The vault keeps them in memory for
//! the end-of-run summary and never writes them anywhere durable.

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

/// Byte length of generated secrets unless configured otherwise
pub const DEFAULT_SECRET_BYTES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("secret '{0}' was already generated in this run")]
    AlreadyGenerated(String),

    #[error("secret length must be greater than zero")]
    EmptyLength,
}

/// A generated credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub value: String,
    pub generated_at: DateTime<Utc>,
}

/// Receives each secret the moment it is generated
pub type SecretSink = Arc<dyn Fn(&Secret) + Send + Sync>;

/// Generates and remembers this run's secrets
pub struct SecretVault {
    byte_len: usize,
    sink: SecretSink,
    secrets: Mutex<Vec<Secret>>,
}

impl SecretVault {
    pub fn new(byte_len: usize, sink: SecretSink) -> Result<Self, SecretError> {
        if byte_len == 0 {
            return Err(SecretError::EmptyLength);
        }
        Ok(Self {
            byte_len,
            sink,
            secrets: Mutex::new(Vec::new()),
        })
    }

    /// Mint the secret `name`; each name can be generated once per run
    pub fn generate(&self, name: &str) -> Result<Secret, SecretError> {
        let mut secrets = self.secrets.lock().unwrap_or_else(|p| p.into_inner());
        if secrets.iter().any(|s| s.name == name) {
            return Err(SecretError::AlreadyGenerated(name.to_string()));
        }

        let mut bytes = vec![0u8; self.byte_len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let secret = Secret {
            name: name.to_string(),
            value: base64::engine::general_purpose::STANDARD.encode(&bytes),
            generated_at: Utc::now(),
        };

        info!("Generated secret {}", name);
        (self.sink)(&secret);
        secrets.push(secret.clone());
        Ok(secret)
    }

    /// All secrets generated so far, in generation order
    pub fn secrets(&self) -> Vec<Secret> {
        self.secrets.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn get(&self, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }
}
