/*!
# State Store

Key-value state persisted between the steps of a CI run.

A step that starts a background process records its pid under a key; a later
step reads it back through [`RunState`]. On a CI runner the values arrive as
`STATE_<key>` environment variables, which [`EnvRunState`] reads. [`StateStore`]
keeps the same data in memory for local runs and tests.
*/

use std::collections::HashMap;

/// Prefix the runner uses when exposing saved state to later steps
pub const STATE_ENV_PREFIX: &str = "STATE_";

/// Result type for state store operations
pub type StateResult<T> = Result<T, StateError>;

/// State store specific errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Read-only view of run state
pub trait RunState {
    /// Value recorded under `key`; empty values count as absent
    fn get_state(&self, key: &str) -> Option<String>;
}

/// Run state exposed through the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvRunState;

impl EnvRunState {
    pub fn variable_name(key: &str) -> String {
        format!("{}{}", STATE_ENV_PREFIX, key)
    }
}

impl RunState for EnvRunState {
    fn get_state(&self, key: &str) -> Option<String> {
        let value = std::env::var(Self::variable_name(key)).ok()?;
        let value = value.trim();
        if value.is_empty() {
            tracing::debug!("State {} is set but empty", key);
            None
        } else {
            Some(value.to_string())
        }
    }
}

/// In-memory state store
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    memory: HashMap<String, String>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.memory.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> StateResult<()> {
        if key.is_empty() || key.contains('=') {
            return Err(StateError::InvalidKey(key.to_string()));
        }
        self.memory.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.memory.remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.memory.keys().cloned().collect()
    }
}

impl RunState for StateStore {
    fn get_state(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}
