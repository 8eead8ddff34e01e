//! Configuration access.
//!
//! The runtime does not parse configuration files; it reads values through the
//! [`Config`] trait, which any source (env, files, a remote store) can implement.
//! [`InMemoryConfig`] is the default used when nothing else is supplied.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SYSTEM_ID_KEY: &str = "runtime.system_id";
pub const SHUTDOWN_TIMEOUT_KEY: &str = "runtime.shutdown_timeout_ms";

/// Key/value configuration source.
pub trait Config: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value);

    fn keys(&self) -> Vec<String>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_owned))
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }
}

impl dyn Config {
    /// Deserialize the value under `key` into `T`. `Ok(None)` when the key is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.get(key).map(serde_json::from_value).transpose()
    }
}

/// Map-backed [`Config`].
#[derive(Debug, Default)]
pub struct InMemoryConfig {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.write().insert(key.into(), value.into());
        self
    }
}

impl Config for InMemoryConfig {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.write().insert(key.to_string(), value);
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Settings the runtime itself reads from its [`Config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_system_id")]
    pub system_id: String,
    /// Upper bound on draining async event handlers during `stop`.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_system_id() -> String {
    "system".to_string()
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            system_id: default_system_id(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl RuntimeSettings {
    /// Read the `runtime.*` keys, falling back to defaults for missing or
    /// mistyped values.
    pub fn from_config(config: &dyn Config) -> Self {
        let defaults = Self::default();
        Self {
            system_id: config
                .get_string(SYSTEM_ID_KEY)
                .filter(|id| !id.is_empty())
                .unwrap_or(defaults.system_id),
            shutdown_timeout_ms: config
                .get_u64(SHUTDOWN_TIMEOUT_KEY)
                .unwrap_or(defaults.shutdown_timeout_ms),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
