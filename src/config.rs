use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueueError, QueueResult};

/// Queue configuration resolved from the host's persisted config source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name of the default connection
    #[serde(default = "default_connection_name")]
    pub default: String,

    /// Named connection configurations
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

impl QueueConfig {
    /// Create a configuration with the given default connection name
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            connections: HashMap::new(),
        }
    }

    /// Add a named connection
    pub fn with_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }

    /// Look up a connection by name.
    ///
    /// An unknown name is a configuration error, raised synchronously.
    pub fn connection(&self, name: &str) -> QueueResult<&ConnectionConfig> {
        self.connections
            .get(name)
            .ok_or_else(|| QueueError::UnknownConnection(name.to_string()))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(default_connection_name())
    }
}

/// Configuration for one queue connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver name resolved against the connector registry
    pub driver: String,

    /// Default queue name for this connection
    #[serde(default = "default_queue_name")]
    pub queue: String,

    /// Key prefix used by store-backed drivers
    #[serde(default)]
    pub prefix: Option<String>,

    /// Seconds a dequeued message stays reserved before redelivery
    /// (store-backed drivers)
    #[serde(default)]
    pub visibility_timeout: Option<u64>,

    /// Driver-specific options not covered by the typed fields
    #[serde(default, flatten)]
    pub options: HashMap<String, Value>,
}

impl ConnectionConfig {
    /// Create a connection config for the given driver
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            queue: default_queue_name(),
            prefix: None,
            visibility_timeout: None,
            options: HashMap::new(),
        }
    }

    /// Set the default queue name
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the store key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the reservation visibility timeout in seconds
    pub fn with_visibility_timeout(mut self, seconds: u64) -> Self {
        self.visibility_timeout = Some(seconds);
        self
    }
}

fn default_connection_name() -> String {
    "default".to_string()
}

fn default_queue_name() -> String {
    "default".to_string()
}
