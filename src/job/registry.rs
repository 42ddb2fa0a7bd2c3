use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::JobError;
use crate::job::Job;

/// Handler invoked for one job delivery
///
/// The handler owns success acknowledgment: call `job.delete()` once the
/// work is done, or `job.release(delay)` to hand the delivery back early.
/// A delivery that ends with neither is left to the backend's visibility
/// mechanism.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one delivery
    async fn handle(&self, job: &mut dyn Job, data: Value) -> Result<(), JobError>;

    /// Cleanup once the job is declared permanently failed
    async fn failed(&self, _data: &Value) {}
}

/// Registry mapping handler references to handler instances
///
/// Handler references are plain strings resolved at fire time against
/// handlers registered up front, so dispatch needs no runtime reflection and
/// no code ever travels over the wire.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under the given reference.
    ///
    /// Re-registering a reference replaces the previous handler.
    pub fn register(&self, reference: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.write().insert(reference.into(), handler);
    }

    /// Resolve a handler by reference
    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn JobHandler>, JobError> {
        self.handlers
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| JobError::NotRegistered(reference.to_string()))
    }

    /// Check if a reference is registered
    pub fn is_registered(&self, reference: &str) -> bool {
        self.handlers.read().contains_key(reference)
    }

    /// Get all registered references
    pub fn registered_refs(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
