use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{error, info};

use crate::backend::memory::MemoryQueue;
use crate::backend::null::NullQueue;
use crate::backend::sync::SyncQueue;
use crate::backend::{Queue, QueueContext};
use crate::config::{ConnectionConfig, QueueConfig};
use crate::dispatcher::EventDispatcher;
use crate::error::{QueueError, QueueResult};
use crate::job::HandlerRegistry;
use crate::types::topics;

/// Connector factory producing a backend from a connection config
pub type Connector =
    Arc<dyn Fn(&ConnectionConfig, &QueueContext) -> QueueResult<Arc<dyn Queue>> + Send + Sync>;

type MaintenanceCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Resolves named connections to queue backends via a pluggable connector
/// registry
///
/// Backends are resolved lazily, cached per connection name, and receive the
/// shared [`QueueContext`] exactly once at construction. The `sync`,
/// `memory`, and `null` connectors are built in; further drivers register
/// through [`extend`].
///
/// [`extend`]: QueueManager::extend
pub struct QueueManager {
    config: QueueConfig,
    handlers: Arc<HandlerRegistry>,
    events: Arc<EventDispatcher>,
    connectors: RwLock<HashMap<String, Connector>>,
    connections: RwLock<HashMap<String, Arc<dyn Queue>>>,
    maintenance: RwLock<Option<MaintenanceCheck>>,
}

impl QueueManager {
    /// Create a manager with the built-in connectors registered
    pub fn new(
        config: QueueConfig,
        handlers: Arc<HandlerRegistry>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        let manager = Self {
            config,
            handlers,
            events,
            connectors: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            maintenance: RwLock::new(None),
        };

        manager.add_connector("sync", |config, context| {
            let queue: Arc<dyn Queue> = Arc::new(SyncQueue::new(config, context.clone()));
            Ok(queue)
        });
        manager.add_connector("memory", |config, context| {
            let queue: Arc<dyn Queue> = Arc::new(MemoryQueue::new(config, context.clone()));
            Ok(queue)
        });
        manager.add_connector("null", |_config, _context| {
            let queue: Arc<dyn Queue> = Arc::new(NullQueue::new());
            Ok(queue)
        });

        manager
    }

    /// Register a connector for a driver name
    pub fn add_connector<F>(&self, driver: &str, connector: F)
    where
        F: Fn(&ConnectionConfig, &QueueContext) -> QueueResult<Arc<dyn Queue>>
            + Send
            + Sync
            + 'static,
    {
        self.connectors
            .write()
            .insert(driver.to_string(), Arc::new(connector));
    }

    /// Register a connector for a driver name (alias for [`add_connector`])
    ///
    /// [`add_connector`]: QueueManager::add_connector
    pub fn extend<F>(&self, driver: &str, connector: F)
    where
        F: Fn(&ConnectionConfig, &QueueContext) -> QueueResult<Arc<dyn Queue>>
            + Send
            + Sync
            + 'static,
    {
        self.add_connector(driver, connector);
    }

    /// Resolve a queue connection, caching it by name.
    ///
    /// `None` resolves the configured default. Unknown connection names and
    /// unregistered drivers are configuration errors, raised synchronously.
    pub fn connection(&self, name: Option<&str>) -> QueueResult<Arc<dyn Queue>> {
        let name = name.unwrap_or(&self.config.default).to_string();

        if let Some(existing) = self.connections.read().get(&name) {
            return Ok(Arc::clone(existing));
        }

        let resolved = self.resolve(&name)?;
        info!(connection = %name, "resolved queue connection");

        let mut connections = self.connections.write();
        let connection = connections.entry(name).or_insert(resolved);
        Ok(Arc::clone(connection))
    }

    fn resolve(&self, name: &str) -> QueueResult<Arc<dyn Queue>> {
        let config = self.config.connection(name)?;

        let connector = self
            .connectors
            .read()
            .get(&config.driver)
            .cloned()
            .ok_or_else(|| QueueError::UnknownDriver(config.driver.clone()))?;

        let context = QueueContext::new(Arc::clone(&self.handlers));
        connector(config, &context)
    }

    /// Check whether a connection has already been resolved
    pub fn connected(&self, name: Option<&str>) -> bool {
        let name = name.unwrap_or(&self.config.default);
        self.connections.read().contains_key(name)
    }

    /// Get the full name for the given connection
    pub fn connection_name(&self, name: Option<&str>) -> String {
        name.unwrap_or(&self.config.default).to_string()
    }

    /// Name of the configured default connection
    pub fn default_connection(&self) -> &str {
        &self.config.default
    }

    /// Register a callback for the before-job event
    pub fn before<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.events.listen(topics::PROCESSING, callback);
    }

    /// Register a callback for the after-job event
    pub fn after<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.events.listen(topics::PROCESSED, callback);
    }

    /// Register a callback for the job-exception event
    pub fn exception_occurred<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.events.listen(topics::EXCEPTION, callback);
    }

    /// Register a callback for the failed-job event
    pub fn failing<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.events.listen(topics::FAILED, callback);
    }

    /// Register a callback for the daemon loop tick.
    ///
    /// Returning `Bool(false)` vetoes processing for that iteration.
    pub fn looping<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.events.listen(topics::LOOPING, callback);
    }

    /// Register a callback for the worker-stopping event
    pub fn stopping<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.events.listen(topics::STOPPING, callback);
    }

    /// Install the host's maintenance-mode check
    pub fn set_maintenance_check<F>(&self, check: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        *self.maintenance.write() = Some(Arc::new(check));
    }

    /// Whether the host application is down for maintenance
    pub fn is_down_for_maintenance(&self) -> bool {
        self.maintenance.read().as_ref().map(|check| check()).unwrap_or(false)
    }

    /// Wire the dispatcher's queue hook to this manager's default connection
    /// so queued listeners can enqueue call-back jobs.
    ///
    /// Pushes are spawned fire-and-forget on the current tokio runtime.
    pub fn enable_queued_listeners(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);

        self.events.set_queue_resolver(move |job, data| {
            let manager = weak
                .upgrade()
                .ok_or_else(|| QueueError::Internal("queue manager dropped".to_string()))?;
            let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                QueueError::Internal("queued listeners require a tokio runtime".to_string())
            })?;

            let job = job.to_string();
            handle.spawn(async move {
                match manager.connection(None) {
                    Ok(connection) => {
                        if let Err(err) = connection.push(&job, data, None).await {
                            error!(handler = %job, %err, "queued listener push failed");
                        }
                    }
                    Err(err) => error!(%err, "queued listener could not resolve connection"),
                }
            });

            Ok(())
        });
    }

    /// Shared event dispatcher
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Shared handler registry
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }
}
