//! # jobline: Pluggable-Backend Background Job Queue
//!
//! Producers push JSON payload envelopes onto named connections; a daemon
//! [`Worker`] pops and executes them through a compile-time
//! [`HandlerRegistry`], enforcing a retry ceiling and publishing every
//! lifecycle transition on a priority/wildcard [`EventDispatcher`].
//!
//! ## Design points
//!
//! - **Pluggable backends**: `sync`, `memory`, and `null` drivers are built
//!   in; a database-backed driver runs over any [`ListStore`] the host
//!   provides, and new drivers register through the connector registry
//!   without touching the manager.
//! - **Loss-tolerant loop**: handler errors release the delivery back onto
//!   the queue, dequeue errors count as an idle tick, and the daemon only
//!   ever stops on its memory ceiling or a restart signal.
//! - **Reference payloads**: stateful domain entities travel by
//!   [`EntityRef`] token, never by value.
//! - **No code on the wire**: jobs carry a handler reference resolved
//!   against handlers registered up front.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! use jobline::prelude::*;
//!
//! struct SendWelcomeEmail;
//!
//! #[async_trait]
//! impl JobHandler for SendWelcomeEmail {
//!     async fn handle(&self, job: &mut dyn Job, data: Value) -> Result<(), JobError> {
//!         println!("welcoming {}", data["user"]);
//!         job.delete().await?;
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), QueueError> {
//! let handlers = Arc::new(HandlerRegistry::new());
//! handlers.register("emails.welcome", Arc::new(SendWelcomeEmail));
//!
//! let config: QueueConfig = serde_json::from_value(json!({
//!     "default": "memory",
//!     "connections": { "memory": { "driver": "memory" } }
//! }))?;
//!
//! let events = Arc::new(EventDispatcher::new());
//! let manager = Arc::new(QueueManager::new(config, handlers, events));
//!
//! manager
//!     .connection(None)?
//!     .push("emails.welcome", json!({ "user": "7" }), None)
//!     .await?;
//!
//! let worker = Worker::new(Arc::clone(&manager), Arc::new(MemoryFailedJobProvider::new()));
//! worker.daemon(&WorkerOptions::default()).await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod failed;
pub mod job;
pub mod manager;
pub mod types;
pub mod worker;

// Core API exports
pub use backend::memory::MemoryQueue;
pub use backend::null::NullQueue;
pub use backend::store::{store_connector, ListStore, MemoryStore, StoreQueue};
pub use backend::sync::SyncQueue;
pub use backend::{Queue, QueueContext};
pub use config::{ConnectionConfig, QueueConfig};
pub use dispatcher::EventDispatcher;
pub use error::{JobError, QueueError, QueueResult};
pub use failed::{FailedJobEntry, FailedJobProvider, MemoryFailedJobProvider, NullFailedJobProvider};
pub use job::{HandlerRegistry, Job, JobHandler, JobState};
pub use manager::{Connector, QueueManager};
pub use types::{topics, Delay, EntityRef, Payload, QueueEvent};
pub use worker::{
    ExceptionReporter, MemoryRestartSignal, PopOutcome, RestartSignal, TracingReporter, Worker,
    WorkerExit, WorkerOptions,
};

/// Everything needed to define handlers and run a worker
pub mod prelude {
    pub use crate::backend::{Queue, QueueContext};
    pub use crate::config::{ConnectionConfig, QueueConfig};
    pub use crate::dispatcher::EventDispatcher;
    pub use crate::error::{JobError, QueueError, QueueResult};
    pub use crate::failed::{FailedJobProvider, MemoryFailedJobProvider};
    pub use crate::job::{HandlerRegistry, Job, JobHandler};
    pub use crate::manager::QueueManager;
    pub use crate::types::{topics, Delay, EntityRef, Payload};
    pub use crate::worker::{Worker, WorkerExit, WorkerOptions};

    pub use async_trait::async_trait;
}
