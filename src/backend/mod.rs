pub mod memory;
pub mod null;
pub mod store;
pub mod sync;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::QueueResult;
use crate::job::{HandlerRegistry, Job};
use crate::types::Delay;

/// Dependencies the manager injects into every resolved backend
#[derive(Clone)]
pub struct QueueContext {
    /// Shared handler registry used to fire dequeued jobs
    pub handlers: Arc<HandlerRegistry>,
}

impl QueueContext {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }
}

/// Transport-specific push/pop/delay scheduling for one connection
///
/// `queue: None` targets the connection's configured default queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Push a new job onto the queue
    async fn push(&self, job: &str, data: Value, queue: Option<&str>) -> QueueResult<()>;

    /// Push a new job onto a specific queue
    async fn push_on(&self, queue: &str, job: &str, data: Value) -> QueueResult<()> {
        self.push(job, data, Some(queue)).await
    }

    /// Push a new job onto the queue after a delay
    async fn later(&self, delay: Delay, job: &str, data: Value, queue: Option<&str>)
        -> QueueResult<()>;

    /// Push a delayed job onto a specific queue
    async fn later_on(&self, queue: &str, delay: Delay, job: &str, data: Value) -> QueueResult<()> {
        self.later(delay, job, data, Some(queue)).await
    }

    /// Push a batch of jobs sharing the same data
    async fn bulk(&self, jobs: &[&str], data: Value, queue: Option<&str>) -> QueueResult<()> {
        for job in jobs {
            self.push(job, data.clone(), queue).await?;
        }

        Ok(())
    }

    /// Pop the next available job.
    ///
    /// An empty queue returns `Ok(None)`, never an error.
    async fn pop(&self, queue: Option<&str>) -> QueueResult<Option<Box<dyn Job>>>;
}
