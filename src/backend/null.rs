use async_trait::async_trait;
use serde_json::Value;

use crate::backend::Queue;
use crate::error::QueueResult;
use crate::job::Job;
use crate::types::Delay;

/// Driver that discards every push and never yields a job
#[derive(Debug, Default)]
pub struct NullQueue;

impl NullQueue {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Queue for NullQueue {
    async fn push(&self, _job: &str, _data: Value, _queue: Option<&str>) -> QueueResult<()> {
        Ok(())
    }

    async fn later(
        &self,
        _delay: Delay,
        _job: &str,
        _data: Value,
        _queue: Option<&str>,
    ) -> QueueResult<()> {
        Ok(())
    }

    async fn pop(&self, _queue: Option<&str>) -> QueueResult<Option<Box<dyn Job>>> {
        Ok(None)
    }
}
