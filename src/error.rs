use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("unknown queue connection: {0}")]
    UnknownConnection(String),

    #[error("no connector registered for driver: {0}")]
    UnknownDriver(String),

    #[error("dequeue failed on queue {queue}: {reason}")]
    Dequeue { queue: String, reason: String },

    #[error("job handler error: {0}")]
    Handler(#[from] JobError),

    #[error("job has already been deleted")]
    JobDeleted,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Create a dequeue error for the given queue
    pub fn dequeue(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dequeue {
            queue: queue.into(),
            reason: reason.into(),
        }
    }
}

/// Handler-level error raised while firing a job.
///
/// Every variant is transient from the worker's point of view: the delivery
/// is released back onto the queue and only the configured attempt ceiling
/// declares a job permanently failed.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    #[error("no handler registered for: {0}")]
    NotRegistered(String),

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("{0}")]
    Failed(String),
}

impl JobError {
    /// Create a handler failure with the given message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::NotRegistered(msg) | Self::Payload(msg) | Self::Failed(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        Self::Failed(err.to_string())
    }
}
