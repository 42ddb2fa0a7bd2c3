use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Persists permanently failed jobs
pub trait FailedJobProvider: Send + Sync {
    /// Record a failed job; returns an identifier for the stored entry, or
    /// `None` when the provider discards it.
    fn log(&self, connection: &str, queue: &str, raw_payload: &str) -> Option<u64>;
}

/// One stored failed-job record
#[derive(Debug, Clone)]
pub struct FailedJobEntry {
    pub id: u64,
    pub connection: String,
    pub queue: String,
    pub payload: String,
    pub failed_at: DateTime<Utc>,
}

/// In-memory failed-job sink for tests and single-process deployments
#[derive(Default)]
pub struct MemoryFailedJobProvider {
    entries: RwLock<Vec<FailedJobEntry>>,
    next_id: AtomicU64,
}

impl MemoryFailedJobProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all stored entries
    pub fn all(&self) -> Vec<FailedJobEntry> {
        self.entries.read().clone()
    }

    /// Find a stored entry by id
    pub fn find(&self, id: u64) -> Option<FailedJobEntry> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    /// Remove a stored entry by id; `true` if it was present
    pub fn forget(&self, id: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() < before
    }

    /// Remove every stored entry
    pub fn flush(&self) {
        self.entries.write().clear();
    }
}

impl FailedJobProvider for MemoryFailedJobProvider {
    fn log(&self, connection: &str, queue: &str, raw_payload: &str) -> Option<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        self.entries.write().push(FailedJobEntry {
            id,
            connection: connection.to_string(),
            queue: queue.to_string(),
            payload: raw_payload.to_string(),
            failed_at: Utc::now(),
        });

        Some(id)
    }
}

/// Provider that discards every failed job
#[derive(Debug, Default)]
pub struct NullFailedJobProvider;

impl NullFailedJobProvider {
    pub fn new() -> Self {
        Self
    }
}

impl FailedJobProvider for NullFailedJobProvider {
    fn log(&self, _connection: &str, _queue: &str, _raw_payload: &str) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logged_entries_get_sequential_ids() {
        let provider = MemoryFailedJobProvider::new();

        let first = provider.log("memory", "default", "{}").unwrap();
        let second = provider.log("memory", "high", "{}").unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(provider.all().len(), 2);
        assert_eq!(provider.find(second).unwrap().queue, "high");
    }

    #[test]
    fn forget_and_flush_remove_entries() {
        let provider = MemoryFailedJobProvider::new();
        let id = provider.log("memory", "default", "{}").unwrap();

        assert!(provider.forget(id));
        assert!(!provider.forget(id));

        provider.log("memory", "default", "{}");
        provider.flush();
        assert!(provider.all().is_empty());
    }

    #[test]
    fn null_provider_discards_everything() {
        let provider = NullFailedJobProvider::new();

        assert_eq!(provider.log("memory", "default", "{}"), None);
    }
}
