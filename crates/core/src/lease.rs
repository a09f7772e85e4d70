use dashmap::DashSet;
use std::sync::Arc;

/// Process-wide registry of documents that currently have a job in flight.
#[derive(Debug, Clone, Default)]
pub struct DocumentLeases {
    held: Arc<DashSet<String>>,
}

impl DocumentLeases {
    /// Returns `None` when another job already holds `document_id`.
    pub fn try_acquire(&self, document_id: &str) -> Option<LeaseGuard> {
        if self.held.insert(document_id.to_string()) {
            Some(LeaseGuard {
                held: Arc::clone(&self.held),
                document_id: document_id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_held(&self, document_id: &str) -> bool {
        self.held.contains(document_id)
    }
}

/// Releases the lease when dropped.
#[derive(Debug)]
pub struct LeaseGuard {
    held: Arc<DashSet<String>>,
    document_id: String,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.held.remove(&self.document_id);
    }
}
