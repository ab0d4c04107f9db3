//! Process-wide `_key` admission tracking.

use std::collections::HashSet;

use tokio::sync::Mutex;

/// Run-scoped set of graph object keys admitted so far. The first insertion
/// of a key wins; later insertions are rejected at the job state layer.
#[derive(Debug, Default)]
pub struct DuplicateKeyTracker {
    keys: Mutex<HashSet<String>>,
}

impl DuplicateKeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key. Returns `true` when the key was newly admitted,
    /// `false` when it was already present.
    pub async fn register(&self, key: &str) -> bool {
        self.keys.lock().await.insert(key.to_string())
    }

    /// Whether a key has been admitted.
    pub async fn contains(&self, key: &str) -> bool {
        self.keys.lock().await.contains(key)
    }

    /// Number of admitted keys.
    pub async fn len(&self) -> usize {
        self.keys.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.lock().await.is_empty()
    }
}
