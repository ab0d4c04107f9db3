//! Shared in-memory key/value store for passing small artifacts between
//! steps. Coordination between producer and consumer steps is the steps'
//! responsibility; the dependency graph edges are the intended mechanism.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryDataStore {
    values: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, scope: &str, key: &str, value: Value) {
        self.values
            .write()
            .await
            .insert((scope.to_string(), key.to_string()), value);
    }

    pub async fn get(&self, scope: &str, key: &str) -> Option<Value> {
        self.values
            .read()
            .await
            .get(&(scope.to_string(), key.to_string()))
            .cloned()
    }
}
