//! In-memory storage backend.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::Storage;
use crate::error::Result;

/// Storage that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        // A poisoned map is still consistent: every write is a single insert
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.records().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.records().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .records()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.get("a").await.unwrap().is_none());

        storage.set("a", json!(["x"])).await.unwrap();
        storage.set("b", json!({"y": 1})).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some(json!(["x"])));
        assert_eq!(storage.keys_with_prefix("").await.unwrap(), vec!["a", "b"]);

        storage.remove("a").await.unwrap();
        storage.remove("missing").await.unwrap();
        assert_eq!(storage.keys_with_prefix("").await.unwrap(), vec!["b"]);
    }
}
