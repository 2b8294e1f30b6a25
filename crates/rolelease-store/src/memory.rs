//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use rolelease_core::{ContextId, Grant, GrantKey, HistoryEntry};

use crate::error::{Result, StoreError};
use crate::traits::{GrantStore, HistoryLog};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Active grants indexed by key.
    grants: HashMap<GrantKey, Grant>,

    /// History entries in append order.
    history: Vec<HistoryEntry>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of history entries across all keys.
    pub fn history_len(&self) -> usize {
        self.inner.read().map(|inner| inner.history.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn upsert(&self, grant: &Grant) -> Result<()> {
        let mut inner = self.write()?;
        inner.grants.insert(grant.key(), grant.clone());
        Ok(())
    }

    async fn find(&self, key: &GrantKey) -> Result<Option<Grant>> {
        let inner = self.read()?;
        Ok(inner.grants.get(key).cloned())
    }

    async fn delete(&self, key: &GrantKey) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner.grants.remove(key).is_some())
    }

    async fn delete_if_expires_at(&self, key: &GrantKey, expires_at: i64) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.grants.get(key) {
            Some(grant) if grant.expires_at == expires_at => {
                inner.grants.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_reminded(&self, key: &GrantKey, expires_at: i64, at: i64) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.grants.get_mut(key) {
            Some(grant) if grant.expires_at == expires_at => {
                grant.last_reminded_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan_all(&self) -> Result<Vec<Grant>> {
        let inner = self.read()?;
        let mut grants: Vec<Grant> = inner.grants.values().cloned().collect();
        grants.sort_by(|a, b| {
            (a.expires_at, &a.subject_id, &a.entitlement_kind).cmp(&(
                b.expires_at,
                &b.subject_id,
                &b.entitlement_kind,
            ))
        });
        Ok(grants)
    }

    async fn delete_context(&self, context: &ContextId) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.grants.len();
        inner.grants.retain(|_, g| &g.owning_context != context);
        Ok(before - inner.grants.len())
    }
}

#[async_trait]
impl HistoryLog for MemoryStore {
    async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut inner = self.write()?;
        inner.history.push(entry.clone());
        Ok(())
    }

    async fn list_for(&self, key: &GrantKey) -> Result<Vec<HistoryEntry>> {
        let inner = self.read()?;
        let mut entries: Vec<HistoryEntry> = inner
            .history
            .iter()
            .filter(|e| e.subject_id == key.subject && e.entitlement_kind == key.kind)
            .cloned()
            .collect();
        // Stable sort keeps append order for equal instants.
        entries.sort_by_key(|e| e.granted_at);
        Ok(entries)
    }

    async fn purge_context(&self, context: &ContextId) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.history.len();
        inner.history.retain(|e| &e.owning_context != context);
        Ok(before - inner.history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rolelease_core::{apply_grant, GrantRequest, DAY_MS};

    const D: i64 = 50 * DAY_MS;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let t = apply_grant(None, &GrantRequest::new("1", "renewal", "g"), 0, D).unwrap();

        store.upsert(&t.grant).await.unwrap();
        store.append(&t.entry).await.unwrap();

        assert_eq!(store.find(&t.grant.key()).await.unwrap(), Some(t.grant.clone()));
        assert_eq!(store.list_for(&t.grant.key()).await.unwrap(), vec![t.entry]);
        assert_eq!(store.history_len(), 1);
    }

    #[tokio::test]
    async fn test_compare_operations() {
        let store = MemoryStore::new();
        let grant = apply_grant(None, &GrantRequest::new("1", "renewal", "g"), 0, D)
            .unwrap()
            .grant;
        store.upsert(&grant).await.unwrap();

        assert!(!store.mark_reminded(&grant.key(), 1, 10).await.unwrap());
        assert!(store.mark_reminded(&grant.key(), D, 10).await.unwrap());
        assert!(!store.delete_if_expires_at(&grant.key(), 1).await.unwrap());
        assert!(store.delete_if_expires_at(&grant.key(), D).await.unwrap());
        assert!(store.scan_all().await.unwrap().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Grant(u8, i64),
        Delete(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0i64..200 * DAY_MS).prop_map(|(s, now)| Op::Grant(s, now)),
            (0u8..4).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #[test]
        fn at_most_one_row_per_key(ops in proptest::collection::vec(op(), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = MemoryStore::new();
                for op in &ops {
                    match op {
                        Op::Grant(s, now) => {
                            let request = GrantRequest::new(s.to_string(), "renewal", "g");
                            let existing = store.find(&request.key()).await.unwrap();
                            let t = apply_grant(existing.as_ref(), &request, *now, D).unwrap();
                            store.upsert(&t.grant).await.unwrap();
                        }
                        Op::Delete(s) => {
                            store.delete(&GrantKey::new(s.to_string(), "renewal")).await.unwrap();
                        }
                    }
                }

                let rows = store.scan_all().await.unwrap();
                let mut keys: Vec<GrantKey> = rows.iter().map(Grant::key).collect();
                keys.sort();
                keys.dedup();
                assert_eq!(keys.len(), rows.len());
                assert!(rows.len() <= 4);
            });
        }
    }
}
