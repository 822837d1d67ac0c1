//! List-store abstraction behind the shared fast tier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use clinichat_core::{ClinichatResult, StorageError};
use tokio::time::Instant;

/// Keyspace numbers reported by a list store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListStoreStats {
    pub keys: u64,
    pub items: u64,
    /// Store-wide memory usage when the store reports it
    pub memory_bytes: Option<u64>,
}

/// A network-shared store of string lists with per-key expiry.
///
/// Every mutating call must be atomic for its key so concurrent writers
/// from different processes never lose appends.
#[async_trait]
pub trait SharedListStore: Send + Sync {
    /// Full list, or `None` when the key is absent or expired.
    async fn fetch(&self, key: &str) -> ClinichatResult<Option<Vec<String>>>;

    /// Append, keep only the newest `keep_last` items (0 keeps all) and set the TTL.
    async fn push(
        &self,
        key: &str,
        value: String,
        keep_last: usize,
        ttl: Duration,
    ) -> ClinichatResult<()>;

    /// Replace the list wholesale and set the TTL. An empty list deletes the key.
    async fn overwrite(&self, key: &str, values: Vec<String>, ttl: Duration)
        -> ClinichatResult<()>;

    /// Put the values not already in the list in front of it, keeping their
    /// order, then keep the newest `keep_last` items (0 keeps all) and set
    /// the TTL. Creates the key when absent.
    async fn prepend_missing(
        &self,
        key: &str,
        values: Vec<String>,
        keep_last: usize,
        ttl: Duration,
    ) -> ClinichatResult<()>;

    /// Refresh the TTL of each existing key.
    async fn touch(&self, keys: &[String], ttl: Duration) -> ClinichatResult<()>;

    async fn delete(&self, keys: &[String]) -> ClinichatResult<()>;

    /// Count keys starting with `prefix` and their items.
    async fn keyspace(&self, prefix: &str) -> ClinichatResult<ListStoreStats>;

    fn describe(&self) -> String;

    async fn close(&self) {}
}

// ============================================================================
// IN-PROCESS IMPLEMENTATION
// ============================================================================

#[derive(Debug, Clone)]
struct ExpiringList {
    items: Vec<String>,
    expires_at: Instant,
}

/// In-process list store with the same expiry semantics as the network store.
///
/// Used for single-instance deployments and tests. It can be switched into
/// an unavailable state to exercise tier fallback.
#[derive(Debug, Default)]
pub struct InMemoryListStore {
    lists: RwLock<HashMap<String, ExpiringList>>,
    unavailable: AtomicBool,
}

impl InMemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Store a raw item as-is, bypassing serialization.
    pub fn inject_raw(&self, key: &str, raw: impl Into<String>, ttl: Duration) {
        if let Ok(mut lists) = self.lists.write() {
            let entry = lists.entry(key.to_string()).or_insert_with(|| ExpiringList {
                items: Vec::new(),
                expires_at: Instant::now() + ttl,
            });
            entry.items.push(raw.into());
            entry.expires_at = Instant::now() + ttl;
        }
    }

    fn check_available(&self) -> ClinichatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::TierUnavailable {
                tier: "in_memory_list_store".to_string(),
                reason: "store marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl SharedListStore for InMemoryListStore {
    async fn fetch(&self, key: &str) -> ClinichatResult<Option<Vec<String>>> {
        self.check_available()?;
        let now = Instant::now();
        let mut lists = self.lists.write().map_err(|_| StorageError::LockPoisoned)?;
        let expired = match lists.get(key) {
            Some(list) if list.expires_at > now => return Ok(Some(list.items.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            lists.remove(key);
        }
        Ok(None)
    }

    async fn push(
        &self,
        key: &str,
        value: String,
        keep_last: usize,
        ttl: Duration,
    ) -> ClinichatResult<()> {
        self.check_available()?;
        let now = Instant::now();
        let mut lists = self.lists.write().map_err(|_| StorageError::LockPoisoned)?;
        let list = lists.entry(key.to_string()).or_insert_with(|| ExpiringList {
            items: Vec::new(),
            expires_at: now,
        });
        if list.expires_at <= now {
            list.items.clear();
        }
        list.items.push(value);
        if keep_last > 0 && list.items.len() > keep_last {
            let excess = list.items.len() - keep_last;
            list.items.drain(..excess);
        }
        list.expires_at = now + ttl;
        Ok(())
    }

    async fn overwrite(
        &self,
        key: &str,
        values: Vec<String>,
        ttl: Duration,
    ) -> ClinichatResult<()> {
        self.check_available()?;
        let mut lists = self.lists.write().map_err(|_| StorageError::LockPoisoned)?;
        if values.is_empty() {
            lists.remove(key);
        } else {
            lists.insert(
                key.to_string(),
                ExpiringList {
                    items: values,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        Ok(())
    }

    async fn prepend_missing(
        &self,
        key: &str,
        values: Vec<String>,
        keep_last: usize,
        ttl: Duration,
    ) -> ClinichatResult<()> {
        self.check_available()?;
        if values.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut lists = self.lists.write().map_err(|_| StorageError::LockPoisoned)?;
        let list = lists.entry(key.to_string()).or_insert_with(|| ExpiringList {
            items: Vec::new(),
            expires_at: now,
        });
        if list.expires_at <= now {
            list.items.clear();
        }
        let mut merged: Vec<String> = values
            .into_iter()
            .filter(|v| !list.items.contains(v))
            .collect();
        merged.append(&mut list.items);
        if keep_last > 0 && merged.len() > keep_last {
            let excess = merged.len() - keep_last;
            merged.drain(..excess);
        }
        list.items = merged;
        list.expires_at = now + ttl;
        Ok(())
    }

    async fn touch(&self, keys: &[String], ttl: Duration) -> ClinichatResult<()> {
        self.check_available()?;
        let now = Instant::now();
        let mut lists = self.lists.write().map_err(|_| StorageError::LockPoisoned)?;
        for key in keys {
            if let Some(list) = lists.get_mut(key) {
                if list.expires_at > now {
                    list.expires_at = now + ttl;
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> ClinichatResult<()> {
        self.check_available()?;
        let mut lists = self.lists.write().map_err(|_| StorageError::LockPoisoned)?;
        for key in keys {
            lists.remove(key);
        }
        Ok(())
    }

    async fn keyspace(&self, prefix: &str) -> ClinichatResult<ListStoreStats> {
        self.check_available()?;
        let now = Instant::now();
        let lists = self.lists.read().map_err(|_| StorageError::LockPoisoned)?;
        let live = lists
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && v.expires_at > now);
        let mut stats = ListStoreStats::default();
        let mut bytes = 0u64;
        for (_, list) in live {
            stats.keys += 1;
            stats.items += list.items.len() as u64;
            bytes += list.items.iter().map(|i| i.len() as u64).sum::<u64>();
        }
        stats.memory_bytes = Some(bytes);
        Ok(stats)
    }

    fn describe(&self) -> String {
        "in-process".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_push_trims_to_keep_last() {
        let store = InMemoryListStore::new();
        for i in 0..5 {
            store.push("k", i.to_string(), 3, TTL).await.unwrap();
        }
        assert_eq!(
            store.fetch("k").await.unwrap(),
            Some(vec!["2".to_string(), "3".to_string(), "4".to_string()])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_is_absent() {
        let store = InMemoryListStore::new();
        store
            .push("k", "v".to_string(), 0, Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.fetch("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_expiry() {
        let store = InMemoryListStore::new();
        store
            .push("k", "v".to_string(), 0, Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        store
            .touch(&["k".to_string()], Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.fetch("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_prepend_missing_keeps_newer_items() {
        let store = InMemoryListStore::new();
        store.push("k", "c".to_string(), 0, TTL).await.unwrap();
        let loaded = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        store.prepend_missing("k", loaded, 0, TTL).await.unwrap();
        assert_eq!(
            store.fetch("k").await.unwrap(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );

        store
            .prepend_missing("k", vec!["z".to_string()], 2, TTL)
            .await
            .unwrap();
        assert_eq!(
            store.fetch("k").await.unwrap(),
            Some(vec!["b".to_string(), "c".to_string()])
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryListStore::new();
        store.set_unavailable(true);
        assert!(store.fetch("k").await.is_err());
        store.set_unavailable(false);
        assert_eq!(store.fetch("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keyspace_filters_prefix() {
        let store = InMemoryListStore::new();
        store.push("a:1", "x".to_string(), 0, TTL).await.unwrap();
        store.push("a:1", "y".to_string(), 0, TTL).await.unwrap();
        store.push("b:1", "z".to_string(), 0, TTL).await.unwrap();
        let stats = store.keyspace("a:").await.unwrap();
        assert_eq!(stats.keys, 1);
        assert_eq!(stats.items, 2);
    }
}
