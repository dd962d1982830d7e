mod embedded;
mod etcd;
mod factory;
mod memory;

pub use embedded::EmbeddedKv;
pub use etcd::EtcdKv;
pub use factory::KvBuilder;
pub use memory::MemoryKv;

use async_trait::async_trait;
use tessera_core::Result;

/// Receives the current value and returns the value to store in its place.
pub type UpdateFn<'a> = dyn FnMut(&[u8]) -> Result<Vec<u8>> + Send + 'a;

/// Receives one key per call; an error stops the listing and is returned.
pub type ListFn<'a> = dyn FnMut(&[u8]) -> Result<()> + Send + 'a;

/// Binary key-value store scoped by namespace.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn set(&self, namespace: &[u8], key: &[u8], value: &[u8]) -> Result<()>;

    /// Fails with `NotFound` when the key has no value.
    async fn get(&self, namespace: &[u8], key: &[u8]) -> Result<Vec<u8>>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, namespace: &[u8], key: &[u8]) -> Result<()>;

    /// Atomically replaces the value of an existing key.
    ///
    /// On a concurrent modification the value is read again and `callback`
    /// runs again, so it may be invoked more than once. Fails with
    /// `NotFound` when the key has no value.
    async fn update(&self, namespace: &[u8], key: &[u8], callback: &mut UpdateFn<'_>)
    -> Result<()>;

    /// Visits every key of the namespace in lexicographic order.
    async fn list_keys(&self, namespace: &[u8], callback: &mut ListFn<'_>) -> Result<()>;
}

/// Flat key used by backends without native namespaces.
pub(crate) fn namespaced_key(namespace: &[u8], key: &[u8]) -> Vec<u8> {
    let mut full = namespace_prefix(namespace);
    full.extend_from_slice(key);
    full
}

/// `<len>:<namespace>/`; the length keeps one namespace's keys out of
/// another namespace's prefix range.
pub(crate) fn namespace_prefix(namespace: &[u8]) -> Vec<u8> {
    let mut prefix = format!("{}:", namespace.len()).into_bytes();
    prefix.extend_from_slice(namespace);
    prefix.push(b'/');
    prefix
}

#[cfg(test)]
pub(crate) mod suite {
    //! Behaviour shared by every backend.

    use super::KvStore;
    use std::sync::Arc;
    use tessera_core::TesseraError;

    pub async fn basic_operations(kv: &dyn KvStore) {
        let ns = b"suite";
        assert!(matches!(
            kv.get(ns, b"missing").await,
            Err(TesseraError::NotFound)
        ));

        kv.set(ns, b"a", b"first").await.unwrap();
        assert_eq!(kv.get(ns, b"a").await.unwrap(), b"first");
        kv.set(ns, b"a", b"second").await.unwrap();
        assert_eq!(kv.get(ns, b"a").await.unwrap(), b"second");

        // namespaces do not leak into each other
        assert!(kv.get(b"other", b"a").await.is_err());

        kv.delete(ns, b"a").await.unwrap();
        kv.delete(ns, b"a").await.unwrap();
        assert!(matches!(kv.get(ns, b"a").await, Err(TesseraError::NotFound)));
    }

    pub async fn update_semantics(kv: &dyn KvStore) {
        let ns = b"suite-update";
        let result = kv
            .update(ns, b"missing", &mut |value| Ok(value.to_vec()))
            .await;
        assert!(matches!(result, Err(TesseraError::NotFound)));

        kv.set(ns, b"key", b"value").await.unwrap();
        kv.update(ns, b"key", &mut |value| Ok(value.to_vec()))
            .await
            .unwrap();
        assert_eq!(kv.get(ns, b"key").await.unwrap(), b"value");

        let result = kv
            .update(ns, b"key", &mut |_| {
                Err(TesseraError::InvalidRequest("rejected".to_string()))
            })
            .await;
        assert!(matches!(result, Err(TesseraError::InvalidRequest(_))));
        assert_eq!(kv.get(ns, b"key").await.unwrap(), b"value");
    }

    pub async fn list_keys_sorted(kv: &dyn KvStore) {
        let ns = b"suite-list";
        for key in ["b", "c", "a", "ab"] {
            kv.set(ns, key.as_bytes(), b"x").await.unwrap();
        }
        kv.set(b"suite-list-other", b"zzz", b"x").await.unwrap();

        let mut keys = Vec::new();
        kv.list_keys(ns, &mut |key| {
            keys.push(String::from_utf8_lossy(key).to_string());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(keys, vec!["a", "ab", "b", "c"]);

        let mut visited = 0;
        let result = kv
            .list_keys(ns, &mut |_| {
                visited += 1;
                if visited == 2 {
                    return Err(TesseraError::Cancelled);
                }
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TesseraError::Cancelled)));
        assert_eq!(visited, 2);
    }

    /// Concurrent increments of a counter must never lose an update.
    pub async fn concurrent_updates(kv: Arc<dyn KvStore>, writers: usize) {
        let ns = b"suite-cas";
        kv.set(ns, b"counter", b"0").await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..writers {
            let kv = kv.clone();
            tasks.push(tokio::spawn(async move {
                kv.update(ns, b"counter", &mut |value| {
                    let current: u64 = std::str::from_utf8(value)
                        .unwrap()
                        .parse()
                        .unwrap();
                    Ok((current + 1).to_string().into_bytes())
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let value = kv.get(ns, b"counter").await.unwrap();
        assert_eq!(value, writers.to_string().into_bytes());
    }
}
