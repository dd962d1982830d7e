use super::{KvStore, ListFn, UpdateFn};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tessera_core::{Result, TesseraError};

struct Entry {
    value: Vec<u8>,
    version: u64,
}

/// In-process store for tests and single-process tools.
///
/// Every write bumps a per-key version; `update` only commits when the
/// version it read is still current.
#[derive(Default)]
pub struct MemoryKv {
    namespaces: RwLock<HashMap<Vec<u8>, BTreeMap<Vec<u8>, Entry>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> TesseraError {
        TesseraError::internal("MEMORY", "lock poisoned")
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set(&self, namespace: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        let mut namespaces = self.namespaces.write().map_err(|_| Self::poisoned())?;
        let entries = namespaces.entry(namespace.to_vec()).or_default();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = value.to_vec();
                entry.version += 1;
            }
            None => {
                entries.insert(
                    key.to_vec(),
                    Entry {
                        value: value.to_vec(),
                        version: 1,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get(&self, namespace: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let namespaces = self.namespaces.read().map_err(|_| Self::poisoned())?;
        namespaces
            .get(namespace)
            .and_then(|entries| entries.get(key))
            .map(|entry| entry.value.clone())
            .ok_or(TesseraError::NotFound)
    }

    async fn delete(&self, namespace: &[u8], key: &[u8]) -> Result<()> {
        let mut namespaces = self.namespaces.write().map_err(|_| Self::poisoned())?;
        if let Some(entries) = namespaces.get_mut(namespace) {
            entries.remove(key);
        }
        Ok(())
    }

    async fn update(
        &self,
        namespace: &[u8],
        key: &[u8],
        callback: &mut UpdateFn<'_>,
    ) -> Result<()> {
        loop {
            let (current, version) = {
                let namespaces = self.namespaces.read().map_err(|_| Self::poisoned())?;
                let entry = namespaces
                    .get(namespace)
                    .and_then(|entries| entries.get(key))
                    .ok_or(TesseraError::NotFound)?;
                (entry.value.clone(), entry.version)
            };

            let updated = callback(&current)?;

            let mut namespaces = self.namespaces.write().map_err(|_| Self::poisoned())?;
            let entry = namespaces
                .get_mut(namespace)
                .and_then(|entries| entries.get_mut(key));
            match entry {
                Some(entry) if entry.version == version => {
                    entry.value = updated;
                    entry.version += 1;
                    return Ok(());
                }
                // deleted or replaced in the meantime, start over
                _ => {
                    tracing::debug!(
                        "memory update conflict, retrying. key={}",
                        String::from_utf8_lossy(key)
                    );
                    continue;
                }
            }
        }
    }

    async fn list_keys(&self, namespace: &[u8], callback: &mut ListFn<'_>) -> Result<()> {
        let keys: Vec<Vec<u8>> = {
            let namespaces = self.namespaces.read().map_err(|_| Self::poisoned())?;
            namespaces
                .get(namespace)
                .map(|entries| entries.keys().cloned().collect())
                .unwrap_or_default()
        };
        for key in keys {
            callback(&key)?;
        }
        Ok(())
    }
}
