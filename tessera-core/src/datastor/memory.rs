use super::{ObjectStatus, Shard};
use crate::{Result, TesseraError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Shard kept in process memory, with hooks to simulate failures.
pub struct MemoryShard {
    id: String,
    objects: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    corrupted: RwLock<HashSet<Vec<u8>>>,
    available: AtomicBool,
    delay: Option<Duration>,
    puts: AtomicUsize,
}

impl MemoryShard {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objects: RwLock::new(HashMap::new()),
            corrupted: RwLock::new(HashSet::new()),
            available: AtomicBool::new(true),
            delay: None,
            puts: AtomicUsize::new(0),
        }
    }

    /// Every operation sleeps for `delay` first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// An unavailable shard fails every operation.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn remove_object(&self, key: &[u8]) -> bool {
        self.objects.write().await.remove(key).is_some()
    }

    pub async fn corrupt_object(&self, key: &[u8]) {
        self.corrupted.write().await.insert(key.to_vec());
    }

    pub async fn contains(&self, key: &[u8]) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    /// Number of successful puts since creation.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(TesseraError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl Shard for MemoryShard {
    fn identifier(&self) -> &str {
        &self.id
    }

    async fn put(&self, key: &[u8], data: &[u8]) -> Result<()> {
        self.enter().await?;
        self.corrupted.write().await.remove(key);
        self.objects.write().await.insert(key.to_vec(), data.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.enter().await?;
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(TesseraError::NotFound)
    }

    async fn status(&self, key: &[u8]) -> Result<ObjectStatus> {
        self.enter().await?;
        if !self.objects.read().await.contains_key(key) {
            return Ok(ObjectStatus::Missing);
        }
        if self.corrupted.read().await.contains(key) {
            return Ok(ObjectStatus::Corrupted);
        }
        Ok(ObjectStatus::Ok)
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.enter().await?;
        self.objects.write().await.remove(key);
        self.corrupted.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.enter().await?;
        let mut keys: Vec<Vec<u8>> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
