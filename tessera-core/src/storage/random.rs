use super::{CheckStatus, ChunkConfig, ChunkStorage, new_part_key};
use crate::datastor::{Cluster, ObjectStatus};
use crate::metatypes::Object;
use crate::task::cancellable;
use crate::{Result, TesseraError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Stores every chunk whole on a single random shard.
pub struct RandomChunkStorage {
    cluster: Arc<Cluster>,
}

impl RandomChunkStorage {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self { cluster }
    }

    fn single_object(config: &ChunkConfig) -> Result<&Object> {
        match config.objects.as_slice() {
            [object] => Ok(object),
            objects => Err(TesseraError::UnexpectedShardsCount {
                expected: 1,
                actual: objects.len(),
            }),
        }
    }
}

#[async_trait]
impl ChunkStorage for RandomChunkStorage {
    async fn write_chunk(&self, data: &[u8], cancel: &CancellationToken) -> Result<ChunkConfig> {
        let key = new_part_key(data);
        for shard in self.cluster.random_iterator(&HashSet::new()) {
            match cancellable(cancel, shard.put(&key, data)).await {
                Ok(()) => {
                    return Ok(ChunkConfig {
                        size: data.len(),
                        objects: vec![Object {
                            key,
                            shard_id: shard.identifier().to_string(),
                        }],
                    });
                }
                Err(TesseraError::Cancelled) => return Err(TesseraError::Cancelled),
                Err(err) => {
                    tracing::error!(
                        "failed to write chunk to shard. shard={} error={}",
                        shard.identifier(),
                        err
                    );
                }
            }
        }
        Err(TesseraError::ShardsUnavailable)
    }

    async fn read_chunk(
        &self,
        config: &ChunkConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let object = Self::single_object(config)?;
        let shard = cancellable(cancel, self.cluster.get_shard(&object.shard_id)).await?;
        let data = cancellable(cancel, shard.get(&object.key)).await?;
        if data.len() != config.size {
            return Err(TesseraError::InvalidDataSize {
                expected: config.size,
                actual: data.len(),
            });
        }
        Ok(data)
    }

    async fn check_chunk(
        &self,
        config: &ChunkConfig,
        _fast: bool,
        cancel: &CancellationToken,
    ) -> Result<CheckStatus> {
        let object = Self::single_object(config)?;
        let status = async {
            let shard = self.cluster.get_shard(&object.shard_id).await?;
            shard.status(&object.key).await
        };
        match cancellable(cancel, status).await {
            Ok(ObjectStatus::Ok) => Ok(CheckStatus::Optimal),
            Ok(status) => {
                tracing::debug!(
                    "chunk object is not valid. shard={} status={}",
                    object.shard_id,
                    status
                );
                Ok(CheckStatus::Invalid)
            }
            Err(TesseraError::Cancelled) => Err(TesseraError::Cancelled),
            Err(err) => {
                tracing::error!(
                    "failed to check chunk object. shard={} error={}",
                    object.shard_id,
                    err
                );
                Ok(CheckStatus::Invalid)
            }
        }
    }

    async fn repair_chunk(
        &self,
        _config: &ChunkConfig,
        _cancel: &CancellationToken,
    ) -> Result<ChunkConfig> {
        Err(TesseraError::NotSupported(
            "chunks stored on a single random shard cannot be repaired".to_string(),
        ))
    }

    async fn delete_chunk(&self, config: &ChunkConfig, cancel: &CancellationToken) -> Result<()> {
        let object = Self::single_object(config)?;
        let shard = match cancellable(cancel, self.cluster.get_shard(&object.shard_id)).await {
            Ok(shard) => shard,
            Err(TesseraError::NotFound) => {
                tracing::warn!("shard of deleted chunk is unknown. shard={}", object.shard_id);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        cancellable(cancel, shard.delete(&object.key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastor::{MemoryShard, Shard};

    fn setup(count: usize) -> (Vec<Arc<MemoryShard>>, RandomChunkStorage) {
        let shards: Vec<Arc<MemoryShard>> = (0..count)
            .map(|i| Arc::new(MemoryShard::new(format!("shard-{}", i))))
            .collect();
        let cluster = Cluster::new(
            shards
                .iter()
                .map(|shard| shard.clone() as Arc<dyn Shard>)
                .collect(),
        )
        .unwrap();
        (shards, RandomChunkStorage::new(Arc::new(cluster)))
    }

    #[tokio::test]
    async fn test_write_read_check_delete() {
        let (shards, storage) = setup(3);
        let cancel = CancellationToken::new();

        let config = storage.write_chunk(b"hello", &cancel).await.unwrap();
        assert_eq!(config.size, 5);
        assert_eq!(config.objects.len(), 1);

        assert_eq!(storage.read_chunk(&config, &cancel).await.unwrap(), b"hello");
        assert_eq!(
            storage.check_chunk(&config, false, &cancel).await.unwrap(),
            CheckStatus::Optimal
        );

        storage.delete_chunk(&config, &cancel).await.unwrap();
        assert_eq!(
            storage.check_chunk(&config, false, &cancel).await.unwrap(),
            CheckStatus::Invalid
        );
        for shard in &shards {
            assert_eq!(shard.object_count().await, 0);
        }
    }

    #[tokio::test]
    async fn test_corrupted_object_is_invalid() {
        let (shards, storage) = setup(2);
        let cancel = CancellationToken::new();

        let config = storage.write_chunk(b"data", &cancel).await.unwrap();
        let object = &config.objects[0];
        let shard = shards
            .iter()
            .find(|shard| shard.identifier() == object.shard_id)
            .unwrap();
        shard.corrupt_object(&object.key).await;

        for fast in [false, true] {
            assert_eq!(
                storage.check_chunk(&config, fast, &cancel).await.unwrap(),
                CheckStatus::Invalid
            );
        }
    }

    #[tokio::test]
    async fn test_write_skips_unavailable_shards() {
        let (shards, storage) = setup(3);
        shards[0].set_available(false);
        shards[2].set_available(false);
        let cancel = CancellationToken::new();

        let config = storage.write_chunk(b"data", &cancel).await.unwrap();
        assert_eq!(config.objects[0].shard_id, "shard-1");

        shards[1].set_available(false);
        assert!(matches!(
            storage.write_chunk(b"data", &cancel).await,
            Err(TesseraError::ShardsUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_read_validates_input() {
        let (_, storage) = setup(1);
        let cancel = CancellationToken::new();

        let config = storage.write_chunk(b"data", &cancel).await.unwrap();
        let mut wrong_size = config.clone();
        wrong_size.size = 3;
        assert!(matches!(
            storage.read_chunk(&wrong_size, &cancel).await,
            Err(TesseraError::InvalidDataSize { expected: 3, actual: 4 })
        ));

        let mut two_objects = config.clone();
        two_objects.objects.push(config.objects[0].clone());
        assert!(matches!(
            storage.read_chunk(&two_objects, &cancel).await,
            Err(TesseraError::UnexpectedShardsCount { expected: 1, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn test_repair_not_supported() {
        let (_, storage) = setup(1);
        let cancel = CancellationToken::new();
        let config = storage.write_chunk(b"data", &cancel).await.unwrap();
        assert!(matches!(
            storage.repair_chunk(&config, &cancel).await,
            Err(TesseraError::NotSupported(_))
        ));
    }
}
