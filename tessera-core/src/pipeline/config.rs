use super::{AsyncSplitterPipeline, Pipeline, SingleObjectPipeline};
use crate::datastor::Cluster;
use crate::distribution::DistributionConfig;
use crate::hashing::HashingConfig;
use crate::processing::{CompressionConfig, EncryptionConfig, processor_constructor};
use crate::storage::{ChunkStorage, DistributedChunkStorage, RandomChunkStorage};
use crate::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Split size in bytes; 0 stores every stream as a single chunk.
    #[serde(default)]
    pub block_size: usize,
    /// Processor workers per call, 0 for one per logical CPU.
    #[serde(default)]
    pub job_count: usize,
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub compression: Option<CompressionConfig>,
    #[serde(default)]
    pub encryption: Option<EncryptionConfig>,
    #[serde(default)]
    pub distribution: DistributionConfig,
}

/// Builds the pipeline described by `config` on top of `cluster`.
pub fn new_pipeline(config: &PipelineConfig, cluster: Arc<Cluster>) -> Result<Arc<dyn Pipeline>> {
    let required = config.distribution.required_shard_count();
    if required > cluster.listed_shard_count() {
        return Err(TesseraError::Config(format!(
            "distribution requires {} shards, cluster has {}",
            required,
            cluster.listed_shard_count()
        )));
    }

    let fallback_key = config
        .encryption
        .as_ref()
        .map(|encryption| encryption.private_key.as_str());
    let hasher = config.hashing.constructor(fallback_key)?;
    let processor =
        processor_constructor(config.compression.as_ref(), config.encryption.as_ref())?;

    let storage: Arc<dyn ChunkStorage> = match config.distribution.distributor()? {
        None => Arc::new(RandomChunkStorage::new(cluster)),
        Some(distributor) => Arc::new(DistributedChunkStorage::new(
            cluster,
            distributor,
            config.job_count,
        )?),
    };

    tracing::debug!(
        "pipeline configured. block_size={} data_shards={} parity_shards={} hashing={}",
        config.block_size,
        config.distribution.data_shards,
        config.distribution.parity_shards,
        config.hashing.hash_type
    );

    if config.block_size == 0 {
        return Ok(Arc::new(SingleObjectPipeline::new(hasher, processor, storage)));
    }
    Ok(Arc::new(AsyncSplitterPipeline::new(
        config.block_size,
        config.job_count,
        hasher,
        processor,
        storage,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::{memory_cluster, random_bytes};
    use crate::processing::{CompressionMode, CompressionType, EncryptionType};
    use crate::storage::CheckStatus;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_deserialize_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"block_size": 4096, "compression": {"type": "gzip", "mode": "best_speed"}}"#,
        )
        .unwrap();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.job_count, 0);
        assert!(config.encryption.is_none());
        assert!(config.distribution.is_random());
        let compression = config.compression.unwrap();
        assert_eq!(compression.compression_type, CompressionType::Gzip);
        assert_eq!(compression.mode, CompressionMode::BestSpeed);
    }

    #[test]
    fn test_distribution_larger_than_cluster() {
        let (_, cluster) = memory_cluster(3);
        let config = PipelineConfig {
            distribution: DistributionConfig {
                data_shards: 3,
                parity_shards: 1,
            },
            ..Default::default()
        };
        assert!(matches!(
            new_pipeline(&config, cluster),
            Err(TesseraError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_encryption_key() {
        let (_, cluster) = memory_cluster(1);
        let config = PipelineConfig {
            encryption: Some(EncryptionConfig {
                encryption_type: EncryptionType::Aes,
                private_key: "short".to_string(),
            }),
            ..Default::default()
        };
        assert!(new_pipeline(&config, cluster).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pipeline_kinds() {
        let data = random_bytes(3000);
        let cancel = CancellationToken::new();
        for block_size in [0, 1024] {
            for (data_shards, parity_shards) in [(0, 0), (2, 0), (2, 1)] {
                let (_, cluster) = memory_cluster(3);
                let config = PipelineConfig {
                    block_size,
                    job_count: 2,
                    compression: Some(CompressionConfig {
                        compression_type: CompressionType::Snappy,
                        mode: CompressionMode::Default,
                    }),
                    encryption: Some(EncryptionConfig {
                        encryption_type: EncryptionType::Aes,
                        private_key: "0123456789abcdef".to_string(),
                    }),
                    distribution: DistributionConfig {
                        data_shards,
                        parity_shards,
                    },
                    ..Default::default()
                };
                let pipeline = new_pipeline(&config, cluster).unwrap();
                assert_eq!(pipeline.chunk_size(), block_size);

                let chunks = pipeline.write(&mut data.as_slice(), &cancel).await.unwrap();
                let expected_chunks = if block_size == 0 { 1 } else { 3 };
                assert_eq!(chunks.len(), expected_chunks);
                let expected_parts = data_shards.max(1) + parity_shards;
                assert!(chunks.iter().all(|c| c.objects.len() == expected_parts));
                assert_eq!(chunks.iter().map(|c| c.size).sum::<i64>(), 3000);

                assert_eq!(
                    pipeline.check(&chunks, false, &cancel).await.unwrap(),
                    CheckStatus::Optimal
                );
                let mut output = Vec::new();
                pipeline.read(&chunks, &mut output, &cancel).await.unwrap();
                assert_eq!(output, data);
            }
        }
    }

    #[tokio::test]
    async fn test_hashing_key_falls_back_to_encryption_key() {
        let (_, cluster) = memory_cluster(1);
        let encryption = EncryptionConfig {
            encryption_type: EncryptionType::Aes,
            private_key: "0123456789abcdef".to_string(),
        };
        let keyed = PipelineConfig {
            encryption: Some(encryption.clone()),
            ..Default::default()
        };
        let unkeyed = PipelineConfig::default();
        let cancel = CancellationToken::new();

        let keyed_chunks = new_pipeline(&keyed, cluster.clone())
            .unwrap()
            .write(&mut &b"payload"[..], &cancel)
            .await
            .unwrap();
        let unkeyed_chunks = new_pipeline(&unkeyed, cluster)
            .unwrap()
            .write(&mut &b"payload"[..], &cancel)
            .await
            .unwrap();
        assert_ne!(keyed_chunks[0].hash, unkeyed_chunks[0].hash);

        let expected = crate::hashing::new_hasher(
            crate::hashing::HashType::Blake2b256,
            Some(encryption.private_key.as_bytes()),
        )
        .unwrap()
        .hash(b"payload");
        assert_eq!(keyed_chunks[0].hash, expected);
    }
}
