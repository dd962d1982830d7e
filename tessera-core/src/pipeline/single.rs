use super::{Pipeline, Reader, Writer, owned_output};
use crate::hashing::HasherConstructor;
use crate::metatypes::Chunk;
use crate::processing::ProcessorConstructor;
use crate::storage::{CheckStatus, ChunkConfig, ChunkStorage};
use crate::task::cancellable;
use crate::{Result, TesseraError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Stores a whole stream as one chunk, sequentially.
#[derive(Clone)]
pub struct SingleObjectPipeline {
    hasher: HasherConstructor,
    processor: ProcessorConstructor,
    storage: Arc<dyn ChunkStorage>,
}

impl SingleObjectPipeline {
    pub fn new(
        hasher: HasherConstructor,
        processor: ProcessorConstructor,
        storage: Arc<dyn ChunkStorage>,
    ) -> Self {
        Self {
            hasher,
            processor,
            storage,
        }
    }

    async fn write_block(
        &self,
        data: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Chunk> {
        let hash = (self.hasher)()?.hash(&data);
        let mut processor = (self.processor)()?;
        let shared = processor.shared_write_buffer();

        let processed = {
            let output = processor.write_process(&data)?;
            owned_output(output, &data, shared)
        };
        let size = data.len();
        let processed = processed.unwrap_or(data);

        let config = self.storage.write_chunk(&processed, cancel).await?;
        Ok(Chunk {
            size: size as i64,
            stored_size: config.size as i64,
            hash,
            objects: config.objects,
        })
    }
}

#[async_trait]
impl Pipeline for SingleObjectPipeline {
    async fn write(
        &self,
        reader: &mut Reader<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Chunk>> {
        let mut data = Vec::new();
        cancellable(cancel, async {
            reader.read_to_end(&mut data).await?;
            Ok(())
        })
        .await?;

        if data.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![self.write_block(data, cancel).await?])
    }

    async fn read(
        &self,
        chunks: &[Chunk],
        writer: &mut Writer<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let chunk = match chunks {
            [] => return Ok(()),
            [chunk] => chunk,
            _ => {
                return Err(TesseraError::InvalidRequest(format!(
                    "single object pipeline reads exactly one chunk, got {}",
                    chunks.len()
                )));
            }
        };

        let data = self
            .storage
            .read_chunk(&ChunkConfig::from(chunk), cancel)
            .await?;

        let mut processor = (self.processor)()?;
        let plain = processor.read_process(&data)?;
        if (self.hasher)()?.hash(&plain) != chunk.hash {
            return Err(TesseraError::IntegrityMismatch { index: 0 });
        }

        cancellable(cancel, async {
            writer.write_all(&plain).await?;
            writer.flush().await?;
            Ok(())
        })
        .await
    }

    async fn check(
        &self,
        chunks: &[Chunk],
        fast: bool,
        cancel: &CancellationToken,
    ) -> Result<CheckStatus> {
        let mut status = CheckStatus::Optimal;
        for chunk in chunks {
            let chunk_status = self
                .storage
                .check_chunk(&ChunkConfig::from(chunk), fast, cancel)
                .await?;
            status = status.min(chunk_status);
            if status == CheckStatus::Invalid {
                break;
            }
        }
        Ok(status)
    }

    async fn repair(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<Vec<Chunk>> {
        let mut repaired = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let config = self
                .storage
                .repair_chunk(&ChunkConfig::from(chunk), cancel)
                .await?;
            repaired.push(Chunk {
                stored_size: config.size as i64,
                objects: config.objects,
                ..chunk.clone()
            });
        }
        Ok(repaired)
    }

    async fn delete(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<()> {
        for chunk in chunks {
            self.storage
                .delete_chunk(&ChunkConfig::from(chunk), cancel)
                .await?;
        }
        Ok(())
    }

    fn chunk_size(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::{HashType, HashingConfig};
    use crate::pipeline::testutil::{memory_cluster, random_bytes};
    use crate::processing::{
        CompressionConfig, CompressionMode, CompressionType, EncryptionConfig, EncryptionType,
        processor_constructor,
    };
    use crate::storage::RandomChunkStorage;

    fn pipeline(
        compression: Option<CompressionConfig>,
        encryption: Option<EncryptionConfig>,
    ) -> SingleObjectPipeline {
        let (_, cluster) = memory_cluster(2);
        let hasher = HashingConfig {
            hash_type: HashType::Sha256,
            private_key: None,
        }
        .constructor(None)
        .unwrap();
        let processor = processor_constructor(compression.as_ref(), encryption.as_ref()).unwrap();
        SingleObjectPipeline::new(hasher, processor, Arc::new(RandomChunkStorage::new(cluster)))
    }

    #[tokio::test]
    async fn test_round_trip() {
        let pipeline = pipeline(
            Some(CompressionConfig {
                compression_type: CompressionType::Snappy,
                mode: CompressionMode::Default,
            }),
            Some(EncryptionConfig {
                encryption_type: EncryptionType::Aes,
                private_key: "0123456789abcdef".to_string(),
            }),
        );
        let cancel = CancellationToken::new();
        let data = random_bytes(10_000);

        let chunks = pipeline.write(&mut data.as_slice(), &cancel).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].size, 10_000);
        assert_eq!(chunks[0].objects.len(), 1);

        let mut output = Vec::new();
        pipeline.read(&chunks, &mut output, &cancel).await.unwrap();
        assert_eq!(output, data);

        assert_eq!(
            pipeline.check(&chunks, false, &cancel).await.unwrap(),
            CheckStatus::Optimal
        );
    }

    #[tokio::test]
    async fn test_integrity_mismatch() {
        let pipeline = pipeline(None, None);
        let cancel = CancellationToken::new();

        let mut chunks = pipeline.write(&mut &b"payload"[..], &cancel).await.unwrap();
        chunks[0].hash[0] ^= 0xff;

        let mut output = Vec::new();
        let result = pipeline.read(&chunks, &mut output, &cancel).await;
        assert!(matches!(result, Err(TesseraError::IntegrityMismatch { index: 0 })));
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let pipeline = pipeline(None, None);
        let cancel = CancellationToken::new();

        let chunks = pipeline.write(&mut &b""[..], &cancel).await.unwrap();
        assert!(chunks.is_empty());

        let mut output = Vec::new();
        pipeline.read(&chunks, &mut output, &cancel).await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_read_rejects_many_chunks() {
        let pipeline = pipeline(None, None);
        let cancel = CancellationToken::new();
        let mut chunks = pipeline.write(&mut &b"abc"[..], &cancel).await.unwrap();
        chunks.push(chunks[0].clone());

        let mut output = Vec::new();
        assert!(matches!(
            pipeline.read(&chunks, &mut output, &cancel).await,
            Err(TesseraError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let pipeline = pipeline(None, None);
        let cancel = CancellationToken::new();
        let chunks = pipeline.write(&mut &b"abc"[..], &cancel).await.unwrap();

        pipeline.delete(&chunks, &cancel).await.unwrap();
        assert_eq!(
            pipeline.check(&chunks, true, &cancel).await.unwrap(),
            CheckStatus::Invalid
        );
    }
}
