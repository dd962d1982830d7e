use crate::operations::epoch_now;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{Metadata, Pipeline, Reader, Result, TesseraError};
use tessera_meta::MetaStore;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct WriteObjectOperation {
    pipeline: Arc<dyn Pipeline>,
    metastore: MetaStore,
}

#[derive(Debug, Clone, Default)]
pub struct WriteObjectOperationRequest {
    pub key: Vec<u8>,
    pub previous_key: Option<Vec<u8>>,
    pub user_defined: BTreeMap<String, String>,
}

impl WriteObjectOperation {
    pub fn new(pipeline: Arc<dyn Pipeline>, metastore: MetaStore) -> Self {
        Self {
            pipeline,
            metastore,
        }
    }

    /// Stores the stream and records its metadata.
    ///
    /// When storing the record fails, the chunks already written stay on
    /// the shards unreferenced.
    pub async fn run(
        &self,
        request: WriteObjectOperationRequest,
        reader: &mut Reader<'_>,
        cancel: &CancellationToken,
    ) -> Result<Metadata> {
        let WriteObjectOperationRequest {
            key,
            previous_key,
            user_defined,
        } = request;

        if key.is_empty() {
            return Err(TesseraError::NilKey);
        }

        let chunks = self.pipeline.write(reader, cancel).await?;

        let now = epoch_now();
        let mut metadata = Metadata::new(key);
        metadata.namespace = self.metastore.namespace().to_vec();
        metadata.creation_epoch = now;
        metadata.last_write_epoch = now;
        metadata.chunk_size = i32::try_from(self.pipeline.chunk_size()).unwrap_or(i32::MAX);
        metadata.chunks = chunks;
        metadata.size = metadata.chunks_size();
        metadata.storage_size = metadata.chunks_storage_size();
        metadata.previous_key = previous_key.filter(|key| !key.is_empty());
        metadata.user_defined = user_defined;

        if let Err(err) = self.metastore.set_metadata(metadata.clone()).await {
            tracing::error!(
                "failed to store metadata, written chunks are orphaned. key={} chunks={} error={}",
                String::from_utf8_lossy(&metadata.key),
                metadata.chunks.len(),
                err
            );
            return Err(err);
        }

        tracing::debug!(
            "object written. key={} size={} chunks={}",
            String::from_utf8_lossy(&metadata.key),
            metadata.size,
            metadata.chunks.len()
        );
        Ok(metadata)
    }
}
