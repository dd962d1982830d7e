use crate::operations::epoch_now;
use std::sync::Arc;
use tessera_core::{Metadata, Pipeline, Result, TesseraError};
use tessera_meta::MetaStore;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RepairObjectOperation {
    pipeline: Arc<dyn Pipeline>,
    metastore: MetaStore,
}

#[derive(Debug, Clone, Default)]
pub struct RepairObjectOperationRequest {
    pub key: Vec<u8>,
}

impl RepairObjectOperation {
    pub fn new(pipeline: Arc<dyn Pipeline>, metastore: MetaStore) -> Self {
        Self {
            pipeline,
            metastore,
        }
    }

    /// Rewrites every chunk of the object to fresh shards and swaps the
    /// new placements into the stored record.
    pub async fn run(
        &self,
        request: RepairObjectOperationRequest,
        cancel: &CancellationToken,
    ) -> Result<Metadata> {
        let RepairObjectOperationRequest { key } = request;
        if key.is_empty() {
            return Err(TesseraError::NilKey);
        }

        let metadata = self.metastore.get_metadata(&key).await?;
        let repaired = self.pipeline.repair(&metadata.chunks, cancel).await?;
        let repair_epoch = epoch_now();

        let updated = self
            .metastore
            .update_metadata(&key, |mut current| {
                if current.chunks.len() != repaired.len() {
                    return Err(TesseraError::InvalidRequest(
                        "object was rewritten while it was being repaired".to_string(),
                    ));
                }
                current.chunks = repaired.clone();
                current.storage_size = current.chunks_storage_size();
                current.last_write_epoch = repair_epoch;
                Ok(current)
            })
            .await?;

        tracing::info!(
            "object repaired. key={} chunks={}",
            String::from_utf8_lossy(&key),
            updated.chunks.len()
        );
        Ok(updated)
    }
}
