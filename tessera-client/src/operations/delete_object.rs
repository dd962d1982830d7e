use std::sync::Arc;
use tessera_core::{Pipeline, Result, TesseraError};
use tessera_meta::MetaStore;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct DeleteObjectOperation {
    pipeline: Arc<dyn Pipeline>,
    metastore: MetaStore,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteObjectOperationRequest {
    pub key: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteObjectOperationOutcome {
    Deleted,
    NotFound,
}

impl DeleteObjectOperation {
    pub fn new(pipeline: Arc<dyn Pipeline>, metastore: MetaStore) -> Self {
        Self {
            pipeline,
            metastore,
        }
    }

    /// Deletes the data first, then the record. A missing record is reported
    /// as `NotFound` rather than an error.
    pub async fn run(
        &self,
        request: DeleteObjectOperationRequest,
        cancel: &CancellationToken,
    ) -> Result<DeleteObjectOperationOutcome> {
        let DeleteObjectOperationRequest { key } = request;
        if key.is_empty() {
            return Err(TesseraError::NilKey);
        }

        let metadata = match self.metastore.get_metadata(&key).await {
            Ok(metadata) => metadata,
            Err(TesseraError::NotFound) => return Ok(DeleteObjectOperationOutcome::NotFound),
            Err(err) => return Err(err),
        };

        self.pipeline.delete(&metadata.chunks, cancel).await?;
        self.metastore.delete_metadata(&key).await?;

        tracing::debug!(
            "object deleted. key={} chunks={}",
            String::from_utf8_lossy(&key),
            metadata.chunks.len()
        );
        Ok(DeleteObjectOperationOutcome::Deleted)
    }
}
