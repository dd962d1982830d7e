use std::sync::Arc;
use tessera_core::{CheckStatus, Pipeline, Result, TesseraError};
use tessera_meta::MetaStore;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct CheckObjectOperation {
    pipeline: Arc<dyn Pipeline>,
    metastore: MetaStore,
}

#[derive(Debug, Clone, Default)]
pub struct CheckObjectOperationRequest {
    pub key: Vec<u8>,
    /// Only require enough parts to read each chunk instead of all of them.
    pub fast: bool,
}

impl CheckObjectOperation {
    pub fn new(pipeline: Arc<dyn Pipeline>, metastore: MetaStore) -> Self {
        Self {
            pipeline,
            metastore,
        }
    }

    pub async fn run(
        &self,
        request: CheckObjectOperationRequest,
        cancel: &CancellationToken,
    ) -> Result<CheckStatus> {
        let CheckObjectOperationRequest { key, fast } = request;
        if key.is_empty() {
            return Err(TesseraError::NilKey);
        }

        let metadata = self.metastore.get_metadata(&key).await?;
        let status = self.pipeline.check(&metadata.chunks, fast, cancel).await?;
        tracing::debug!(
            "object checked. key={} fast={} status={}",
            String::from_utf8_lossy(&key),
            fast,
            status
        );
        Ok(status)
    }
}
