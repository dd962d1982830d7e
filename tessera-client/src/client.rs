use crate::config::Config;
use crate::operations::{
    CheckObjectOperation, CheckObjectOperationRequest, DeleteObjectOperation,
    DeleteObjectOperationRequest, LinkObjectOperation, LinkObjectOperationRequest,
    LinkObjectOperationResult, ReadByteRange, ReadObjectOperation, ReadObjectOperationRequest,
    RepairObjectOperation, RepairObjectOperationRequest, WriteObjectOperation,
    WriteObjectOperationRequest,
};
use crate::traverse::TraverseIterator;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{
    CheckStatus, Cluster, Metadata, Pipeline, Reader, Result, Shard, ShardConnector, TlsConfig,
    Writer, ZeroDbShard, new_pipeline,
};
use tessera_meta::{CodecRegistry, MetaStore};
use tokio_util::sync::CancellationToken;

/// Stream-level access to the store: data goes through the pipeline,
/// records through the metadata store.
#[derive(Clone)]
pub struct Client {
    pipeline: Arc<dyn Pipeline>,
    metastore: MetaStore,
}

impl Client {
    pub fn new(pipeline: Arc<dyn Pipeline>, metastore: MetaStore) -> Self {
        Self {
            pipeline,
            metastore,
        }
    }

    /// Dials every configured shard and the metadata backend.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let connector = Arc::new(ZeroDbConnector {
            namespace: config.shard_namespace().to_string(),
            password: config.password.clone(),
            tls: config.datastor.tls.clone(),
        });
        let mut shards = Vec::with_capacity(config.datastor.shards.len());
        for address in &config.datastor.shards {
            if address.trim().is_empty() {
                continue;
            }
            shards.push(connector.connect(address).await?);
        }
        let cluster = Cluster::new(shards)?.with_connector(connector);
        let pipeline = new_pipeline(&config.pipeline, Arc::new(cluster))?;

        let kv = config.kv_builder().build().await?;
        let codec = CodecRegistry::default().get(&config.metastor.encoding)?;
        let mut metastore = MetaStore::new(config.namespace.as_bytes(), kv)?.with_codec(codec);
        if let Some(encryption) = &config.metastor.encryption {
            metastore = metastore.with_encryption(encryption)?;
        }

        tracing::info!(
            "client ready. namespace={} shards={} metastor={}",
            config.namespace,
            config.datastor.shards.len(),
            config.metastor.db.db_type.as_str()
        );
        Ok(Self::new(pipeline, metastore))
    }

    pub fn metastore(&self) -> &MetaStore {
        &self.metastore
    }

    pub fn pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.pipeline
    }

    fn write_operation(&self) -> WriteObjectOperation {
        WriteObjectOperation::new(self.pipeline.clone(), self.metastore.clone())
    }

    fn read_operation(&self) -> ReadObjectOperation {
        ReadObjectOperation::new(self.pipeline.clone(), self.metastore.clone())
    }

    pub async fn write(&self, key: &[u8], reader: &mut Reader<'_>) -> Result<Metadata> {
        self.write_with_cancel(key, reader, &CancellationToken::new())
            .await
    }

    pub async fn write_with_cancel(
        &self,
        key: &[u8],
        reader: &mut Reader<'_>,
        cancel: &CancellationToken,
    ) -> Result<Metadata> {
        let request = WriteObjectOperationRequest {
            key: key.to_vec(),
            ..Default::default()
        };
        self.write_operation().run(request, reader, cancel).await
    }

    pub async fn write_with_user_meta(
        &self,
        key: &[u8],
        reader: &mut Reader<'_>,
        user_defined: BTreeMap<String, String>,
    ) -> Result<Metadata> {
        let request = WriteObjectOperationRequest {
            key: key.to_vec(),
            previous_key: None,
            user_defined,
        };
        self.write_operation()
            .run(request, reader, &CancellationToken::new())
            .await
    }

    /// Writes `key` as the successor of the existing record `previous_key`.
    pub async fn write_linked(
        &self,
        key: &[u8],
        previous_key: &[u8],
        reader: &mut Reader<'_>,
    ) -> Result<LinkObjectOperationResult> {
        let request = LinkObjectOperationRequest {
            key: key.to_vec(),
            previous_key: previous_key.to_vec(),
            ..Default::default()
        };
        LinkObjectOperation::new(self.write_operation(), self.metastore.clone())
            .run(request, reader, &CancellationToken::new())
            .await
    }

    pub async fn read(&self, key: &[u8], writer: &mut Writer<'_>) -> Result<Metadata> {
        self.read_with_cancel(key, writer, &CancellationToken::new())
            .await
    }

    pub async fn read_with_cancel(
        &self,
        key: &[u8],
        writer: &mut Writer<'_>,
        cancel: &CancellationToken,
    ) -> Result<Metadata> {
        let request = ReadObjectOperationRequest {
            key: key.to_vec(),
            range: None,
        };
        self.read_operation().run(request, writer, cancel).await
    }

    /// Writes `length` bytes starting at `offset` of the object to `writer`.
    pub async fn read_range(
        &self,
        key: &[u8],
        writer: &mut Writer<'_>,
        offset: u64,
        length: u64,
    ) -> Result<Metadata> {
        let request = ReadObjectOperationRequest {
            key: key.to_vec(),
            range: Some(ReadByteRange { offset, length }),
        };
        self.read_operation()
            .run(request, writer, &CancellationToken::new())
            .await
    }

    pub async fn check(&self, key: &[u8], fast: bool) -> Result<CheckStatus> {
        let request = CheckObjectOperationRequest {
            key: key.to_vec(),
            fast,
        };
        CheckObjectOperation::new(self.pipeline.clone(), self.metastore.clone())
            .run(request, &CancellationToken::new())
            .await
    }

    pub async fn repair(&self, key: &[u8]) -> Result<Metadata> {
        let request = RepairObjectOperationRequest { key: key.to_vec() };
        RepairObjectOperation::new(self.pipeline.clone(), self.metastore.clone())
            .run(request, &CancellationToken::new())
            .await
    }

    /// Deletes the object's data and record; deleting a missing key succeeds.
    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        let request = DeleteObjectOperationRequest { key: key.to_vec() };
        DeleteObjectOperation::new(self.pipeline.clone(), self.metastore.clone())
            .run(request, &CancellationToken::new())
            .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, key: &[u8]) -> Result<Metadata> {
        self.metastore.get_metadata(key).await
    }

    /// Removes the record only; its data stays on the shards.
    pub async fn delete_metadata(&self, key: &[u8]) -> Result<()> {
        self.metastore.delete_metadata(key).await
    }

    pub async fn list_keys<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()> + Send,
    {
        self.metastore.list_keys(callback).await
    }

    /// Follows `next_key` links from `start_key`. Epochs of 0 or less are unbounded.
    pub fn traverse(
        &self,
        start_key: &[u8],
        from_epoch: i64,
        to_epoch: i64,
    ) -> Result<TraverseIterator> {
        TraverseIterator::forward(
            start_key,
            from_epoch,
            to_epoch,
            self.metastore.clone(),
            self.pipeline.clone(),
        )
    }

    /// Follows `previous_key` links from `start_key`, so `from_epoch` is
    /// expected to be the later bound.
    pub fn traverse_post_order(
        &self,
        start_key: &[u8],
        from_epoch: i64,
        to_epoch: i64,
    ) -> Result<TraverseIterator> {
        TraverseIterator::backward(
            start_key,
            from_epoch,
            to_epoch,
            self.metastore.clone(),
            self.pipeline.clone(),
        )
    }
}

/// Dials 0-db shards by address with the client's namespace credentials.
struct ZeroDbConnector {
    namespace: String,
    password: Option<String>,
    tls: Option<TlsConfig>,
}

#[async_trait]
impl ShardConnector for ZeroDbConnector {
    async fn connect(&self, id: &str) -> Result<Arc<dyn Shard>> {
        let shard = ZeroDbShard::connect(
            id,
            Some(&self.namespace),
            self.password.as_deref(),
            self.tls.as_ref(),
        )
        .await?;
        Ok(Arc::new(shard))
    }
}
