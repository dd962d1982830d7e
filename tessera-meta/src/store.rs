use crate::encoding::{CodecRegistry, DEFAULT_ENCODING, MetadataCodec};
use crate::kv::KvStore;
use std::sync::Arc;
use tessera_core::{
    EncryptionConfig, Metadata, ProcessorConstructor, Result, TesseraError, processor_constructor,
};

/// Metadata client bound to one namespace.
///
/// Records are encoded with the configured codec and, when an encryption
/// key is set, sealed before they reach the key-value store.
#[derive(Clone)]
pub struct MetaStore {
    namespace: Vec<u8>,
    kv: Arc<dyn KvStore>,
    codec: Arc<dyn MetadataCodec>,
    processor: Option<ProcessorConstructor>,
}

impl MetaStore {
    pub fn new(namespace: impl Into<Vec<u8>>, kv: Arc<dyn KvStore>) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(TesseraError::Config(
                "metadata namespace cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            namespace,
            kv,
            codec: CodecRegistry::default().get(DEFAULT_ENCODING)?,
            processor: None,
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn MetadataCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_encryption(mut self, encryption: &EncryptionConfig) -> Result<Self> {
        self.processor = Some(processor_constructor(None, Some(encryption))?);
        Ok(self)
    }

    pub fn namespace(&self) -> &[u8] {
        &self.namespace
    }

    pub fn codec(&self) -> &dyn MetadataCodec {
        self.codec.as_ref()
    }

    fn encode(&self, metadata: &Metadata) -> Result<Vec<u8>> {
        let encoded = self.codec.encode(metadata)?;
        match &self.processor {
            None => Ok(encoded),
            Some(constructor) => {
                let mut processor = constructor()?;
                let output = processor.write_process(&encoded)?;
                Ok(output.into_owned())
            }
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Metadata> {
        match &self.processor {
            None => self.codec.decode(data),
            Some(constructor) => {
                let mut processor = constructor()?;
                let plain = processor.read_process(data)?;
                self.codec.decode(&plain)
            }
        }
    }

    /// Stores `metadata` under its own key, stamping it with this namespace.
    pub async fn set_metadata(&self, mut metadata: Metadata) -> Result<()> {
        if metadata.key.is_empty() {
            return Err(TesseraError::NilKey);
        }
        metadata.namespace = self.namespace.clone();
        let encoded = self.encode(&metadata)?;
        self.kv.set(&self.namespace, &metadata.key, &encoded).await
    }

    pub async fn get_metadata(&self, key: &[u8]) -> Result<Metadata> {
        if key.is_empty() {
            return Err(TesseraError::NilKey);
        }
        let data = self.kv.get(&self.namespace, key).await?;
        self.decode(&data)
    }

    /// Applies `callback` to the stored record with compare-and-set
    /// semantics and returns the record that was committed.
    ///
    /// `callback` runs again with the fresh record whenever a concurrent
    /// writer wins the race.
    pub async fn update_metadata<F>(&self, key: &[u8], mut callback: F) -> Result<Metadata>
    where
        F: FnMut(Metadata) -> Result<Metadata> + Send,
    {
        if key.is_empty() {
            return Err(TesseraError::NilKey);
        }
        let mut committed = None;
        self.kv
            .update(&self.namespace, key, &mut |data| {
                let current = self.decode(data)?;
                let metadata = callback(current.clone())?;
                // unchanged records keep their stored bytes, sealed ones included
                let encoded = if metadata == current {
                    data.to_vec()
                } else {
                    self.encode(&metadata)?
                };
                committed = Some(metadata);
                Ok(encoded)
            })
            .await?;
        committed.ok_or_else(|| TesseraError::internal("METASTOR", "update committed no record"))
    }

    pub async fn delete_metadata(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(TesseraError::NilKey);
        }
        self.kv.delete(&self.namespace, key).await
    }

    pub async fn list_keys<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()> + Send,
    {
        self.kv.list_keys(&self.namespace, &mut callback).await
    }
}
