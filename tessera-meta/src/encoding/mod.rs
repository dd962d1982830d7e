mod json;
mod proto;

pub use json::JsonCodec;
pub use proto::ProtobufCodec;

use std::collections::HashMap;
use std::sync::Arc;
use tessera_core::{Metadata, Result, TesseraError};

pub const DEFAULT_ENCODING: &str = "protobuf";

/// Serialises metadata records; a record must be decoded with the codec
/// that encoded it.
pub trait MetadataCodec: Send + Sync {
    fn tag(&self) -> &'static str;

    fn encode(&self, metadata: &Metadata) -> Result<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> Result<Metadata>;
}

/// Codecs addressable by their tag.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn MetadataCodec>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };
        registry.register(Arc::new(ProtobufCodec));
        registry.register(Arc::new(JsonCodec));
        registry
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `codec` under its tag, replacing any codec with the same tag.
    pub fn register(&mut self, codec: Arc<dyn MetadataCodec>) {
        self.codecs.insert(codec.tag().to_string(), codec);
    }

    /// An empty tag selects the default encoding.
    pub fn get(&self, tag: &str) -> Result<Arc<dyn MetadataCodec>> {
        let tag = tag.trim().to_ascii_lowercase();
        let tag = if tag.is_empty() {
            DEFAULT_ENCODING.to_string()
        } else {
            tag
        };
        self.codecs
            .get(&tag)
            .cloned()
            .ok_or_else(|| TesseraError::Config(format!("unsupported metadata encoding: {}", tag)))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::BTreeMap;
    use tessera_core::{Chunk, Metadata, Object};

    pub fn sample_metadata() -> Metadata {
        Metadata {
            namespace: b"tenant".to_vec(),
            key: b"photos/cat.jpg".to_vec(),
            size: 300,
            storage_size: 412,
            creation_epoch: 1_700_000_000_000_000_000,
            last_write_epoch: 1_700_000_000_500_000_000,
            chunk_size: 200,
            chunks: vec![
                Chunk {
                    size: 200,
                    stored_size: 256,
                    hash: vec![1, 2, 3],
                    objects: vec![
                        Object {
                            key: b"aa.01".to_vec(),
                            shard_id: "shard-0".to_string(),
                        },
                        Object {
                            key: b"aa.02".to_vec(),
                            shard_id: "shard-1".to_string(),
                        },
                    ],
                },
                Chunk {
                    size: 100,
                    stored_size: 156,
                    hash: vec![4, 5, 6],
                    objects: vec![Object {
                        key: b"bb.01".to_vec(),
                        shard_id: "shard-2".to_string(),
                    }],
                },
            ],
            previous_key: Some(b"photos/dog.jpg".to_vec()),
            next_key: None,
            user_defined: BTreeMap::from([("content-type".to_string(), "image/jpeg".to_string())]),
        }
    }
}
