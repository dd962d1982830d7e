use super::MetadataCodec;
use prost::Message;
use std::collections::BTreeMap;
use tessera_core::{Chunk, Metadata, Object, Result, TesseraError};

#[derive(Clone, PartialEq, Message)]
struct MetadataMessage {
    #[prost(bytes = "vec", tag = "1")]
    namespace: Vec<u8>,
    #[prost(int64, tag = "2")]
    size: i64,
    #[prost(int64, tag = "3")]
    creation_epoch: i64,
    #[prost(int64, tag = "4")]
    last_write_epoch: i64,
    #[prost(bytes = "vec", tag = "5")]
    key: Vec<u8>,
    #[prost(message, repeated, tag = "6")]
    chunks: Vec<ChunkMessage>,
    #[prost(bytes = "vec", tag = "7")]
    previous_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    next_key: Vec<u8>,
    #[prost(int64, tag = "9")]
    storage_size: i64,
    #[prost(int32, tag = "10")]
    chunk_size: i32,
    #[prost(btree_map = "string, string", tag = "11")]
    user_defined: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Message)]
struct ChunkMessage {
    #[prost(int64, tag = "1")]
    size: i64,
    #[prost(bytes = "vec", tag = "2")]
    hash: Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    objects: Vec<ObjectMessage>,
    #[prost(int64, tag = "4")]
    stored_size: i64,
}

#[derive(Clone, PartialEq, Message)]
struct ObjectMessage {
    #[prost(bytes = "vec", tag = "1")]
    key: Vec<u8>,
    #[prost(string, tag = "2")]
    shard_id: String,
}

/// Default codec: protobuf wire format with the field tags of the
/// `Metadata` schema. Empty linked keys are omitted on the wire.
pub struct ProtobufCodec;

impl MetadataCodec for ProtobufCodec {
    fn tag(&self) -> &'static str {
        "protobuf"
    }

    fn encode(&self, metadata: &Metadata) -> Result<Vec<u8>> {
        Ok(MetadataMessage::from(metadata).encode_to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Metadata> {
        let message = MetadataMessage::decode(data)
            .map_err(|err| TesseraError::Encoding(err.to_string()))?;
        Ok(message.into())
    }
}

impl From<&Metadata> for MetadataMessage {
    fn from(metadata: &Metadata) -> Self {
        Self {
            namespace: metadata.namespace.clone(),
            size: metadata.size,
            creation_epoch: metadata.creation_epoch,
            last_write_epoch: metadata.last_write_epoch,
            key: metadata.key.clone(),
            chunks: metadata
                .chunks
                .iter()
                .map(|chunk| ChunkMessage {
                    size: chunk.size,
                    hash: chunk.hash.clone(),
                    objects: chunk
                        .objects
                        .iter()
                        .map(|object| ObjectMessage {
                            key: object.key.clone(),
                            shard_id: object.shard_id.clone(),
                        })
                        .collect(),
                    stored_size: chunk.stored_size,
                })
                .collect(),
            previous_key: metadata.previous_key().unwrap_or_default().to_vec(),
            next_key: metadata.next_key().unwrap_or_default().to_vec(),
            storage_size: metadata.storage_size,
            chunk_size: metadata.chunk_size,
            user_defined: metadata.user_defined.clone(),
        }
    }
}

impl From<MetadataMessage> for Metadata {
    fn from(message: MetadataMessage) -> Self {
        let non_empty = |key: Vec<u8>| (!key.is_empty()).then_some(key);
        Self {
            namespace: message.namespace,
            key: message.key,
            size: message.size,
            storage_size: message.storage_size,
            creation_epoch: message.creation_epoch,
            last_write_epoch: message.last_write_epoch,
            chunk_size: message.chunk_size,
            chunks: message
                .chunks
                .into_iter()
                .map(|chunk| Chunk {
                    size: chunk.size,
                    stored_size: chunk.stored_size,
                    hash: chunk.hash,
                    objects: chunk
                        .objects
                        .into_iter()
                        .map(|object| Object {
                            key: object.key,
                            shard_id: object.shard_id,
                        })
                        .collect(),
                })
                .collect(),
            previous_key: non_empty(message.previous_key),
            next_key: non_empty(message.next_key),
            user_defined: message.user_defined,
        }
    }
}
