use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata record binding a logical key to its distributed chunks.
///
/// `size` is the length of the original stream, `storage_size` the total number
/// of bytes handed to the shards after processing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub namespace: Vec<u8>,
    pub key: Vec<u8>,
    pub size: i64,
    pub storage_size: i64,
    pub creation_epoch: i64,
    pub last_write_epoch: i64,
    pub chunk_size: i32,
    pub chunks: Vec<Chunk>,
    pub previous_key: Option<Vec<u8>>,
    pub next_key: Option<Vec<u8>>,
    pub user_defined: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Sum of the original chunk sizes.
    pub fn chunks_size(&self) -> i64 {
        self.chunks.iter().map(|chunk| chunk.size).sum()
    }

    pub fn chunks_storage_size(&self) -> i64 {
        self.chunks.iter().map(|chunk| chunk.stored_size).sum()
    }

    pub fn previous_key(&self) -> Option<&[u8]> {
        self.previous_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn next_key(&self) -> Option<&[u8]> {
        self.next_key.as_deref().filter(|key| !key.is_empty())
    }
}

/// One splitter unit: `size` and `hash` describe the original bytes,
/// `stored_size` the processed bytes the distributor encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Chunk {
    pub size: i64,
    pub stored_size: i64,
    pub hash: Vec<u8>,
    pub objects: Vec<Object>,
}

/// Location of one distributor part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Object {
    pub key: Vec<u8>,
    pub shard_id: String,
}
