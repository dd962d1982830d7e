mod distributed;
mod random;

pub use distributed::DistributedChunkStorage;
pub use random::RandomChunkStorage;

use crate::Result;
use crate::metatypes::{Chunk, Object};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

/// Placement of one processed chunk: its byte length and where its parts live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkConfig {
    pub size: usize,
    pub objects: Vec<Object>,
}

impl From<&Chunk> for ChunkConfig {
    fn from(chunk: &Chunk) -> Self {
        Self {
            size: chunk.stored_size.max(0) as usize,
            objects: chunk.objects.clone(),
        }
    }
}

/// Ordered from worst to best, so the status of a set of chunks is its minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckStatus {
    Invalid,
    Valid,
    Optimal,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Invalid => f.write_str("invalid"),
            CheckStatus::Valid => f.write_str("valid"),
            CheckStatus::Optimal => f.write_str("optimal"),
        }
    }
}

/// Stores one processed chunk on the cluster.
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    async fn write_chunk(&self, data: &[u8], cancel: &CancellationToken) -> Result<ChunkConfig>;

    async fn read_chunk(&self, config: &ChunkConfig, cancel: &CancellationToken)
    -> Result<Vec<u8>>;

    async fn check_chunk(
        &self,
        config: &ChunkConfig,
        fast: bool,
        cancel: &CancellationToken,
    ) -> Result<CheckStatus>;

    /// Rewrites the chunk, returning its new placement.
    async fn repair_chunk(
        &self,
        config: &ChunkConfig,
        cancel: &CancellationToken,
    ) -> Result<ChunkConfig>;

    async fn delete_chunk(&self, config: &ChunkConfig, cancel: &CancellationToken) -> Result<()>;
}

/// Hex SHA-256 of a stored part, used as the content prefix of its key.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Part keys are content addressed with a unique suffix, so equal parts of
/// different records never share a key.
pub(crate) fn new_part_key(data: &[u8]) -> Vec<u8> {
    format!("{}.{}", compute_hash(data), Ulid::new()).into_bytes()
}
