mod cluster;
mod memory;
mod zerodb;

pub use cluster::{Cluster, LazyShardIterator, ShardIterator};
pub use memory::MemoryShard;
pub use zerodb::{TlsConfig, ZeroDbShard};

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    Ok,
    Missing,
    Corrupted,
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectStatus::Ok => f.write_str("ok"),
            ObjectStatus::Missing => f.write_str("missing"),
            ObjectStatus::Corrupted => f.write_str("corrupted"),
        }
    }
}

/// One remote data server holding distributor parts.
///
/// Shards are shared by every worker of a pipeline and must be safe for
/// concurrent use. Retrying is left to the caller.
#[async_trait]
pub trait Shard: Send + Sync {
    fn identifier(&self) -> &str;

    async fn put(&self, key: &[u8], data: &[u8]) -> Result<()>;

    /// Fails with `NotFound` when the key is absent.
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    async fn status(&self, key: &[u8]) -> Result<ObjectStatus>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &[u8]) -> Result<()>;

    async fn list_keys(&self) -> Result<Vec<Vec<u8>>>;
}

/// Dials shards that are referenced by metadata but not part of the cluster listing.
#[async_trait]
pub trait ShardConnector: Send + Sync {
    async fn connect(&self, id: &str) -> Result<Arc<dyn Shard>>;
}
