mod config;
mod single;
mod splitter;

pub use config::{PipelineConfig, new_pipeline};
pub use single::SingleObjectPipeline;
pub use splitter::AsyncSplitterPipeline;

use crate::Result;
use crate::metatypes::Chunk;
use crate::storage::CheckStatus;
use async_trait::async_trait;
use std::borrow::Cow;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub type Reader<'a> = dyn AsyncRead + Unpin + Send + 'a;
pub type Writer<'a> = dyn AsyncWrite + Unpin + Send + 'a;

/// Turns a byte stream into stored chunks and back.
///
/// Every call returns only after all workers it spawned have exited; a
/// cancelled token makes the call fail with `Cancelled`.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn write(&self, reader: &mut Reader<'_>, cancel: &CancellationToken)
    -> Result<Vec<Chunk>>;

    /// Writes the original bytes of `chunks` to `writer`, in chunk order.
    async fn read(
        &self,
        chunks: &[Chunk],
        writer: &mut Writer<'_>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// The worst status of all chunks.
    async fn check(
        &self,
        chunks: &[Chunk],
        fast: bool,
        cancel: &CancellationToken,
    ) -> Result<CheckStatus>;

    /// Returns the chunks with new placements; sizes and hashes are unchanged.
    async fn repair(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<Vec<Chunk>>;

    async fn delete(&self, chunks: &[Chunk], cancel: &CancellationToken) -> Result<()>;

    /// Configured split size, 0 when streams are stored as one chunk.
    fn chunk_size(&self) -> usize;
}

/// Takes ownership of a processor output that must outlive the processor call.
///
/// `None` means the output is the input itself, which the caller can keep.
pub(crate) fn owned_output(output: Cow<'_, [u8]>, input: &[u8], shared: bool) -> Option<Vec<u8>> {
    match output {
        Cow::Owned(data) => Some(data),
        Cow::Borrowed(data) if shared => Some(data.to_vec()),
        Cow::Borrowed(data) if data.as_ptr() == input.as_ptr() && data.len() == input.len() => {
            None
        }
        Cow::Borrowed(data) => Some(data.to_vec()),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::datastor::{Cluster, MemoryShard, Shard};
    use std::sync::Arc;

    pub fn memory_cluster(count: usize) -> (Vec<Arc<MemoryShard>>, Arc<Cluster>) {
        let shards: Vec<Arc<MemoryShard>> = (0..count)
            .map(|i| Arc::new(MemoryShard::new(format!("shard-{}", i))))
            .collect();
        let cluster = Cluster::new(
            shards
                .iter()
                .map(|shard| shard.clone() as Arc<dyn Shard>)
                .collect(),
        )
        .unwrap();
        (shards, Arc::new(cluster))
    }

    pub fn random_bytes(len: usize) -> Vec<u8> {
        use rand::RngCore;
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_output() {
        let input = vec![1u8, 2, 3];
        assert_eq!(owned_output(Cow::Borrowed(&input), &input, false), None);
        assert_eq!(
            owned_output(Cow::Borrowed(&input), &input, true),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            owned_output(Cow::Borrowed(&input[1..]), &input, false),
            Some(vec![2, 3])
        );
        assert_eq!(owned_output(Cow::Owned(vec![9]), &input, false), Some(vec![9]));
    }
}
