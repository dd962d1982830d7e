pub mod datastor;
pub mod distribution;
pub mod error;
pub mod hashing;
pub mod metatypes;
pub mod pipeline;
pub mod processing;
pub mod storage;
pub mod task;

pub use datastor::{
    Cluster, LazyShardIterator, MemoryShard, ObjectStatus, Shard, ShardConnector, ShardIterator,
    TlsConfig, ZeroDbShard,
};
pub use distribution::{
    Distributor, DistributionConfig, ReedSolomonDistributor, ReplicationDistributor,
};
pub use error::{Result, TesseraError};
pub use hashing::{HashType, Hasher, HasherConstructor, HashingConfig, new_hasher};
pub use metatypes::{Chunk, Metadata, Object};
pub use pipeline::{
    AsyncSplitterPipeline, Pipeline, PipelineConfig, Reader, SingleObjectPipeline, Writer,
    new_pipeline,
};
pub use processing::{
    ChainProcessor, CompressionConfig, CompressionMode, CompressionType, EncryptionConfig,
    EncryptionType, NopProcessor, Processor, ProcessorConstructor, processor_constructor,
};
pub use storage::{
    CheckStatus, ChunkConfig, ChunkStorage, DistributedChunkStorage, RandomChunkStorage,
};
pub use task::{SharedReceiver, WorkerGroup};
