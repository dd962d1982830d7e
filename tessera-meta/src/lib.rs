pub mod encoding;
pub mod kv;
pub mod store;

pub use encoding::{CodecRegistry, JsonCodec, MetadataCodec, ProtobufCodec};
pub use kv::{
    EmbeddedKv, EtcdKv, KvBuilder, KvStore, ListFn, MemoryKv, UpdateFn,
};
pub use store::MetaStore;
