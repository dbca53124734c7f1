pub mod builder;
pub mod dark_launch;
pub mod filesystem;
pub mod kv_backend;
pub mod memory;
pub mod metered;
pub mod networked_kv;
pub mod noop;
pub mod read_cache;
pub mod sharded;
pub mod size_split;
pub mod traits;

pub use builder::{create_storage_stacks, StorageBuilder, StorageStacks};
pub use dark_launch::DarkLaunchStore;
pub use filesystem::FileSystemBlobStore;
pub use kv_backend::{DynKvEndpoint, KvBackend, KvEndpoint, RedisEndpoint};
pub use memory::MemoryBlobStore;
pub use metered::MeteredStore;
pub use networked_kv::NetworkedKvStore;
pub use noop::NoopStore;
pub use read_cache::ReadCacheStore;
pub use sharded::{Shard, ShardedStore};
pub use size_split::SizeSplitStore;
pub use traits::{BlobStore, DynBlobStore, RequestContext};
