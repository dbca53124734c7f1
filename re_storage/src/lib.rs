//! Composable blob storage engine behind a CAS and an Action Cache.
//!
//! Every store implements [`storage::BlobStore`]. Leaf stores (local disk,
//! memory, networked key/value) hold bytes; combinators route, replicate,
//! cache or meter requests across their children. [`storage::StorageBuilder`]
//! turns a [`config::StorageEngineConfig`] into one tree for the CAS and one
//! for the Action Cache.

pub mod cache;
pub mod cas;
pub mod config;
pub mod error;
pub mod metering;
pub mod storage;
pub mod util;

pub use config::StorageEngineConfig;
pub use error::{ConfigError, StoreError};
pub use util::DigestInfo;
