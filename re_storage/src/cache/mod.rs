pub mod completeness;
pub mod manager;
pub mod store;

pub use completeness::CompletenessCheckingActionCache;
pub use manager::ActionCacheManager;
pub use store::{ActionCacheStore, BlobActionCacheStore, DynActionCacheStore};
