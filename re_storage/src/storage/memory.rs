use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::{BlobStore, RequestContext};
use crate::error::StoreResult;
use crate::util::DigestInfo;

/// Unbounded in-process map. Nothing is ever evicted, so this is only
/// suitable for tests and local development.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<DigestInfo, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<DigestInfo, Bytes>> {
        // A panicking writer cannot leave a half-inserted entry behind.
        self.blobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn has_blob(&self, _ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        Ok(self.read_map().contains_key(digest))
    }

    async fn get_blob(
        &self,
        _ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        Ok(self.read_map().get(digest).cloned())
    }

    async fn put_blob(
        &self,
        _ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        self.blobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(*digest, data);
        Ok(())
    }
}
