use async_trait::async_trait;
use bytes::Bytes;

use super::traits::{BlobStore, RequestContext};
use crate::error::StoreResult;
use crate::util::DigestInfo;

/// Accepts and discards every write; every read misses.
#[derive(Debug, Default)]
pub struct NoopStore;

#[async_trait]
impl BlobStore for NoopStore {
    async fn has_blob(&self, _ctx: &RequestContext, _digest: &DigestInfo) -> StoreResult<bool> {
        Ok(false)
    }

    async fn get_blob(
        &self,
        _ctx: &RequestContext,
        _digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        Ok(None)
    }

    async fn put_blob(
        &self,
        _ctx: &RequestContext,
        _digest: &DigestInfo,
        _data: Bytes,
    ) -> StoreResult<()> {
        Ok(())
    }

    async fn find_missing_blobs(
        &self,
        _ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Vec<DigestInfo>> {
        Ok(digests.to_vec())
    }
}
