use async_trait::async_trait;
use bytes::Bytes;

use super::traits::{BlobStore, DynBlobStore, RequestContext};
use crate::error::StoreResult;
use crate::util::DigestInfo;

/// Fronts a slow, authoritative store with a fast one.
///
/// The fast tier is best-effort: its failures are logged and treated as a
/// miss on reads and ignored on writes. Population after a slow hit is
/// awaited, so a following read of the same digest is served by `fast`.
pub struct ReadCacheStore {
    fast: DynBlobStore,
    slow: DynBlobStore,
}

impl ReadCacheStore {
    pub fn new(fast: DynBlobStore, slow: DynBlobStore) -> Self {
        Self { fast, slow }
    }

    async fn populate_fast(&self, ctx: &RequestContext, digest: &DigestInfo, data: Bytes) {
        if let Err(e) = self.fast.put_blob(ctx, digest, data).await {
            tracing::warn!(digest = %digest, "failed to populate fast tier: {e}");
        }
    }
}

#[async_trait]
impl BlobStore for ReadCacheStore {
    async fn has_blob(&self, ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        match self.fast.has_blob(ctx, digest).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => tracing::warn!(digest = %digest, "fast tier exists check failed: {e}"),
        }
        self.slow.has_blob(ctx, digest).await
    }

    async fn get_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        match self.fast.get_blob(ctx, digest).await {
            Ok(Some(data)) => {
                tracing::debug!(digest = %digest, "fast tier hit");
                return Ok(Some(data));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(digest = %digest, "fast tier read failed: {e}"),
        }

        let data = self.slow.get_blob(ctx, digest).await?;
        if let Some(data) = &data {
            tracing::debug!(digest = %digest, "slow tier hit, populating fast tier");
            self.populate_fast(ctx, digest, data.clone()).await;
        }
        Ok(data)
    }

    async fn put_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        self.slow.put_blob(ctx, digest, data.clone()).await?;
        self.populate_fast(ctx, digest, data).await;
        Ok(())
    }

    async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Vec<DigestInfo>> {
        let not_in_fast = match self.fast.find_missing_blobs(ctx, digests).await {
            Ok(missing) => missing,
            Err(e) => {
                tracing::warn!("fast tier find_missing failed: {e}");
                digests.to_vec()
            }
        };
        if not_in_fast.is_empty() {
            return Ok(not_in_fast);
        }
        self.slow.find_missing_blobs(ctx, &not_in_fast).await
    }
}
