use async_trait::async_trait;
use bytes::Bytes;
use futures::try_join;

use super::traits::{BlobStore, DynBlobStore, RequestContext};
use crate::error::StoreResult;
use crate::util::DigestInfo;

/// Routes by blob size: `size <= threshold` goes to `smaller`, everything
/// else to `larger`. The size is part of the digest, so a digest always
/// routes to the same child.
pub struct SizeSplitStore {
    threshold: u64,
    smaller: DynBlobStore,
    larger: DynBlobStore,
}

impl SizeSplitStore {
    pub fn new(threshold: u64, smaller: DynBlobStore, larger: DynBlobStore) -> Self {
        Self {
            threshold,
            smaller,
            larger,
        }
    }

    fn route(&self, digest: &DigestInfo) -> &DynBlobStore {
        if digest.size_bytes <= self.threshold {
            &self.smaller
        } else {
            &self.larger
        }
    }
}

#[async_trait]
impl BlobStore for SizeSplitStore {
    async fn has_blob(&self, ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        self.route(digest).has_blob(ctx, digest).await
    }

    async fn get_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        self.route(digest).get_blob(ctx, digest).await
    }

    async fn put_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        self.route(digest).put_blob(ctx, digest, data).await
    }

    async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Vec<DigestInfo>> {
        let (small, large): (Vec<DigestInfo>, Vec<DigestInfo>) = digests
            .iter()
            .copied()
            .partition(|digest| digest.size_bytes <= self.threshold);

        let (mut missing, missing_large) = try_join!(
            self.smaller.find_missing_blobs(ctx, &small),
            self.larger.find_missing_blobs(ctx, &large),
        )?;
        missing.extend(missing_large);
        Ok(missing)
    }
}
