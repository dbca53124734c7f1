use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::{BlobStore, DynBlobStore, RequestContext};
use crate::error::StoreResult;
use crate::metering::UsageMeter;
use crate::util::DigestInfo;

/// Records bytes and requests of completed reads and writes for the
/// request's customer. Misses, existence checks and failures are not billed.
pub struct MeteredStore {
    inner: DynBlobStore,
    meter: Arc<UsageMeter>,
}

impl MeteredStore {
    pub fn new(inner: DynBlobStore, meter: Arc<UsageMeter>) -> Self {
        Self { inner, meter }
    }
}

#[async_trait]
impl BlobStore for MeteredStore {
    async fn has_blob(&self, ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        self.inner.has_blob(ctx, digest).await
    }

    async fn get_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        let data = self.inner.get_blob(ctx, digest).await?;
        if let Some(data) = &data {
            self.meter.record(ctx, data.len() as u64);
        }
        Ok(data)
    }

    async fn put_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        let size = data.len() as u64;
        self.inner.put_blob(ctx, digest, data).await?;
        self.meter.record(ctx, size);
        Ok(())
    }

    async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Vec<DigestInfo>> {
        self.inner.find_missing_blobs(ctx, digests).await
    }
}
