use bytes::Bytes;

use crate::error::{StoreError, StoreResult};
use crate::storage::{DynBlobStore, RequestContext};
use crate::util::{compute_digest, verify_digest, DigestInfo};

/// CAS entry point for the protocol layer.
///
/// Every write is verified against its digest here, before it reaches any
/// store in the tree.
pub struct CasManager {
    blob_store: DynBlobStore,
}

impl CasManager {
    pub fn new(blob_store: DynBlobStore) -> Self {
        Self { blob_store }
    }

    pub async fn has_blob(&self, ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        self.blob_store.has_blob(ctx, digest).await
    }

    /// Returns the blob, or `None` if no store in the tree holds it. Bytes
    /// that no longer match their digest are reported as corrupt.
    pub async fn get_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        let Some(data) = self.blob_store.get_blob(ctx, digest).await? else {
            return Ok(None);
        };
        verify_digest(&data, digest).map_err(|e| StoreError::Corrupt {
            digest: *digest,
            reason: e.to_string(),
        })?;
        Ok(Some(data))
    }

    pub async fn put_blob(&self, ctx: &RequestContext, data: Bytes) -> StoreResult<DigestInfo> {
        let digest = compute_digest(&data);
        self.blob_store.put_blob(ctx, &digest, data).await?;
        Ok(digest)
    }

    pub async fn put_blob_with_digest(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        verify_digest(&data, digest)?;
        self.blob_store.put_blob(ctx, digest, data).await
    }

    pub async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Vec<DigestInfo>> {
        self.blob_store.find_missing_blobs(ctx, digests).await
    }

    pub fn blob_store(&self) -> &DynBlobStore {
        &self.blob_store
    }
}
