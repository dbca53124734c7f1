use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;

use crate::error::StoreResult;
use crate::util::DigestInfo;

/// Per-request metadata that travels through every store in a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub instance_name: String,
}

impl RequestContext {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
        }
    }

    /// Customer that usage on this request is billed to.
    pub fn customer_id(&self) -> &str {
        if self.instance_name.is_empty() {
            "default"
        } else {
            &self.instance_name
        }
    }
}

/// Uniform contract over leaf and combinator stores.
///
/// A missing blob is `Ok(None)` from `get_blob`, never an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn has_blob(&self, ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool>;

    async fn get_blob(&self, ctx: &RequestContext, digest: &DigestInfo)
        -> StoreResult<Option<Bytes>>;

    async fn put_blob(&self, ctx: &RequestContext, digest: &DigestInfo, data: Bytes)
        -> StoreResult<()>;

    async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Vec<DigestInfo>> {
        let present = try_join_all(digests.iter().map(|d| self.has_blob(ctx, d))).await?;

        Ok(digests
            .iter()
            .zip(present)
            .filter(|(_, present)| !present)
            .map(|(digest, _)| *digest)
            .collect())
    }
}

pub type DynBlobStore = Arc<dyn BlobStore>;
