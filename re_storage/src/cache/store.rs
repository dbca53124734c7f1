use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use re_proto::build::bazel::remote::execution::v2::ActionResult;

use crate::error::{StoreError, StoreResult};
use crate::storage::{DynBlobStore, RequestContext};
use crate::util::DigestInfo;

#[async_trait]
pub trait ActionCacheStore: Send + Sync {
    async fn get_action_result(
        &self,
        ctx: &RequestContext,
        action_digest: &DigestInfo,
    ) -> StoreResult<Option<ActionResult>>;

    async fn put_action_result(
        &self,
        ctx: &RequestContext,
        action_digest: &DigestInfo,
        result: &ActionResult,
    ) -> StoreResult<()>;
}

pub type DynActionCacheStore = Arc<dyn ActionCacheStore>;

/// Keeps encoded `ActionResult`s in a blob store tree, keyed by the digest
/// of the Action they were produced by.
pub struct BlobActionCacheStore {
    blobs: DynBlobStore,
}

impl BlobActionCacheStore {
    pub fn new(blobs: DynBlobStore) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl ActionCacheStore for BlobActionCacheStore {
    async fn get_action_result(
        &self,
        ctx: &RequestContext,
        action_digest: &DigestInfo,
    ) -> StoreResult<Option<ActionResult>> {
        let Some(data) = self.blobs.get_blob(ctx, action_digest).await? else {
            return Ok(None);
        };

        let result = ActionResult::decode(data).map_err(|e| StoreError::Corrupt {
            digest: *action_digest,
            reason: format!("undecodable ActionResult: {e}"),
        })?;
        Ok(Some(result))
    }

    async fn put_action_result(
        &self,
        ctx: &RequestContext,
        action_digest: &DigestInfo,
        result: &ActionResult,
    ) -> StoreResult<()> {
        let data = Bytes::from(result.encode_to_vec());
        self.blobs.put_blob(ctx, action_digest, data).await
    }
}
