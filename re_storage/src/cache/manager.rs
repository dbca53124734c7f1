use re_proto::build::bazel::remote::execution::v2::ActionResult;

use super::store::DynActionCacheStore;
use crate::error::StoreResult;
use crate::storage::RequestContext;
use crate::util::DigestInfo;

/// Action Cache entry point for the protocol layer.
pub struct ActionCacheManager {
    cache_store: DynActionCacheStore,
}

impl ActionCacheManager {
    pub fn new(cache_store: DynActionCacheStore) -> Self {
        Self { cache_store }
    }

    pub async fn get_action_result(
        &self,
        ctx: &RequestContext,
        action_digest: &DigestInfo,
    ) -> StoreResult<Option<ActionResult>> {
        let result = self.cache_store.get_action_result(ctx, action_digest).await?;
        tracing::debug!(
            action = %action_digest,
            hit = result.is_some(),
            "GetActionResult"
        );
        Ok(result)
    }

    pub async fn put_action_result(
        &self,
        ctx: &RequestContext,
        action_digest: &DigestInfo,
        result: &ActionResult,
    ) -> StoreResult<()> {
        tracing::debug!(action = %action_digest, "UpdateActionResult");
        self.cache_store
            .put_action_result(ctx, action_digest, result)
            .await
    }

    pub fn cache_store(&self) -> &DynActionCacheStore {
        &self.cache_store
    }
}
