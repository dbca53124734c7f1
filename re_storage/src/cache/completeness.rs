use async_trait::async_trait;
use prost::Message;
use rand::Rng;
use re_proto::build::bazel::remote::execution::v2::{ActionResult, Digest, Tree};

use super::store::{ActionCacheStore, DynActionCacheStore};
use crate::error::{StoreError, StoreResult};
use crate::storage::{DynBlobStore, RequestContext};
use crate::util::DigestInfo;

/// Downgrades Action Cache hits to misses when the CAS no longer holds
/// every blob the cached result references.
///
/// Checked digests are the output files, stdout and stderr, each output
/// directory's `Tree` blob and the files listed in that tree. Only a
/// `probability` per-mille share of hits is checked; a check that cannot
/// reach the CAS counts as a failed check.
pub struct CompletenessCheckingActionCache {
    inner: DynActionCacheStore,
    cas: DynBlobStore,
    probability: u32,
}

impl CompletenessCheckingActionCache {
    pub fn new(inner: DynActionCacheStore, cas: DynBlobStore, probability: u32) -> Self {
        Self {
            inner,
            cas,
            probability: probability.min(1000),
        }
    }

    fn should_check(&self) -> bool {
        match self.probability {
            0 => false,
            1000 => true,
            p => rand::thread_rng().gen_range(0..1000) < p,
        }
    }

    async fn find_first_missing(
        &self,
        ctx: &RequestContext,
        result: &ActionResult,
    ) -> StoreResult<Option<DigestInfo>> {
        let direct = result
            .output_files
            .iter()
            .filter_map(|file| file.digest.as_ref())
            .chain(result.stdout_digest.as_ref())
            .chain(result.stderr_digest.as_ref());
        let trees = result
            .output_directories
            .iter()
            .filter_map(|dir| dir.tree_digest.as_ref());

        let mut referenced = convert_all(direct.chain(trees.clone()))?;
        if let Some(missing) = self.first_missing_in_cas(ctx, &referenced).await? {
            return Ok(Some(missing));
        }

        referenced.clear();
        for tree_digest in convert_all(trees)? {
            let Some(data) = self.cas.get_blob(ctx, &tree_digest).await? else {
                return Ok(Some(tree_digest));
            };
            let tree = Tree::decode(data).map_err(|e| StoreError::Corrupt {
                digest: tree_digest,
                reason: format!("undecodable Tree: {e}"),
            })?;
            let files = tree
                .root
                .iter()
                .chain(tree.children.iter())
                .flat_map(|dir| dir.files.iter())
                .filter_map(|file| file.digest.as_ref());
            referenced.extend(convert_all(files)?);
        }

        self.first_missing_in_cas(ctx, &referenced).await
    }

    async fn first_missing_in_cas(
        &self,
        ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Option<DigestInfo>> {
        if digests.is_empty() {
            return Ok(None);
        }
        let missing = self.cas.find_missing_blobs(ctx, digests).await?;
        Ok(missing.first().copied())
    }
}

/// Converts digests, skipping empty blobs which are always available.
fn convert_all<'a>(digests: impl Iterator<Item = &'a Digest>) -> StoreResult<Vec<DigestInfo>> {
    let mut converted = Vec::new();
    for digest in digests {
        let digest = DigestInfo::from_proto(digest)?;
        if digest.size_bytes > 0 {
            converted.push(digest);
        }
    }
    converted.sort_unstable();
    converted.dedup();
    Ok(converted)
}

#[async_trait]
impl ActionCacheStore for CompletenessCheckingActionCache {
    async fn get_action_result(
        &self,
        ctx: &RequestContext,
        action_digest: &DigestInfo,
    ) -> StoreResult<Option<ActionResult>> {
        let Some(result) = self.inner.get_action_result(ctx, action_digest).await? else {
            return Ok(None);
        };
        if !self.should_check() {
            return Ok(Some(result));
        }

        match self.find_first_missing(ctx, &result).await {
            Ok(None) => Ok(Some(result)),
            Ok(Some(missing)) => {
                tracing::debug!(
                    action = %action_digest,
                    missing = %missing,
                    "action result references missing blob, reporting a miss"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(
                    action = %action_digest,
                    "completeness check failed, reporting a miss: {e}"
                );
                Ok(None)
            }
        }
    }

    async fn put_action_result(
        &self,
        ctx: &RequestContext,
        action_digest: &DigestInfo,
        result: &ActionResult,
    ) -> StoreResult<()> {
        self.inner.put_action_result(ctx, action_digest, result).await
    }
}
