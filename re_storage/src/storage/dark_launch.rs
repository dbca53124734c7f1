use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;

use super::traits::{BlobStore, DynBlobStore, RequestContext};
use crate::error::StoreResult;
use crate::util::DigestInfo;

/// Routes each instance name to one of two storage stacks during a
/// migration. Migrated instance names read from `storage2`, all others from
/// `storage1`. With `write_to_secondary`, writes are also mirrored to the
/// stack that is not serving the instance name; reads never wait on the
/// mirrored copy.
pub struct DarkLaunchStore {
    storage2_namespaces: HashSet<String>,
    storage1: DynBlobStore,
    storage2: DynBlobStore,
    write_to_secondary: bool,
}

impl DarkLaunchStore {
    pub fn new(
        storage2_namespaces: impl IntoIterator<Item = String>,
        storage1: DynBlobStore,
        storage2: DynBlobStore,
        write_to_secondary: bool,
    ) -> Self {
        Self {
            storage2_namespaces: storage2_namespaces.into_iter().collect(),
            storage1,
            storage2,
            write_to_secondary,
        }
    }

    pub fn is_migrated(&self, instance_name: &str) -> bool {
        self.storage2_namespaces.contains(instance_name)
    }

    /// `(serving, secondary)` stacks for the request.
    fn stacks(&self, ctx: &RequestContext) -> (&DynBlobStore, &DynBlobStore) {
        if self.is_migrated(&ctx.instance_name) {
            (&self.storage2, &self.storage1)
        } else {
            (&self.storage1, &self.storage2)
        }
    }
}

#[async_trait]
impl BlobStore for DarkLaunchStore {
    async fn has_blob(&self, ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        self.stacks(ctx).0.has_blob(ctx, digest).await
    }

    async fn get_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        self.stacks(ctx).0.get_blob(ctx, digest).await
    }

    async fn put_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        let (serving, secondary) = self.stacks(ctx);

        if self.write_to_secondary {
            let secondary = secondary.clone();
            let ctx = ctx.clone();
            let digest = *digest;
            let data = data.clone();
            tokio::spawn(async move {
                if let Err(e) = secondary.put_blob(&ctx, &digest, data).await {
                    tracing::warn!(
                        instance_name = %ctx.instance_name,
                        digest = %digest,
                        "mirrored write to secondary stack failed: {e}"
                    );
                }
            });
        }

        serving.put_blob(ctx, digest, data).await
    }

    async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Vec<DigestInfo>> {
        self.stacks(ctx).0.find_missing_blobs(ctx, digests).await
    }
}
