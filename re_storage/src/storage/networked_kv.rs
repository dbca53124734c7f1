use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::kv_backend::KvBackend;
use super::traits::{BlobStore, RequestContext};
use crate::error::{KvError, StoreError, StoreResult};
use crate::util::{retry_with_backoff, DigestInfo, RetryPolicy};

/// Leaf store persisting blobs in a shared networked key/value backend.
///
/// Transient backend failures are retried here and nowhere else in the tree.
pub struct NetworkedKvStore {
    backend: Arc<KvBackend>,
    key_prefix: String,
    retry: RetryPolicy,
}

impl NetworkedKvStore {
    pub fn new(backend: Arc<KvBackend>, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn key(&self, digest: &DigestInfo) -> String {
        format!("{}{}", self.key_prefix, digest)
    }

    fn unavailable(&self, op: &str, digest: &DigestInfo, e: KvError) -> StoreError {
        StoreError::Unavailable(format!(
            "{op} {digest} on backend {}: {e}",
            self.backend.name()
        ))
    }
}

#[async_trait]
impl BlobStore for NetworkedKvStore {
    async fn has_blob(&self, _ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        let key = self.key(digest);
        retry_with_backoff(self.retry, "kv exists", || {
            self.backend.read_endpoint().exists(&key)
        })
        .await
        .map_err(|e| self.unavailable("exists", digest, e))
    }

    async fn get_blob(
        &self,
        _ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        let key = self.key(digest);
        retry_with_backoff(self.retry, "kv get", || self.backend.read_endpoint().get(&key))
            .await
            .map_err(|e| self.unavailable("get", digest, e))
    }

    async fn put_blob(
        &self,
        _ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        let key = self.key(digest);
        retry_with_backoff(self.retry, "kv set", || {
            self.backend.primary().set(&key, data.clone())
        })
        .await
        .map_err(|e| self.unavailable("put", digest, e))
    }
}
