use std::collections::{HashMap, HashSet};
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use sha2::{Digest as _, Sha256};

use super::traits::{BlobStore, DynBlobStore, RequestContext};
use crate::error::{ConfigError, StoreError, StoreResult};
use crate::util::{DigestInfo, RetryPolicy};

pub struct Shard {
    pub key: String,
    pub store: DynBlobStore,
}

/// Consistent-hash sharding with replication.
///
/// Each shard sits on a ring at `hash(shard_key)`. A digest belongs to the
/// first shard at or after its own position (wrapping) and is replicated to
/// the next `num_replicas - 1` shards along the ring. Only the primary write
/// decides the outcome of a put; failed replica writes are repaired in the
/// background.
pub struct ShardedStore {
    shards: Vec<Shard>,
    /// `(position, index into shards)`, sorted by position.
    ring: Vec<(u64, usize)>,
    num_replicas: usize,
    repair_policy: RetryPolicy,
}

/// Ring position of a shard key. Stable across processes and releases.
pub fn shard_position(shard_key: &str) -> u64 {
    let hash = Sha256::digest(shard_key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(prefix)
}

impl ShardedStore {
    pub fn new(shards: Vec<Shard>, num_replicas: usize) -> Result<Self, ConfigError> {
        if shards.is_empty() {
            return Err(ConfigError::Invalid(
                "sharded store needs at least one shard".to_string(),
            ));
        }
        if num_replicas == 0 || num_replicas > shards.len() {
            return Err(ConfigError::Invalid(format!(
                "num_replicas must be between 1 and {} (the number of shards), got {}",
                shards.len(),
                num_replicas
            )));
        }

        let mut positions: HashMap<u64, &str> = HashMap::new();
        let mut ring = Vec::with_capacity(shards.len());
        for (index, shard) in shards.iter().enumerate() {
            let position = shard_position(&shard.key);
            if let Some(existing) = positions.insert(position, &shard.key) {
                return Err(ConfigError::Invalid(if existing == shard.key {
                    format!("duplicate shard key {:?}", shard.key)
                } else {
                    format!(
                        "shard keys {:?} and {:?} collide on the ring",
                        existing, shard.key
                    )
                }));
            }
            ring.push((position, index));
        }
        ring.sort_unstable();

        Ok(Self {
            shards,
            ring,
            num_replicas,
            repair_policy: RetryPolicy {
                max_attempts: 3,
                base_delay: std::time::Duration::from_millis(500),
            },
        })
    }

    pub fn with_repair_policy(mut self, policy: RetryPolicy) -> Self {
        self.repair_policy = policy;
        self
    }

    /// Shard indices holding `digest`, primary first, in ring order.
    pub fn replica_set(&self, digest: &DigestInfo) -> Vec<usize> {
        let position = digest.ring_position();
        let start = match self.ring.partition_point(|(p, _)| *p < position) {
            i if i == self.ring.len() => 0,
            i => i,
        };

        (0..self.num_replicas)
            .map(|offset| self.ring[(start + offset) % self.ring.len()].1)
            .collect()
    }

    /// Key of the primary shard for `digest`.
    pub fn shard_for(&self, digest: &DigestInfo) -> &str {
        &self.shards[self.replica_set(digest)[0]].key
    }

    /// Asks `replicas` in order and returns the first hit. Errors are only
    /// surfaced when no replica gave an answer at all.
    async fn first_hit<T, F, Fut>(
        &self,
        digest: &DigestInfo,
        replicas: &[usize],
        op: F,
    ) -> StoreResult<Option<T>>
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = StoreResult<Option<T>>>,
    {
        let mut answered = false;
        let mut last_error = None;

        for &index in replicas {
            match op(index).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => answered = true,
                Err(e) => {
                    tracing::warn!(
                        shard = %self.shards[index].key,
                        digest = %digest,
                        "shard lookup failed, trying next replica: {e}"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(None),
        }
    }

    fn schedule_repair(&self, index: usize, ctx: &RequestContext, digest: DigestInfo, data: Bytes) {
        let store = self.shards[index].store.clone();
        let shard = self.shards[index].key.clone();
        let ctx = ctx.clone();
        let policy = self.repair_policy;

        tokio::spawn(async move {
            for attempt in 0..policy.max_attempts {
                tokio::time::sleep(policy.delay_for(attempt)).await;
                match store.put_blob(&ctx, &digest, data.clone()).await {
                    Ok(()) => {
                        tracing::info!(shard = %shard, digest = %digest, "replica repaired");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            shard = %shard,
                            digest = %digest,
                            attempt = attempt + 1,
                            "replica repair failed: {e}"
                        );
                    }
                }
            }
            tracing::error!(shard = %shard, digest = %digest, "giving up on replica repair");
        });
    }
}

#[async_trait]
impl BlobStore for ShardedStore {
    async fn has_blob(&self, ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        let replicas = self.replica_set(digest);
        let hit = self
            .first_hit(digest, &replicas, |index| async move {
                self.shards[index]
                    .store
                    .has_blob(ctx, digest)
                    .await
                    .map(|present| present.then_some(()))
            })
            .await?;
        Ok(hit.is_some())
    }

    async fn get_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        let replicas = self.replica_set(digest);
        self.first_hit(digest, &replicas, |index| {
            self.shards[index].store.get_blob(ctx, digest)
        })
        .await
    }

    async fn put_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        let replicas = self.replica_set(digest);
        let results = join_all(
            replicas
                .iter()
                .map(|&index| self.shards[index].store.put_blob(ctx, digest, data.clone())),
        )
        .await;

        let mut results = replicas.iter().zip(results);
        let primary = match results.next() {
            Some((_, result)) => result,
            None => return Err(StoreError::Unavailable("empty replica set".to_string())),
        };

        for (&index, result) in results {
            if let Err(e) = result {
                tracing::warn!(
                    shard = %self.shards[index].key,
                    digest = %digest,
                    "replica write failed, scheduling repair: {e}"
                );
                self.schedule_repair(index, ctx, *digest, data.clone());
            }
        }

        primary
    }

    async fn find_missing_blobs(
        &self,
        ctx: &RequestContext,
        digests: &[DigestInfo],
    ) -> StoreResult<Vec<DigestInfo>> {
        let mut by_primary: HashMap<usize, Vec<DigestInfo>> = HashMap::new();
        for digest in digests {
            by_primary
                .entry(self.replica_set(digest)[0])
                .or_default()
                .push(*digest);
        }

        let answers = join_all(by_primary.iter().map(|(&index, group)| async move {
            (group, self.shards[index].store.find_missing_blobs(ctx, group).await)
        }))
        .await;

        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for (group, answer) in answers {
            match answer {
                Ok(primary_missing) => {
                    for digest in primary_missing {
                        let replicas = self.replica_set(&digest);
                        let secondaries = &replicas[1..];
                        // The primary already answered, so unreachable
                        // secondaries count as not holding the blob.
                        let hit = self
                            .first_hit(&digest, secondaries, |index| async move {
                                self.shards[index]
                                    .store
                                    .has_blob(ctx, &digest)
                                    .await
                                    .map(|present| present.then_some(()))
                            })
                            .await
                            .unwrap_or(None);
                        if hit.is_none() && seen.insert(digest) {
                            missing.push(digest);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("primary shard find_missing failed, probing replicas: {e}");
                    for digest in group {
                        if !self.has_blob(ctx, digest).await? && seen.insert(*digest) {
                            missing.push(*digest);
                        }
                    }
                }
            }
        }

        Ok(missing)
    }
}
