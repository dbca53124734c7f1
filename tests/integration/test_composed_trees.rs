use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use re_storage::storage::{
    BlobStore, DynBlobStore, FileSystemBlobStore, MemoryBlobStore, ReadCacheStore, RequestContext,
    Shard, ShardedStore,
};
use re_storage::util::{compute_digest, RetryPolicy};
use re_storage::StoreError;
use re_storage_integration_tests::{blob, init_tracing, CountingStore, FlakyStore, StorageHarness};
use tempfile::TempDir;

const LOCAL_CONFIG: &str = r#"
[cas]
backend = "local"
base_path = "{root}/cas"

[action_cache]
backend = "memory"
"#;

const LAYERED_CONFIG: &str = r#"
[cas]
backend = "size_split"
size = 64

[cas.smaller]
backend = "read_cache"

[cas.smaller.fast]
backend = "memory"

[cas.smaller.slow]
backend = "local"
base_path = "{root}/small"

[cas.larger]
backend = "sharded"
num_replicas = 2

[[cas.larger.shards]]
shard_key = "shard-a"
storage = { backend = "local", base_path = "{root}/shard-a" }

[[cas.larger.shards]]
shard_key = "shard-b"
storage = { backend = "local", base_path = "{root}/shard-b" }

[[cas.larger.shards]]
shard_key = "shard-c"
storage = { backend = "local", base_path = "{root}/shard-c" }

[action_cache]
backend = "memory"
"#;

const DARK_LAUNCH_CONFIG: &str = r#"
[cas]
backend = "dark_launch"
storage2_namespaces = ["migrated"]

[cas.storage1]
backend = "local"
base_path = "{root}/old"

[cas.storage2]
backend = "local"
base_path = "{root}/new"

[action_cache]
backend = "memory"
"#;

async fn wait_for_blob(store: &dyn BlobStore, ctx: &RequestContext, content: &[u8]) -> Result<()> {
    let digest = compute_digest(content);
    for _ in 0..100 {
        if store.has_blob(ctx, &digest).await? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("blob {digest} never appeared")
}

#[tokio::test]
async fn test_round_trip_through_every_tree_shape() -> Result<()> {
    init_tracing();
    let ctx = RequestContext::new("main");

    for template in [LOCAL_CONFIG, LAYERED_CONFIG, DARK_LAUNCH_CONFIG] {
        let harness = StorageHarness::start(template).await?;

        let small = Bytes::from_static(b"small blob");
        let large = Bytes::from(vec![7u8; 4096]);
        let empty = Bytes::new();

        for data in [small, large, empty] {
            let digest = harness
                .cas
                .put_blob(&ctx, data.clone())
                .await
                .context("Failed to upload blob")?;
            let fetched = harness.cas.get_blob(&ctx, &digest).await?;
            assert_eq!(fetched, Some(data));
            assert!(harness.cas.has_blob(&ctx, &digest).await?);
        }

        let (unknown, _) = blob(b"never stored");
        assert_eq!(harness.cas.get_blob(&ctx, &unknown).await?, None);
        assert_eq!(
            harness.cas.find_missing_blobs(&ctx, &[unknown]).await?,
            vec![unknown]
        );
    }

    Ok(())
}

#[tokio::test]
async fn test_mismatched_upload_is_rejected_everywhere() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(LAYERED_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let (claimed, _) = blob(b"what the client says it sends");
    let err = harness
        .cas
        .put_blob_with_digest(&ctx, &claimed, Bytes::from_static(b"what it actually sends"))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::DigestMismatch { .. }));
    assert!(!harness.cas.has_blob(&ctx, &claimed).await?);
    assert_eq!(harness.cas.get_blob(&ctx, &claimed).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_corrupted_bytes_are_reported_on_read() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(LOCAL_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let (digest, _) = blob(b"original content");
    harness
        .local_store("cas")
        .put_blob(&ctx, &digest, Bytes::from_static(b"tampered content"))
        .await?;

    let err = harness.cas.get_blob(&ctx, &digest).await.unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
    Ok(())
}

#[tokio::test]
async fn test_size_split_sends_blobs_to_one_side_only() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(LAYERED_CONFIG).await?;
    let ctx = RequestContext::new("main");

    let at_threshold = Bytes::from(vec![1u8; 64]);
    let above_threshold = Bytes::from(vec![2u8; 65]);

    let small_digest = harness.cas.put_blob(&ctx, at_threshold).await?;
    let large_digest = harness.cas.put_blob(&ctx, above_threshold).await?;

    let small_side = harness.local_store("small");
    assert!(small_side.has_blob(&ctx, &small_digest).await?);
    assert!(!small_side.has_blob(&ctx, &large_digest).await?);

    let mut large_copies = 0;
    for shard in ["shard-a", "shard-b", "shard-c"] {
        let store = harness.local_store(shard);
        assert!(!store.has_blob(&ctx, &small_digest).await?);
        if store.has_blob(&ctx, &large_digest).await? {
            large_copies += 1;
        }
    }
    assert_eq!(large_copies, 2, "large blob should live on exactly two replicas");
    Ok(())
}

async fn local_shards(root: &TempDir, keys: &[&str]) -> Result<Vec<Shard>> {
    let mut shards = Vec::with_capacity(keys.len());
    for key in keys {
        let store = FileSystemBlobStore::new(root.path().join(key));
        store.init().await?;
        shards.push(Shard {
            key: key.to_string(),
            store: Arc::new(store),
        });
    }
    Ok(shards)
}

#[tokio::test]
async fn test_shard_placement_survives_restart() -> Result<()> {
    init_tracing();
    let root = TempDir::new()?;
    let ctx = RequestContext::new("main");
    let keys = ["alpha", "beta", "gamma", "delta"];

    let first = ShardedStore::new(local_shards(&root, &keys).await?, 1)?;
    let mut stored = Vec::new();
    for i in 0..32u32 {
        let (digest, data) = blob(format!("blob number {i}").as_bytes());
        first.put_blob(&ctx, &digest, data).await?;
        stored.push((digest, first.shard_for(&digest).to_string()));
    }
    drop(first);

    let reordered = ["delta", "gamma", "beta", "alpha"];
    let second = ShardedStore::new(local_shards(&root, &reordered).await?, 1)?;
    for (digest, owner) in &stored {
        assert_eq!(second.shard_for(digest), owner);
        assert!(second.get_blob(&ctx, digest).await?.is_some());

        let owner_store = FileSystemBlobStore::new(root.path().join(owner));
        assert!(owner_store.has_blob(&ctx, digest).await?);
    }
    Ok(())
}

#[tokio::test]
async fn test_replicated_blob_survives_primary_outage() -> Result<()> {
    init_tracing();
    let ctx = RequestContext::new("main");
    let stores: Vec<Arc<FlakyStore>> = (0..3).map(|_| Arc::new(FlakyStore::default())).collect();
    let shards = stores
        .iter()
        .enumerate()
        .map(|(i, store)| Shard {
            key: format!("replica-{i}"),
            store: store.clone() as DynBlobStore,
        })
        .collect();
    let sharded = ShardedStore::new(shards, 2)?;

    let (digest, data) = blob(b"replicated payload");
    sharded.put_blob(&ctx, &digest, data.clone()).await?;

    let replicas = sharded.replica_set(&digest);
    stores[replicas[0]].set_failing(true);

    assert_eq!(sharded.get_blob(&ctx, &digest).await?, Some(data));
    assert!(sharded.has_blob(&ctx, &digest).await?);
    Ok(())
}

#[tokio::test]
async fn test_find_missing_survives_secondary_outage() -> Result<()> {
    init_tracing();
    let ctx = RequestContext::new("main");
    let stores: Vec<Arc<FlakyStore>> = (0..2).map(|_| Arc::new(FlakyStore::default())).collect();
    let shards = stores
        .iter()
        .enumerate()
        .map(|(i, store)| Shard {
            key: format!("replica-{i}"),
            store: store.clone() as DynBlobStore,
        })
        .collect();
    let sharded = ShardedStore::new(shards, 2)?;

    let (stored, data) = blob(b"uploaded before the outage");
    sharded.put_blob(&ctx, &stored, data).await?;

    let (fresh, _) = blob(b"about to be uploaded");
    stores[sharded.replica_set(&fresh)[1]].set_failing(true);

    let missing = sharded.find_missing_blobs(&ctx, &[fresh, stored]).await?;
    assert_eq!(missing, vec![fresh]);
    Ok(())
}

#[tokio::test]
async fn test_failed_replica_write_is_repaired() -> Result<()> {
    init_tracing();
    let ctx = RequestContext::new("main");
    let stores: Vec<Arc<FlakyStore>> = (0..3).map(|_| Arc::new(FlakyStore::default())).collect();
    let shards = stores
        .iter()
        .enumerate()
        .map(|(i, store)| Shard {
            key: format!("replica-{i}"),
            store: store.clone() as DynBlobStore,
        })
        .collect();
    let sharded = ShardedStore::new(shards, 2)?.with_repair_policy(RetryPolicy {
        max_attempts: 10,
        base_delay: Duration::from_millis(10),
    });

    let (digest, data) = blob(b"needs repair");
    let replicas = sharded.replica_set(&digest);
    let secondary = stores[replicas[1]].clone();

    secondary.set_failing(true);
    sharded.put_blob(&ctx, &digest, data).await?;
    assert!(!secondary.inner.has_blob(&ctx, &digest).await?);

    secondary.set_failing(false);
    wait_for_blob(&*secondary, &ctx, b"needs repair").await?;
    Ok(())
}

#[tokio::test]
async fn test_failed_primary_write_fails_the_put() -> Result<()> {
    init_tracing();
    let ctx = RequestContext::new("main");
    let stores: Vec<Arc<FlakyStore>> = (0..2).map(|_| Arc::new(FlakyStore::default())).collect();
    let shards = stores
        .iter()
        .enumerate()
        .map(|(i, store)| Shard {
            key: format!("replica-{i}"),
            store: store.clone() as DynBlobStore,
        })
        .collect();
    let sharded = ShardedStore::new(shards, 2)?;

    let (digest, data) = blob(b"primary is down");
    stores[sharded.replica_set(&digest)[0]].set_failing(true);

    let err = sharded.put_blob(&ctx, &digest, data).await.unwrap_err();
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn test_dark_launch_keeps_namespaces_apart() -> Result<()> {
    init_tracing();
    let harness = StorageHarness::start(DARK_LAUNCH_CONFIG).await?;
    let legacy = RequestContext::new("legacy");
    let migrated = RequestContext::new("migrated");

    // Present only in the old stack.
    let (old_only, old_data) = blob(b"only in storage1");
    harness
        .local_store("old")
        .put_blob(&legacy, &old_only, old_data.clone())
        .await?;

    assert_eq!(harness.cas.get_blob(&legacy, &old_only).await?, Some(old_data));
    assert_eq!(harness.cas.get_blob(&migrated, &old_only).await?, None);

    // Writes from a migrated namespace land in storage2 and are mirrored back.
    let digest = harness
        .cas
        .put_blob(&migrated, Bytes::from_static(b"written after migration"))
        .await?;
    assert!(harness.local_store("new").has_blob(&migrated, &digest).await?);
    wait_for_blob(&harness.local_store("old"), &legacy, b"written after migration").await?;
    Ok(())
}

#[tokio::test]
async fn test_read_cache_serves_repeat_reads_from_fast_tier() -> Result<()> {
    init_tracing();
    let ctx = RequestContext::new("main");
    let fast = Arc::new(MemoryBlobStore::new());
    let slow = Arc::new(CountingStore::default());

    let (digest, data) = blob(b"hot blob");
    slow.inner.put_blob(&ctx, &digest, data.clone()).await?;

    let cache = ReadCacheStore::new(fast.clone(), slow.clone());
    assert_eq!(cache.get_blob(&ctx, &digest).await?, Some(data.clone()));
    assert_eq!(slow.gets(), 1);
    assert!(fast.has_blob(&ctx, &digest).await?);

    assert_eq!(cache.get_blob(&ctx, &digest).await?, Some(data));
    assert_eq!(slow.gets(), 1, "second read should not reach the slow tier");
    Ok(())
}
