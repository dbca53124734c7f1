use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::dark_launch::DarkLaunchStore;
use super::filesystem::FileSystemBlobStore;
use super::kv_backend::KvBackend;
use super::memory::MemoryBlobStore;
use super::metered::MeteredStore;
use super::networked_kv::NetworkedKvStore;
use super::noop::NoopStore;
use super::read_cache::ReadCacheStore;
use super::sharded::{Shard, ShardedStore};
use super::size_split::SizeSplitStore;
use super::traits::DynBlobStore;
use crate::cache::{BlobActionCacheStore, CompletenessCheckingActionCache, DynActionCacheStore};
use crate::config::{StorageConfig, StorageEngineConfig};
use crate::error::ConfigError;
use crate::metering::{DynMeteringSink, HttpMeteringSink, UsageMeter};

/// The runtime trees built from one [`StorageEngineConfig`].
pub struct StorageStacks {
    pub cas: DynBlobStore,
    pub action_cache: DynActionCacheStore,
    /// Shared by every `metered` node; `None` without a metering section.
    pub meter: Option<Arc<UsageMeter>>,
}

/// Instantiates the CAS and Action Cache trees bottom-up.
///
/// The whole description is validated before any store is created. Named
/// key/value backends and the metering sink are created from the config
/// unless replaced with `with_kv_backend` / `with_metering_sink`.
pub struct StorageBuilder<'a> {
    config: &'a StorageEngineConfig,
    kv_backends: HashMap<String, Arc<KvBackend>>,
    metering_sink: Option<DynMeteringSink>,
}

struct TreeBuilder {
    kv_backends: HashMap<String, Arc<KvBackend>>,
    meter: Option<Arc<UsageMeter>>,
}

impl<'a> StorageBuilder<'a> {
    pub fn new(config: &'a StorageEngineConfig) -> Self {
        Self {
            config,
            kv_backends: HashMap::new(),
            metering_sink: None,
        }
    }

    pub fn with_kv_backend(mut self, name: impl Into<String>, backend: Arc<KvBackend>) -> Self {
        self.kv_backends.insert(name.into(), backend);
        self
    }

    pub fn with_metering_sink(mut self, sink: DynMeteringSink) -> Self {
        self.metering_sink = Some(sink);
        self
    }

    pub async fn build(self) -> Result<StorageStacks, ConfigError> {
        let config = self.config;
        config.validate()?;

        let meter = match &config.metering {
            Some(metering) => {
                let sink = match self.metering_sink {
                    Some(sink) => sink,
                    None => Arc::new(HttpMeteringSink::from_config(metering)?),
                };
                Some(UsageMeter::new(metering, sink))
            }
            None => None,
        };

        let mut kv_backends = self.kv_backends;
        for (name, backend) in &config.kv_backends {
            if !kv_backends.contains_key(name) {
                let backend = KvBackend::connect_redis(name, backend)?;
                kv_backends.insert(name.clone(), Arc::new(backend));
            }
        }

        let tree = TreeBuilder {
            kv_backends,
            meter: meter.clone(),
        };

        tracing::info!(tree = %config.cas.describe(), "Building CAS storage");
        let cas = tree.build_store(&config.cas).await?;

        tracing::info!(tree = %config.action_cache.describe(), "Building Action Cache storage");
        let ac_blobs = tree.build_store(&config.action_cache).await?;
        let mut action_cache: DynActionCacheStore = Arc::new(BlobActionCacheStore::new(ac_blobs));

        if config.check_action_cache_completeness {
            tracing::info!(
                probability = config.completeness_check_probability,
                "Action Cache completeness checking enabled"
            );
            action_cache = Arc::new(CompletenessCheckingActionCache::new(
                action_cache,
                cas.clone(),
                config.completeness_check_probability,
            ));
        }

        Ok(StorageStacks {
            cas,
            action_cache,
            meter,
        })
    }
}

impl TreeBuilder {
    fn build_store<'s>(
        &'s self,
        node: &'s StorageConfig,
    ) -> BoxFuture<'s, Result<DynBlobStore, ConfigError>> {
        Box::pin(async move {
            let store: DynBlobStore = match node {
                StorageConfig::Local { base_path } => {
                    let store = FileSystemBlobStore::new(base_path.clone());
                    store.init().await.map_err(|e| {
                        ConfigError::Invalid(format!(
                            "cannot initialise local store at {}: {e}",
                            base_path.display()
                        ))
                    })?;
                    Arc::new(store)
                }
                StorageConfig::Memory {} => {
                    tracing::warn!("Using unbounded in-memory storage; not suitable for production");
                    Arc::new(MemoryBlobStore::new())
                }
                StorageConfig::NetworkedKv {
                    backend_name,
                    key_prefix,
                } => {
                    let backend = self.kv_backends.get(backend_name).ok_or_else(|| {
                        ConfigError::Invalid(format!("unknown kv backend {backend_name:?}"))
                    })?;
                    Arc::new(NetworkedKvStore::new(backend.clone(), key_prefix.clone()))
                }
                StorageConfig::SizeSplit {
                    size,
                    smaller,
                    larger,
                } => Arc::new(SizeSplitStore::new(
                    *size,
                    self.build_store(smaller).await?,
                    self.build_store(larger).await?,
                )),
                StorageConfig::Sharded {
                    num_replicas,
                    shards,
                } => {
                    let mut built = Vec::with_capacity(shards.len());
                    for shard in shards {
                        built.push(Shard {
                            key: shard.shard_key.clone(),
                            store: self.build_store(&shard.storage).await?,
                        });
                    }
                    Arc::new(ShardedStore::new(built, *num_replicas)?)
                }
                StorageConfig::DarkLaunch {
                    storage2_namespaces,
                    storage1,
                    storage2,
                    write_to_secondary,
                } => Arc::new(DarkLaunchStore::new(
                    storage2_namespaces.iter().cloned(),
                    self.build_store(storage1).await?,
                    self.build_store(storage2).await?,
                    *write_to_secondary,
                )),
                StorageConfig::ReadCache { fast, slow } => Arc::new(ReadCacheStore::new(
                    self.build_store(fast).await?,
                    self.build_store(slow).await?,
                )),
                StorageConfig::Metered { storage } => {
                    let meter = self.meter.clone().ok_or_else(|| {
                        ConfigError::Invalid("metered storage requires metering".to_string())
                    })?;
                    Arc::new(MeteredStore::new(self.build_store(storage).await?, meter))
                }
                StorageConfig::Noop {} => Arc::new(NoopStore),
            };
            Ok(store)
        })
    }
}

/// Builds both trees straight from the config.
pub async fn create_storage_stacks(
    config: &StorageEngineConfig,
) -> Result<StorageStacks, ConfigError> {
    StorageBuilder::new(config).build().await
}
