use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::storage::sharded::shard_position;

/// Top-level storage engine configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageEngineConfig {
    pub cas: StorageConfig,
    pub action_cache: StorageConfig,
    #[serde(default)]
    pub check_action_cache_completeness: bool,
    /// Per-mille chance that an Action Cache hit is checked.
    #[serde(default = "default_completeness_check_probability")]
    pub completeness_check_probability: u32,
    #[serde(default)]
    pub kv_backends: HashMap<String, KvBackendConfig>,
    #[serde(default)]
    pub metering: Option<MeteringConfig>,
}

fn default_completeness_check_probability() -> u32 {
    1000
}

/// One node of a storage tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "backend", deny_unknown_fields)]
pub enum StorageConfig {
    #[serde(rename = "local")]
    Local { base_path: PathBuf },

    #[serde(rename = "memory")]
    Memory {},

    #[serde(rename = "networked_kv")]
    NetworkedKv {
        backend_name: String,
        #[serde(default)]
        key_prefix: String,
    },

    #[serde(rename = "size_split")]
    SizeSplit {
        size: u64,
        smaller: Box<StorageConfig>,
        larger: Box<StorageConfig>,
    },

    #[serde(rename = "sharded")]
    Sharded {
        #[serde(default = "default_num_replicas")]
        num_replicas: usize,
        shards: Vec<ShardConfig>,
    },

    #[serde(rename = "dark_launch")]
    DarkLaunch {
        #[serde(default)]
        storage2_namespaces: Vec<String>,
        storage1: Box<StorageConfig>,
        storage2: Box<StorageConfig>,
        #[serde(default = "default_true")]
        write_to_secondary: bool,
    },

    #[serde(rename = "read_cache")]
    ReadCache {
        fast: Box<StorageConfig>,
        slow: Box<StorageConfig>,
    },

    #[serde(rename = "metered")]
    Metered { storage: Box<StorageConfig> },

    /// Stores nothing and finds nothing.
    #[serde(rename = "none")]
    Noop {},
}

fn default_num_replicas() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShardConfig {
    pub shard_key: String,
    pub storage: StorageConfig,
}

/// A named connection definition for the networked key/value backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KvBackendConfig {
    pub address: String,
    #[serde(default)]
    pub read_only_address: Option<String>,
    #[serde(default = "default_num_connections")]
    pub num_connections: usize,
    /// Per-mille chance that a read goes to the primary instead of the
    /// read-only endpoint.
    #[serde(default)]
    pub use_primary_for_read_only_probability: u32,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_num_connections() -> usize {
    20
}

fn default_operation_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MeteringConfig {
    pub customer_id_prefix: String,
    pub credentials_file: PathBuf,
    #[serde(default = "default_aggregation_window")]
    pub aggregation_window_duration_secs: u64,
    pub env_dimension: String,
    #[serde(default)]
    pub ingest_url: Option<String>,
}

fn default_aggregation_window() -> u64 {
    3600
}

impl StorageEngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StorageEngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the whole description so that a bad config fails startup
    /// instead of a request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.completeness_check_probability > 1000 {
            return Err(ConfigError::Invalid(format!(
                "completeness_check_probability must be at most 1000, got {}",
                self.completeness_check_probability
            )));
        }

        for (name, backend) in &self.kv_backends {
            if backend.num_connections == 0 {
                return Err(ConfigError::Invalid(format!(
                    "kv backend {name}: num_connections must be positive"
                )));
            }
            if backend.use_primary_for_read_only_probability > 1000 {
                return Err(ConfigError::Invalid(format!(
                    "kv backend {name}: use_primary_for_read_only_probability must be at most 1000"
                )));
            }
        }

        if let Some(metering) = &self.metering {
            if metering.aggregation_window_duration_secs == 0 {
                return Err(ConfigError::Invalid(
                    "metering aggregation_window_duration_secs must be positive".to_string(),
                ));
            }
        }

        self.validate_tree("cas", &self.cas)?;
        self.validate_tree("action_cache", &self.action_cache)
    }

    fn validate_tree(&self, path: &str, node: &StorageConfig) -> Result<(), ConfigError> {
        match node {
            StorageConfig::Local { .. } | StorageConfig::Memory {} | StorageConfig::Noop {} => {
                Ok(())
            }
            StorageConfig::NetworkedKv { backend_name, .. } => {
                if self.kv_backends.contains_key(backend_name) {
                    Ok(())
                } else {
                    Err(ConfigError::Invalid(format!(
                        "{path}: unknown kv backend {backend_name:?}"
                    )))
                }
            }
            StorageConfig::SizeSplit { smaller, larger, .. } => {
                self.validate_tree(&format!("{path}.smaller"), smaller)?;
                self.validate_tree(&format!("{path}.larger"), larger)
            }
            StorageConfig::Sharded {
                num_replicas,
                shards,
            } => {
                if shards.is_empty() {
                    return Err(ConfigError::Invalid(format!("{path}: no shards configured")));
                }
                if *num_replicas == 0 || *num_replicas > shards.len() {
                    return Err(ConfigError::Invalid(format!(
                        "{path}: num_replicas must be between 1 and {}, got {num_replicas}",
                        shards.len()
                    )));
                }
                let mut keys = HashSet::new();
                let mut positions = HashSet::new();
                for shard in shards {
                    if !keys.insert(shard.shard_key.as_str()) {
                        return Err(ConfigError::Invalid(format!(
                            "{path}: duplicate shard key {:?}",
                            shard.shard_key
                        )));
                    }
                    if !positions.insert(shard_position(&shard.shard_key)) {
                        return Err(ConfigError::Invalid(format!(
                            "{path}: shard key {:?} collides with another shard on the ring",
                            shard.shard_key
                        )));
                    }
                    self.validate_tree(&format!("{path}.shards[{}]", shard.shard_key), &shard.storage)?;
                }
                Ok(())
            }
            StorageConfig::DarkLaunch {
                storage1, storage2, ..
            } => {
                self.validate_tree(&format!("{path}.storage1"), storage1)?;
                self.validate_tree(&format!("{path}.storage2"), storage2)
            }
            StorageConfig::ReadCache { fast, slow } => {
                self.validate_tree(&format!("{path}.fast"), fast)?;
                self.validate_tree(&format!("{path}.slow"), slow)
            }
            StorageConfig::Metered { storage } => {
                if self.metering.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "{path}: metered storage requires a [metering] section"
                    )));
                }
                self.validate_tree(&format!("{path}.storage"), storage)
            }
        }
    }
}

impl StorageConfig {
    /// Compact one-line rendering of the tree, for startup logs.
    pub fn describe(&self) -> String {
        match self {
            StorageConfig::Local { base_path } => format!("local({})", base_path.display()),
            StorageConfig::Memory {} => "memory".to_string(),
            StorageConfig::NetworkedKv {
                backend_name,
                key_prefix,
            } => format!("networked_kv({backend_name}, prefix={key_prefix:?})"),
            StorageConfig::SizeSplit {
                size,
                smaller,
                larger,
            } => format!(
                "size_split(<={size}: {}, >{size}: {})",
                smaller.describe(),
                larger.describe()
            ),
            StorageConfig::Sharded {
                num_replicas,
                shards,
            } => {
                let shards: Vec<String> = shards
                    .iter()
                    .map(|s| format!("{}={}", s.shard_key, s.storage.describe()))
                    .collect();
                format!("sharded(replicas={num_replicas}, [{}])", shards.join(", "))
            }
            StorageConfig::DarkLaunch {
                storage2_namespaces,
                storage1,
                storage2,
                write_to_secondary,
            } => format!(
                "dark_launch(storage1={}, storage2={}, migrated={:?}, mirror={})",
                storage1.describe(),
                storage2.describe(),
                storage2_namespaces,
                write_to_secondary
            ),
            StorageConfig::ReadCache { fast, slow } => format!(
                "read_cache(fast={}, slow={})",
                fast.describe(),
                slow.describe()
            ),
            StorageConfig::Metered { storage } => format!("metered({})", storage.describe()),
            StorageConfig::Noop {} => "none".to_string(),
        }
    }
}
