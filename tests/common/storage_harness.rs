use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use re_storage::cache::ActionCacheManager;
use re_storage::cas::CasManager;
use re_storage::metering::{DynMeteringSink, UsageMeter};
use re_storage::storage::{FileSystemBlobStore, StorageBuilder};
use re_storage::StorageEngineConfig;
use tempfile::TempDir;

/// Storage trees built from a TOML template inside a scratch directory.
///
/// Every `{root}` in the template is replaced with the scratch directory.
pub struct StorageHarness {
    pub cas: CasManager,
    pub action_cache: ActionCacheManager,
    pub meter: Option<Arc<UsageMeter>>,
    temp_dir: TempDir,
}

impl StorageHarness {
    pub async fn start(template: &str) -> Result<Self> {
        Self::build(template, None).await
    }

    pub async fn start_with_sink(template: &str, sink: DynMeteringSink) -> Result<Self> {
        Self::build(template, Some(sink)).await
    }

    async fn build(template: &str, sink: Option<DynMeteringSink>) -> Result<Self> {
        let temp_dir = TempDir::new().context("Failed to create temp directory")?;
        let rendered = template.replace("{root}", &temp_dir.path().display().to_string());
        let config =
            StorageEngineConfig::from_toml_str(&rendered).context("Failed to parse test config")?;

        let mut builder = StorageBuilder::new(&config);
        if let Some(sink) = sink {
            builder = builder.with_metering_sink(sink);
        }
        let stacks = builder.build().await.context("Failed to build storage")?;

        Ok(Self {
            cas: CasManager::new(stacks.cas),
            action_cache: ActionCacheManager::new(stacks.action_cache),
            meter: stacks.meter,
            temp_dir,
        })
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp_dir.path().join(relative)
    }

    /// Opens the local store under `relative` directly, bypassing the tree.
    pub fn local_store(&self, relative: &str) -> FileSystemBlobStore {
        FileSystemBlobStore::new(self.path(relative))
    }
}
