use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use uuid::Uuid;

use super::traits::{BlobStore, RequestContext};
use crate::error::{StoreError, StoreResult};
use crate::util::DigestInfo;

const TEMP_DIR: &str = "tmp";

/// Stores each blob as one file named by its digest under `root_dir`.
///
/// Writes land in `root_dir/tmp` first and are renamed into place, so a
/// reader never observes a partial file.
pub struct FileSystemBlobStore {
    root_dir: PathBuf,
}

impl FileSystemBlobStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    pub async fn init(&self) -> StoreResult<()> {
        fs::create_dir_all(self.root_dir.join(TEMP_DIR))
            .await
            .map_err(|e| StoreError::from_io("create store directory", e))?;
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn blob_path(&self, digest: &DigestInfo) -> PathBuf {
        let hash = digest.hash_hex();
        self.root_dir
            .join(&hash[0..2])
            .join(&hash[2..4])
            .join(format!("{}_{}", hash, digest.size_bytes))
    }

    fn temp_path(&self, digest: &DigestInfo) -> PathBuf {
        self.root_dir
            .join(TEMP_DIR)
            .join(format!("{}.{}.tmp", digest.hash_hex(), Uuid::new_v4()))
    }
}

async fn write_atomically(temp_path: PathBuf, path: PathBuf, data: Bytes) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::from_io("create blob directory", e))?;
    }

    if let Err(e) = fs::write(&temp_path, &data).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::from_io("write temp file", e));
    }

    if let Err(e) = fs::rename(&temp_path, &path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::from_io("rename blob into place", e));
    }

    Ok(())
}

#[async_trait]
impl BlobStore for FileSystemBlobStore {
    async fn has_blob(&self, _ctx: &RequestContext, digest: &DigestInfo) -> StoreResult<bool> {
        match fs::metadata(self.blob_path(digest)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::from_io("stat blob", e)),
        }
    }

    async fn get_blob(
        &self,
        _ctx: &RequestContext,
        digest: &DigestInfo,
    ) -> StoreResult<Option<Bytes>> {
        let path = self.blob_path(digest);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::from_io(&format!("read blob {digest}"), e)),
        }
    }

    async fn put_blob(
        &self,
        ctx: &RequestContext,
        digest: &DigestInfo,
        data: Bytes,
    ) -> StoreResult<()> {
        if self.has_blob(ctx, digest).await? {
            return Ok(());
        }

        // The write runs on its own task so a cancelled caller cannot leave it
        // stopped between the temp write and the rename.
        let write = tokio::spawn(write_atomically(
            self.temp_path(digest),
            self.blob_path(digest),
            data,
        ));

        write
            .await
            .map_err(|e| StoreError::Unavailable(format!("blob write task failed: {e}")))?
    }
}
