//! Blob-storage collaborator. The real deployment points this at the CDN
//! upload service; the default implementation writes to local disk.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Stores `bytes` and returns the public URL for the stored object.
    async fn put(&self, filename: &str, bytes: Vec<u8>) -> anyhow::Result<String>;
}

pub type DynMediaStore = Arc<dyn MediaStore>;

pub struct FsMediaStore {
    dir: PathBuf,
    base_url: String,
}

impl FsMediaStore {
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn put(&self, filename: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        // Client-supplied name: keep only the final component.
        let name = filename.rsplit(['/', '\\']).next().unwrap_or("upload");
        let object = format!("{}-{name}", Uuid::now_v7());

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&object), bytes).await?;

        Ok(format!("{}/{object}", self.base_url.trim_end_matches('/')))
    }
}
