//! Release store implementations.

use crate::naming::sanitize;
use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::artifact::{ArchiveFile, Release, ReleaseAsset};
use gantry_core::ports::ReleaseStore;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

const MANIFEST_FILE: &str = "release.json";

/// In-memory release store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryReleaseStore {
    releases: RwLock<HashMap<String, Release>>,
}

impl InMemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReleaseStore for InMemoryReleaseStore {
    async fn attach(&self, tag: &str, archive: &ArchiveFile) -> Result<ReleaseAsset> {
        let asset = ReleaseAsset::from(archive);
        let mut releases = self.releases.write().await;
        let release = releases
            .entry(tag.to_string())
            .or_insert_with(|| Release::new(tag));

        if release.attach(asset.clone())? {
            info!(tag = %tag, asset = %asset.name, "Attached release asset");
        } else {
            debug!(tag = %tag, asset = %asset.name, "Release asset already attached");
        }
        Ok(asset)
    }

    async fn get(&self, tag: &str) -> Result<Option<Release>> {
        Ok(self.releases.read().await.get(tag).cloned())
    }

    async fn list(&self) -> Result<Vec<Release>> {
        let mut releases: Vec<Release> = self.releases.read().await.values().cloned().collect();
        releases.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(releases)
    }
}

/// Filesystem-based release store: `<root>/<tag>/<archive>` plus a manifest.
pub struct FilesystemReleaseStore {
    root_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FilesystemReleaseStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn release_dir(&self, tag: &str) -> PathBuf {
        self.root_dir.join(sanitize(tag))
    }

    async fn load(&self, dir: &Path) -> Result<Option<Release>> {
        let manifest = dir.join(MANIFEST_FILE);
        if !tokio::fs::try_exists(&manifest).await? {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&manifest).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[async_trait]
impl ReleaseStore for FilesystemReleaseStore {
    async fn attach(&self, tag: &str, archive: &ArchiveFile) -> Result<ReleaseAsset> {
        let asset = ReleaseAsset::from(archive);
        let _guard = self.write_lock.lock().await;

        let dir = self.release_dir(tag);
        let mut release = self
            .load(&dir)
            .await?
            .unwrap_or_else(|| Release::new(tag));

        if !release.attach(asset.clone())? {
            debug!(tag = %tag, asset = %asset.name, "Release asset already attached");
            return Ok(asset);
        }

        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::copy(&archive.path, dir.join(&asset.name)).await?;
        let manifest = serde_json::to_string_pretty(&release)?;
        tokio::fs::write(dir.join(MANIFEST_FILE), manifest).await?;

        info!(
            tag = %tag,
            asset = %asset.name,
            size_bytes = asset.size_bytes,
            path = %dir.display(),
            "Attached release asset"
        );
        Ok(asset)
    }

    async fn get(&self, tag: &str) -> Result<Option<Release>> {
        self.load(&self.release_dir(tag)).await
    }

    async fn list(&self) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        if !tokio::fs::try_exists(&self.root_dir).await? {
            return Ok(releases);
        }

        let mut entries = tokio::fs::read_dir(&self.root_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(release) = self.load(&entry.path()).await?
            {
                releases.push(release);
            }
        }
        releases.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::Error;
    use gantry_core::workflow::ArchiveFormat;
    use tempfile::TempDir;

    fn archive(dir: &Path, name: &str, content: &[u8], sha: &str) -> ArchiveFile {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        ArchiveFile {
            logical_name: name.trim_end_matches(".zip").to_string(),
            file_name: name.to_string(),
            path,
            format: ArchiveFormat::Zip,
            size_bytes: content.len() as u64,
            sha256: sha.to_string(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_attach_order_independent() {
        let temp = TempDir::new().unwrap();
        let a = archive(temp.path(), "a.zip", b"a", "aa");
        let b = archive(temp.path(), "b.zip", b"b", "bb");

        let first = InMemoryReleaseStore::new();
        first.attach("v1.0.0", &a).await.unwrap();
        first.attach("v1.0.0", &b).await.unwrap();

        let second = InMemoryReleaseStore::new();
        second.attach("v1.0.0", &b).await.unwrap();
        second.attach("v1.0.0", &a).await.unwrap();

        assert_eq!(
            first.get("v1.0.0").await.unwrap(),
            second.get("v1.0.0").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_filesystem_store_persists_assets() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemReleaseStore::new(temp.path().join("releases"));
        let a = archive(temp.path(), "cutevariant-standalone-x64.zip", b"x64", "11");

        store.attach("v1.0.0", &a).await.unwrap();
        store.attach("v1.0.0", &a).await.unwrap();

        let release = store.get("v1.0.0").await.unwrap().unwrap();
        assert_eq!(release.asset_names(), vec!["cutevariant-standalone-x64.zip"]);
        assert!(
            temp.path()
                .join("releases/v1.0.0/cutevariant-standalone-x64.zip")
                .exists()
        );
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_filesystem_store_rejects_conflicting_content() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemReleaseStore::new(temp.path().join("releases"));
        let first = archive(temp.path(), "a.zip", b"one", "11");
        store.attach("v1.0.0", &first).await.unwrap();

        let changed = ArchiveFile {
            sha256: "22".into(),
            ..first.clone()
        };
        let err = store.attach("v1.0.0", &changed).await.unwrap_err();
        assert!(matches!(err, Error::ReleaseAssetConflict { .. }));
    }

    #[tokio::test]
    async fn test_missing_release() {
        let temp = TempDir::new().unwrap();
        let store = FilesystemReleaseStore::new(temp.path().join("releases"));
        assert!(store.get("v9").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }
}
