//! Build artifacts and releases.

use crate::ids::JobInstanceId;
use crate::workflow::ArchiveFormat;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A packaged build output owned by one job instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub owner: JobInstanceId,
    pub job_name: String,
    pub path: PathBuf,
    pub logical_name: String,
}

/// A compressed artifact ready for promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveFile {
    pub logical_name: String,
    pub file_name: String,
    pub path: PathBuf,
    pub format: ArchiveFormat,
    pub size_bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub size_bytes: u64,
    pub sha256: String,
}

impl From<&ArchiveFile> for ReleaseAsset {
    fn from(archive: &ArchiveFile) -> Self {
        Self {
            name: archive.file_name.clone(),
            size_bytes: archive.size_bytes,
            sha256: archive.sha256.clone(),
        }
    }
}

/// Append-only set of assets published under a tag.
///
/// Assets are keyed by name, so the final contents do not depend on the
/// order in which instances attach them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag: String,
    assets: BTreeMap<String, ReleaseAsset>,
}

impl Release {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            assets: BTreeMap::new(),
        }
    }

    /// Attach an asset. Returns `false` when an identical asset was already present.
    pub fn attach(&mut self, asset: ReleaseAsset) -> Result<bool> {
        match self.assets.get(&asset.name) {
            Some(existing) if existing.sha256 == asset.sha256 => Ok(false),
            Some(_) => Err(Error::ReleaseAssetConflict {
                tag: self.tag.clone(),
                name: asset.name,
            }),
            None => {
                self.assets.insert(asset.name.clone(), asset);
                Ok(true)
            }
        }
    }

    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.get(name)
    }

    pub fn assets(&self) -> impl Iterator<Item = &ReleaseAsset> {
        self.assets.values()
    }

    pub fn asset_names(&self) -> Vec<&str> {
        self.assets.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str, sha: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            size_bytes: 10,
            sha256: sha.to_string(),
        }
    }

    #[test]
    fn test_attach_is_order_independent() {
        let mut first = Release::new("v1.0.0");
        first.attach(asset("a.zip", "aa")).unwrap();
        first.attach(asset("b.zip", "bb")).unwrap();

        let mut second = Release::new("v1.0.0");
        second.attach(asset("b.zip", "bb")).unwrap();
        second.attach(asset("a.zip", "aa")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_reattach_identical_is_noop() {
        let mut release = Release::new("v1.0.0");
        assert!(release.attach(asset("a.zip", "aa")).unwrap());
        assert!(!release.attach(asset("a.zip", "aa")).unwrap());
        assert_eq!(release.len(), 1);
    }

    #[test]
    fn test_conflicting_content_rejected() {
        let mut release = Release::new("v1.0.0");
        release.attach(asset("a.zip", "aa")).unwrap();
        let err = release.attach(asset("a.zip", "zz")).unwrap_err();
        assert!(matches!(err, Error::ReleaseAssetConflict { .. }));
    }
}
