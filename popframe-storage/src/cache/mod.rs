//! Key-addressed artifact cache on the local filesystem.
//!
//! # Layout
//!
//! ```text
//! {root}/models/{region}.json
//! {root}/layers/{timestamp}_{name}_{region}_{kind}.json
//! ```
//!
//! Writes go to a hidden temporary file in the target directory and are
//! renamed into place, so a reader never observes a half-written entry and
//! a save always overwrites rather than appends.

pub mod key;
mod layers;

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use popframe_core::{CacheConfig, PopframeResult, RegionId, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

pub use key::{ArtifactKey, LayerKey};

/// Entry counts and on-disk size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub models: u64,
    pub layers: u64,
    pub size_bytes: u64,
}

/// Filesystem cache for region model artifacts and derived layers.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    models_dir: PathBuf,
    layers_dir: PathBuf,
}

impl ArtifactCache {
    /// Open the cache, creating its directories when missing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InitFailed` if a directory cannot be created.
    pub async fn open(config: &CacheConfig) -> PopframeResult<Self> {
        let cache = Self {
            models_dir: config.models_dir(),
            layers_dir: config.layers_dir(),
        };
        for dir in [&cache.models_dir, &cache.layers_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StorageError::InitFailed {
                    path: dir.display().to_string(),
                    reason: e.to_string(),
                })?;
        }
        tracing::debug!(models = %cache.models_dir.display(), layers = %cache.layers_dir.display(), "Artifact cache opened");
        Ok(cache)
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn layers_dir(&self) -> &Path {
        &self.layers_dir
    }

    /// Path of the current artifact for a region.
    pub fn artifact_path(&self, region_id: RegionId) -> PathBuf {
        self.models_dir.join(ArtifactKey::new(region_id).file_name())
    }

    /// True iff a current artifact file is present for the region.
    pub async fn exists(&self, region_id: RegionId) -> bool {
        matches!(
            tokio::fs::try_exists(self.artifact_path(region_id)).await,
            Ok(true)
        )
    }

    /// Serialize and store the region's artifact, replacing any previous one.
    ///
    /// # Returns
    ///
    /// The storage key (file name) the artifact was written under.
    ///
    /// # Errors
    ///
    /// `StorageError::SaveFailed` carrying the attempted key and the regions
    /// currently cached.
    pub async fn save<A>(&self, region_id: RegionId, artifact: &A) -> PopframeResult<String>
    where
        A: Serialize + Sync,
    {
        let key = ArtifactKey::new(region_id).file_name();
        let result = match serde_json::to_vec(artifact) {
            Ok(bytes) => write_atomic(&self.models_dir, &key, &bytes).await,
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                tracing::debug!(%region_id, key = %key, "Artifact cached");
                Ok(key)
            }
            Err(reason) => {
                let available = self.list_keys().await.unwrap_or_default();
                Err(StorageError::SaveFailed {
                    region_id,
                    key,
                    reason,
                    available: available.into_iter().collect(),
                }
                .into())
            }
        }
    }

    /// Read and deserialize the region's current artifact.
    ///
    /// # Errors
    ///
    /// `StorageError::LoadFailed` carrying the attempted path, for a missing
    /// file as well as for an undecodable one.
    pub async fn load<A>(&self, region_id: RegionId) -> PopframeResult<A>
    where
        A: DeserializeOwned,
    {
        let path = self.artifact_path(region_id);
        let load_failed = |reason: String| StorageError::LoadFailed {
            path: path.display().to_string(),
            reason,
        };
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| load_failed(e.to_string()))?;
        let artifact = serde_json::from_slice(&bytes).map_err(|e| load_failed(e.to_string()))?;
        Ok(artifact)
    }

    /// Like [`load`](Self::load), but a missing artifact yields `None`.
    pub async fn load_if_present<A>(&self, region_id: RegionId) -> PopframeResult<Option<A>>
    where
        A: DeserializeOwned,
    {
        let path = self.artifact_path(region_id);
        let load_failed = |reason: String| StorageError::LoadFailed {
            path: path.display().to_string(),
            reason,
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(load_failed(e.to_string()).into()),
        };
        let artifact = serde_json::from_slice(&bytes).map_err(|e| load_failed(e.to_string()))?;
        Ok(Some(artifact))
    }

    /// Every region with a current artifact on disk.
    pub async fn list_keys(&self) -> PopframeResult<BTreeSet<RegionId>> {
        let names = list_file_names(&self.models_dir).await?;
        Ok(names
            .iter()
            .filter_map(|name| ArtifactKey::parse(name))
            .map(|key| key.region_id)
            .collect())
    }

    /// Remove the region's artifact and all of its derived layers.
    ///
    /// Deleting a region with nothing cached is a no-op.
    pub async fn delete_region(&self, region_id: RegionId) -> PopframeResult<()> {
        remove_if_present(&self.artifact_path(region_id)).await?;
        let layers = self.delete_layers(region_id).await?;
        tracing::info!(%region_id, layers, "Region evicted from cache");
        Ok(())
    }

    /// Entry counts and total size of both directories.
    pub async fn stats(&self) -> PopframeResult<CacheStats> {
        let mut stats = CacheStats::default();
        for name in list_file_names(&self.models_dir).await? {
            if ArtifactKey::parse(&name).is_some() {
                stats.models += 1;
                stats.size_bytes += file_len(&self.models_dir.join(&name)).await;
            }
        }
        for name in list_file_names(&self.layers_dir).await? {
            if LayerKey::parse(&name).is_some() {
                stats.layers += 1;
                stats.size_bytes += file_len(&self.layers_dir.join(&name)).await;
            }
        }
        Ok(stats)
    }
}

// ============================================================================
// FILESYSTEM HELPERS
// ============================================================================

/// Write `bytes` to `dir/file_name` through a temporary file and rename.
async fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<(), String> {
    let target = dir.join(file_name);
    let temp = dir.join(format!(".{}.tmp", Uuid::now_v7()));

    if let Err(e) = tokio::fs::write(&temp, bytes).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.to_string());
    }
    if let Err(e) = tokio::fs::rename(&temp, &target).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.to_string());
    }
    Ok(())
}

async fn list_file_names(dir: &Path) -> PopframeResult<Vec<String>> {
    let enumerate_failed = |e: std::io::Error| StorageError::EnumerateFailed {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(enumerate_failed)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(enumerate_failed)? {
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => tracing::debug!(file = ?raw, "Skipping non UTF-8 cache entry"),
        }
    }
    names.sort();
    Ok(names)
}

async fn remove_if_present(path: &Path) -> PopframeResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::DeleteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
        .into()),
    }
}

async fn file_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use popframe_core::PopframeError;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestArtifact {
        region: i64,
        weights: Vec<f64>,
        label: String,
    }

    fn artifact(region: i64) -> TestArtifact {
        TestArtifact {
            region,
            weights: vec![0.1, 1.0 / 3.0, 2.5e-9, 12345.678],
            label: format!("model-{}", region),
        }
    }

    async fn create_test_cache() -> (ArtifactCache, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let cache = ArtifactCache::open(&CacheConfig::new(temp_dir.path()))
            .await
            .expect("Cache creation should succeed");
        (cache, temp_dir)
    }

    #[tokio::test]
    async fn test_open_creates_directories() {
        let (cache, temp_dir) = create_test_cache().await;
        assert!(cache.models_dir().is_dir());
        assert!(cache.layers_dir().is_dir());
        assert!(cache.models_dir().starts_with(temp_dir.path()));
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let (cache, _temp_dir) = create_test_cache().await;
        let region = RegionId::new(42);
        assert!(!cache.exists(region).await);

        let key = cache.save(region, &artifact(42)).await.expect("save should succeed");
        assert_eq!(key, "42.json");
        assert!(cache.exists(region).await);

        let loaded: TestArtifact = cache.load(region).await.expect("load should succeed");
        assert_eq!(loaded, artifact(42));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (cache, _temp_dir) = create_test_cache().await;
        let region = RegionId::new(1);
        cache.save(region, &artifact(1)).await.expect("first save");

        let mut newer = artifact(1);
        newer.label = "rebuilt".to_string();
        cache.save(region, &newer).await.expect("second save");

        let loaded: TestArtifact = cache.load(region).await.expect("load");
        assert_eq!(loaded.label, "rebuilt");
        assert_eq!(cache.list_keys().await.expect("list").len(), 1);
        assert_eq!(cache.stats().await.expect("stats").models, 1);
    }

    #[tokio::test]
    async fn test_load_missing_reports_path() {
        let (cache, _temp_dir) = create_test_cache().await;
        let err = cache
            .load::<TestArtifact>(RegionId::new(9))
            .await
            .expect_err("nothing cached");
        match err {
            PopframeError::Storage(StorageError::LoadFailed { path, .. }) => {
                assert!(path.ends_with("9.json"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_if_present() {
        let (cache, _temp_dir) = create_test_cache().await;
        let region = RegionId::new(9);
        let missing: Option<TestArtifact> = cache.load_if_present(region).await.expect("missing is not an error");
        assert_eq!(missing, None);

        cache.save(region, &artifact(9)).await.expect("save");
        let loaded: Option<TestArtifact> = cache.load_if_present(region).await.expect("load");
        assert_eq!(loaded, Some(artifact(9)));

        tokio::fs::write(cache.artifact_path(region), b"{not json")
            .await
            .expect("write");
        let err = cache.load_if_present::<TestArtifact>(region).await.expect_err("corrupt");
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_load_corrupt_file_fails() {
        let (cache, _temp_dir) = create_test_cache().await;
        tokio::fs::write(cache.artifact_path(RegionId::new(3)), b"{not json")
            .await
            .expect("write");
        let err = cache.load::<TestArtifact>(RegionId::new(3)).await.expect_err("corrupt");
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_list_keys_ignores_foreign_files() {
        let (cache, _temp_dir) = create_test_cache().await;
        cache.save(RegionId::new(10), &artifact(10)).await.expect("save");
        cache.save(RegionId::new(2), &artifact(2)).await.expect("save");
        tokio::fs::write(cache.models_dir().join("notes.txt"), b"x").await.expect("write");
        tokio::fs::write(cache.models_dir().join(".abc.tmp"), b"x").await.expect("write");

        let keys: Vec<i64> = cache
            .list_keys()
            .await
            .expect("list")
            .into_iter()
            .map(RegionId::get)
            .collect();
        assert_eq!(keys, vec![2, 10]);
    }

    #[tokio::test]
    async fn test_save_failure_lists_available_regions() {
        let (cache, _temp_dir) = create_test_cache().await;
        cache.save(RegionId::new(1), &artifact(1)).await.expect("save");
        // a directory squatting on the target name makes the rename fail
        tokio::fs::create_dir(cache.artifact_path(RegionId::new(5)))
            .await
            .expect("mkdir");
        tokio::fs::write(cache.artifact_path(RegionId::new(5)).join("child"), b"x")
            .await
            .expect("write");

        let err = cache.save(RegionId::new(5), &artifact(5)).await.expect_err("blocked");
        match err {
            PopframeError::Storage(StorageError::SaveFailed { key, available, .. }) => {
                assert_eq!(key, "5.json");
                assert!(available.contains(&RegionId::new(1)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_region() {
        let (cache, _temp_dir) = create_test_cache().await;
        let region = RegionId::new(8);
        cache.save(region, &artifact(8)).await.expect("save");
        cache.save(RegionId::new(9), &artifact(9)).await.expect("save");

        cache.delete_region(region).await.expect("delete");
        assert!(!cache.exists(region).await);
        assert!(cache.exists(RegionId::new(9)).await);

        // deleting again is a no-op
        cache.delete_region(region).await.expect("second delete");
        cache.delete_region(RegionId::new(404)).await.expect("never cached");
    }
}
