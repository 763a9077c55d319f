//! Derived layer entries of the artifact cache.

use std::path::PathBuf;

use popframe_core::{DerivedLayer, LayerKind, PopframeResult, RegionId, StorageError};

use super::key::LayerKey;
use super::{list_file_names, remove_if_present, write_atomic, ArtifactCache};

impl ArtifactCache {
    /// Store a derived layer under `{timestamp}_{name}_{region}_{kind}.json`.
    ///
    /// Callers remove the region's stale layers first with
    /// [`ArtifactCache::delete_layers`].
    pub async fn save_layer(&self, name: &str, layer: &DerivedLayer) -> PopframeResult<PathBuf> {
        let key = LayerKey::new(layer.created_at, name, layer.region_id, layer.kind).ok_or_else(|| {
            StorageError::SaveFailed {
                region_id: layer.region_id,
                key: name.to_string(),
                reason: "layer name must not contain '_', '.' or '/'".to_string(),
                available: Vec::new(),
            }
        })?;
        let file_name = key.file_name();

        let bytes = serde_json::to_vec(layer).map_err(|e| self.layer_save_failed(layer, &file_name, e.to_string()))?;
        write_atomic(&self.layers_dir, &file_name, &bytes)
            .await
            .map_err(|reason| self.layer_save_failed(layer, &file_name, reason))?;

        tracing::debug!(region_id = %layer.region_id, kind = %layer.kind, file = %file_name, "Derived layer cached");
        Ok(self.layers_dir.join(file_name))
    }

    /// Layer keys, optionally restricted to one region, oldest first.
    pub async fn list_layers(&self, region_id: Option<RegionId>) -> PopframeResult<Vec<LayerKey>> {
        let mut keys: Vec<LayerKey> = list_file_names(&self.layers_dir)
            .await?
            .iter()
            .filter_map(|name| LayerKey::parse(name))
            .filter(|key| region_id.map_or(true, |id| key.region_id == id))
            .collect();
        keys.sort_by_key(|key| key.created_at);
        Ok(keys)
    }

    /// The newest layer of `kind` for the region, if any.
    pub async fn load_layer(&self, region_id: RegionId, kind: LayerKind) -> PopframeResult<Option<DerivedLayer>> {
        let Some(key) = self
            .list_layers(Some(region_id))
            .await?
            .into_iter()
            .filter(|key| key.kind == kind)
            .last()
        else {
            return Ok(None);
        };

        let path = self.layers_dir.join(key.file_name());
        let load_failed = |reason: String| StorageError::LoadFailed {
            path: path.display().to_string(),
            reason,
        };
        let bytes = tokio::fs::read(&path).await.map_err(|e| load_failed(e.to_string()))?;
        let layer = serde_json::from_slice(&bytes).map_err(|e| load_failed(e.to_string()))?;
        Ok(Some(layer))
    }

    /// Remove every derived layer of the region. Returns how many were removed.
    pub async fn delete_layers(&self, region_id: RegionId) -> PopframeResult<usize> {
        let mut removed = 0;
        for key in self.list_layers(Some(region_id)).await? {
            if remove_if_present(&self.layers_dir.join(key.file_name())).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn layer_save_failed(&self, layer: &DerivedLayer, file_name: &str, reason: String) -> StorageError {
        StorageError::SaveFailed {
            region_id: layer.region_id,
            key: file_name.to_string(),
            reason,
            available: Vec::new(),
        }
    }
}
