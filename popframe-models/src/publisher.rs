//! Layer publisher boundary.
//!
//! Derived layers are uploaded to an external map server after every
//! recomputation, and clients later resolve where a layer was published.
//! The service itself is an external collaborator: this module only fixes
//! the contract and parses the descriptors it returns.

use std::path::Path;

use async_trait::async_trait;
use popframe_core::{LayerKind, PopframeError, PopframeResult, RegionId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Metadata sent along with an uploaded layer file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    pub workspace: String,
    pub dataset: String,
    pub created_at: Timestamp,
    pub region_id: RegionId,
    pub kind: LayerKind,
}

/// Where a published layer lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// `http://host:port` of the map server.
    pub host: String,
    pub workspace: String,
    pub layer: String,
    /// Link returned by the publisher's layer search.
    pub href: String,
}

impl LayerDescriptor {
    /// Parse a layer link such as
    /// `http://maps:8080/geoserver/rest/workspaces/popframe/layers/popframe_42.json`.
    ///
    /// Returns `None` when the link has too few path segments.
    pub fn from_href(href: &str) -> Option<Self> {
        let stem = href.rsplit_once('.').map_or(href, |(stem, _)| stem);
        let parts: Vec<&str> = stem.split('/').skip(2).collect();
        let host = parts.first().filter(|h| !h.is_empty())?;
        let workspace = parts.get(4)?;
        let layer = parts.get(6)?;
        Some(Self {
            host: format!("http://{}", host),
            workspace: workspace.to_string(),
            layer: layer.to_string(),
            href: href.to_string(),
        })
    }

    /// Resolve a search result to exactly one descriptor.
    ///
    /// # Errors
    ///
    /// NotFound for no match, Conflict for more than one, Internal for a
    /// link that cannot be parsed.
    pub fn from_matches(hrefs: &[String], region_id: RegionId, kind: LayerKind) -> PopframeResult<Self> {
        let input = json!({ "region_id": region_id, "kind": kind });
        match hrefs {
            [] => Err(PopframeError::not_found("LAYER_NOT_FOUND", input)),
            [href] => Self::from_href(href).ok_or_else(|| {
                PopframeError::internal("unrecognised layer link", input, json!({ "href": href }))
            }),
            _ => Err(PopframeError::conflict(
                "FOUND_MULTIPLE_LAYERS",
                input,
                json!({ "matches": hrefs }),
            )),
        }
    }
}

/// External layer publishing service.
#[async_trait]
pub trait LayerPublisher: Send + Sync {
    /// Upload one serialized layer file.
    async fn upload(&self, file: &Path, metadata: &LayerMetadata) -> PopframeResult<()>;

    /// Locate the published layer of a region.
    async fn describe(
        &self,
        workspace: &str,
        dataset: &str,
        region_id: RegionId,
        kind: LayerKind,
    ) -> PopframeResult<LayerDescriptor>;
}

/// Publisher used when no map server is configured: uploads are skipped and
/// nothing can be described.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPublisher;

#[async_trait]
impl LayerPublisher for DisabledPublisher {
    async fn upload(&self, file: &Path, metadata: &LayerMetadata) -> PopframeResult<()> {
        tracing::debug!(
            file = %file.display(),
            region_id = %metadata.region_id,
            kind = %metadata.kind,
            "Layer publishing disabled, upload skipped"
        );
        Ok(())
    }

    async fn describe(
        &self,
        _workspace: &str,
        _dataset: &str,
        region_id: RegionId,
        kind: LayerKind,
    ) -> PopframeResult<LayerDescriptor> {
        LayerDescriptor::from_matches(&[], region_id, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HREF: &str = "http://maps.local:8080/geoserver/rest/workspaces/popframe/layers/popframe_42.json";

    #[test]
    fn test_href_parsing() {
        let descriptor = LayerDescriptor::from_href(HREF).expect("parsable");
        assert_eq!(descriptor.host, "http://maps.local:8080");
        assert_eq!(descriptor.workspace, "popframe");
        assert_eq!(descriptor.layer, "popframe_42");
        assert_eq!(descriptor.href, HREF);
    }

    #[test]
    fn test_short_href_is_rejected() {
        assert!(LayerDescriptor::from_href("http://maps.local/geoserver").is_none());
        assert!(LayerDescriptor::from_href("layer.json").is_none());
    }

    #[test]
    fn test_match_count_decides_outcome() {
        let region = RegionId::new(42);
        let kind = LayerKind::Settlements;

        let err = LayerDescriptor::from_matches(&[], region, kind).expect_err("none");
        assert_eq!(err.status_code(), 404);

        let two = vec![HREF.to_string(), HREF.replace("42", "43")];
        let err = LayerDescriptor::from_matches(&two, region, kind).expect_err("two");
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.detail()["matches"].as_array().map(Vec::len), Some(2));

        let one = vec![HREF.to_string()];
        let descriptor = LayerDescriptor::from_matches(&one, region, kind).expect("one");
        assert_eq!(descriptor.layer, "popframe_42");

        let bad = vec!["nonsense".to_string()];
        let err = LayerDescriptor::from_matches(&bad, region, kind).expect_err("bad link");
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_disabled_publisher() {
        let metadata = LayerMetadata {
            workspace: "popframe".to_string(),
            dataset: "popframe".to_string(),
            created_at: chrono::Utc::now(),
            region_id: RegionId::new(1),
            kind: LayerKind::AgglomerationBoundary,
        };
        DisabledPublisher
            .upload(Path::new("/tmp/none.json"), &metadata)
            .await
            .expect("upload is a no-op");
        let err = DisabledPublisher
            .describe("popframe", "popframe", RegionId::new(1), LayerKind::Settlements)
            .await
            .expect_err("nothing published");
        assert!(err.is_not_found());
    }
}
