//! Model orchestrator.
//!
//! Per region: check the cache; if the artifact is missing, fetch inputs,
//! align them, build, cache, then refresh the derived layers; finally load
//! the artifact back so callers only ever see the persisted form.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::future::join_all;
use popframe_core::{
    align_settlements, DerivedLayer, GraphType, LayerKind, ModelBuilder, OrchestratorConfig,
    PopframeError, PopframeResult, RegionId, RegionInputs, Settlement, TerritoryId,
    ValidationError,
};
use popframe_gateway::RegionDataSource;
use popframe_storage::ArtifactCache;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::coalesce::{follow, BuildCoalescer, Completion, Outcome, Registration};
use crate::publisher::{LayerDescriptor, LayerMetadata, LayerPublisher};

/// A region that failed during a bulk operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionFailure {
    pub region_id: RegionId,
    pub status: u16,
    pub message: String,
}

/// Outcome of `rebuild_all` or `reconcile`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport {
    pub built: Vec<RegionId>,
    pub failed: Vec<RegionFailure>,
    /// Regions on the exclusion list.
    pub skipped: Vec<RegionId>,
}

impl RebuildReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    IfAbsent,
    Force,
}

pub struct ModelOrchestrator<B: ModelBuilder> {
    pipeline: Arc<RegionPipeline<B>>,
    coalescer: Arc<BuildCoalescer>,
}

/// Everything a region computation needs, shared with the task that runs it.
struct RegionPipeline<B: ModelBuilder> {
    source: Arc<dyn RegionDataSource>,
    cache: Arc<ArtifactCache>,
    builder: Arc<B>,
    publisher: Arc<dyn LayerPublisher>,
    config: OrchestratorConfig,
    graph_type: GraphType,
}

impl<B: ModelBuilder> ModelOrchestrator<B> {
    /// # Errors
    ///
    /// Returns a config error if `config` fails validation.
    pub fn new(
        source: Arc<dyn RegionDataSource>,
        cache: Arc<ArtifactCache>,
        builder: Arc<B>,
        publisher: Arc<dyn LayerPublisher>,
        config: OrchestratorConfig,
        graph_type: GraphType,
    ) -> PopframeResult<Self> {
        config.validate()?;
        Ok(Self {
            pipeline: Arc::new(RegionPipeline {
                source,
                cache,
                builder,
                publisher,
                config,
                graph_type,
            }),
            coalescer: Arc::new(BuildCoalescer::new()),
        })
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.pipeline.cache
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.pipeline.config
    }

    pub fn coalescer(&self) -> &BuildCoalescer {
        &self.coalescer
    }

    /// Return the region's cached artifact, building it first if absent.
    ///
    /// A cached region performs no upstream fetch. Whether built now or
    /// earlier, the returned value is always read back from the cache. An
    /// artifact evicted between the build and the read-back is built once
    /// more.
    pub async fn get_or_build(&self, region_id: RegionId) -> PopframeResult<B::Artifact> {
        let cache = &self.pipeline.cache;
        if let Some(artifact) = cache.load_if_present(region_id).await? {
            return Ok(artifact);
        }
        self.run(region_id, Mode::IfAbsent).await?;
        if let Some(artifact) = cache.load_if_present(region_id).await? {
            return Ok(artifact);
        }
        tracing::debug!(%region_id, "Artifact evicted before read-back, building again");
        self.run(region_id, Mode::IfAbsent).await?;
        cache.load(region_id).await
    }

    /// Recompute and re-cache the region even if an artifact exists.
    pub async fn recalculate(&self, region_id: RegionId) -> PopframeResult<()> {
        self.run(region_id, Mode::Force).await
    }

    /// Build every catalog region except the excluded ones, in small
    /// concurrent groups. One region's failure never stops the others.
    ///
    /// # Errors
    ///
    /// Only a failure to list the catalog aborts the operation.
    pub async fn rebuild_all(&self) -> PopframeResult<RebuildReport> {
        let regions = self.pipeline.source.list_regions().await?;
        tracing::info!(regions = regions.len(), "Rebuilding all regions");
        Ok(self.build_regions(regions, Mode::Force).await)
    }

    /// Build the catalog regions that have no cached artifact.
    pub async fn reconcile(&self) -> PopframeResult<RebuildReport> {
        let catalog = self.pipeline.source.list_regions().await?;
        let cached = self.pipeline.cache.list_keys().await?;
        let missing: Vec<RegionId> = catalog.into_iter().filter(|id| !cached.contains(id)).collect();
        tracing::info!(cached = cached.len(), missing = missing.len(), "Reconciling cache with catalog");
        Ok(self.build_regions(missing, Mode::IfAbsent).await)
    }

    /// Regions with a current artifact in the cache.
    pub async fn available_regions(&self) -> PopframeResult<Vec<RegionId>> {
        Ok(self.pipeline.cache.list_keys().await?.into_iter().collect())
    }

    /// Remove the region's artifact and derived layers.
    ///
    /// Waits for an in-flight computation of the region to finish first.
    pub async fn invalidate(&self, region_id: RegionId) -> PopframeResult<()> {
        loop {
            match self.coalescer.register(region_id) {
                Registration::Leader(guard) => {
                    let cache = Arc::clone(&self.pipeline.cache);
                    let task = tokio::spawn(async move {
                        let outcome = cache
                            .delete_region(region_id)
                            .await
                            .map(|()| Completion::Invalidated);
                        guard.complete(&outcome);
                        outcome
                    });
                    return join_leader(task, region_id).await.map(|_| ());
                }
                Registration::Follower(receiver) => {
                    // the computation's own result is irrelevant here
                    let _ = follow(receiver, region_id).await;
                }
            }
        }
    }

    /// The region's current cached derived layer of `kind`.
    pub async fn layer(&self, region_id: RegionId, kind: LayerKind) -> PopframeResult<DerivedLayer> {
        self.pipeline.cache.load_layer(region_id, kind).await?.ok_or_else(|| {
            PopframeError::not_found(
                format!("{} layer for region {} not found", kind, region_id),
                json!({ "region_id": region_id, "kind": kind }),
            )
        })
    }

    /// Where the region's layer of `kind` was published.
    pub async fn describe_layer(&self, region_id: RegionId, kind: LayerKind) -> PopframeResult<LayerDescriptor> {
        let config = &self.pipeline.config;
        self.pipeline
            .publisher
            .describe(&config.workspace, &config.layer_name, region_id, kind)
            .await
    }

    /// Lead or join the region's computation.
    ///
    /// The leader's work is spawned together with its guard, so dropping
    /// this future only stops the wait; followers still get the result.
    async fn run(&self, region_id: RegionId, mode: Mode) -> PopframeResult<()> {
        loop {
            let outcome = match self.coalescer.register(region_id) {
                Registration::Leader(guard) => {
                    let pipeline = Arc::clone(&self.pipeline);
                    let task = tokio::spawn(async move {
                        let outcome = pipeline.lead(region_id, mode).await;
                        guard.complete(&outcome);
                        outcome
                    });
                    join_leader(task, region_id).await
                }
                Registration::Follower(receiver) => follow(receiver, region_id).await,
            };
            match outcome? {
                Completion::Built => return Ok(()),
                // raced with an invalidation; start over
                Completion::Invalidated => continue,
            }
        }
    }

    async fn build_regions(&self, regions: Vec<RegionId>, mode: Mode) -> RebuildReport {
        let mut report = RebuildReport::default();
        let mut targets = Vec::with_capacity(regions.len());
        for region_id in regions {
            if self.pipeline.config.is_excluded(region_id) {
                report.skipped.push(region_id);
            } else {
                targets.push(region_id);
            }
        }

        for group in targets.chunks(self.pipeline.config.rebuild_group_size) {
            let results = join_all(group.iter().map(|id| self.run(*id, mode))).await;
            for (region_id, result) in group.iter().zip(results) {
                match result {
                    Ok(()) => report.built.push(*region_id),
                    Err(e) => {
                        tracing::error!(%region_id, status = e.status_code(), error = %e, "Region build failed");
                        report.failed.push(RegionFailure {
                            region_id: *region_id,
                            status: e.status_code(),
                            message: e.message(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            built = report.built.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Bulk build finished"
        );
        report
    }
}

async fn join_leader(task: JoinHandle<Outcome>, region_id: RegionId) -> Outcome {
    task.await.unwrap_or_else(|e| {
        Err(PopframeError::internal(
            "region computation task failed",
            json!({ "region_id": region_id }),
            json!({ "error": e.to_string() }),
        ))
    })
}

impl<B: ModelBuilder> RegionPipeline<B> {
    async fn lead(&self, region_id: RegionId, mode: Mode) -> PopframeResult<Completion> {
        // another leader may have finished between the caller's check and
        // our registration
        if mode == Mode::IfAbsent && self.cache.exists(region_id).await {
            return Ok(Completion::Built);
        }
        self.compute(region_id).await?;
        Ok(Completion::Built)
    }

    async fn compute(&self, region_id: RegionId) -> PopframeResult<()> {
        let started = Instant::now();
        tracing::info!(%region_id, "Computing region model");

        let inputs = self.fetch_inputs(region_id).await?;
        let settlements = inputs.settlements.len();

        let builder = Arc::clone(&self.builder);
        let artifact = tokio::task::spawn_blocking(move || builder.build(inputs))
            .await
            .map_err(|e| {
                PopframeError::internal(
                    "model build task failed",
                    json!({ "region_id": region_id }),
                    json!({ "error": e.to_string() }),
                )
            })?
            .map_err(|e| {
                PopframeError::internal(
                    "error during model creation",
                    json!({ "region_id": region_id, "settlements": settlements }),
                    json!({ "error": e.to_string() }),
                )
            })?;

        let key = self.cache.save(region_id, &artifact).await?;
        tracing::info!(
            %region_id,
            key = %key,
            settlements,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Region model cached"
        );

        self.refresh_layers(region_id, artifact).await;
        Ok(())
    }

    /// Boundary, populated settlements and the matrix restricted to them.
    async fn fetch_inputs(&self, region_id: RegionId) -> PopframeResult<RegionInputs> {
        let (boundary, settlements, matrix) = tokio::try_join!(
            self.source.get_region_boundary(region_id),
            self.fetch_settlements(region_id),
            self.source.get_matrix(region_id, self.graph_type),
        )?;

        if settlements.is_empty() {
            return Err(ValidationError::EmptySettlements { region_id }.into());
        }
        let ids: Vec<TerritoryId> = settlements.iter().map(|s| s.territory_id).collect();
        let matrix = matrix.restrict_to(&ids).map_err(|e| {
            PopframeError::internal(
                "error during matrix alignment",
                json!({ "region_id": region_id, "settlements": ids }),
                json!({ "error": e.to_string() }),
            )
        })?;
        tracing::debug!(%region_id, settlements = ids.len(), "Inputs aligned");

        Ok(RegionInputs {
            region_id,
            boundary,
            settlements,
            matrix,
        })
    }

    async fn fetch_settlements(&self, region_id: RegionId) -> PopframeResult<Vec<Settlement>> {
        let sites = self.source.get_settlements(region_id).await?;
        let ids: Vec<TerritoryId> = sites.iter().map(|s| s.territory_id).collect();
        let population = self.source.get_population(&ids).await?;
        let settlements = align_settlements(sites, &population);
        tracing::debug!(
            %region_id,
            listed = ids.len(),
            populated = settlements.len(),
            "Settlements loaded"
        );
        Ok(settlements)
    }

    /// Best effort: failures are logged and the cached artifact stays.
    async fn refresh_layers(&self, region_id: RegionId, artifact: B::Artifact) {
        match self.try_refresh_layers(region_id, artifact).await {
            Ok(count) => tracing::info!(%region_id, layers = count, "Derived layers refreshed"),
            Err(e) => tracing::warn!(%region_id, error = %e, "Derived layers not refreshed"),
        }
    }

    async fn try_refresh_layers(&self, region_id: RegionId, artifact: B::Artifact) -> PopframeResult<usize> {
        let builder = Arc::clone(&self.builder);
        let layers = tokio::task::spawn_blocking(move || builder.derive(&artifact))
            .await
            .map_err(|e| {
                PopframeError::internal(
                    "layer derivation task failed",
                    json!({ "region_id": region_id }),
                    json!({ "error": e.to_string() }),
                )
            })??;

        let removed = self.cache.delete_layers(region_id).await?;
        tracing::debug!(%region_id, removed, "Stale derived layers removed");

        let created_at = Utc::now();
        let mut saved = Vec::with_capacity(layers.len());
        for (kind, features) in layers {
            let layer = DerivedLayer {
                region_id,
                kind,
                created_at,
                features,
            };
            let path = self.cache.save_layer(&self.config.layer_name, &layer).await?;
            saved.push((kind, path));
        }

        for (kind, path) in &saved {
            let metadata = LayerMetadata {
                workspace: self.config.workspace.clone(),
                dataset: self.config.layer_name.clone(),
                created_at,
                region_id,
                kind: *kind,
            };
            if let Err(e) = self.publisher.upload(path, &metadata).await {
                tracing::warn!(%region_id, %kind, error = %e, "Layer upload failed");
            }
        }
        Ok(saved.len())
    }
}
