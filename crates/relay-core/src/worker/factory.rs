//! WorkerFactory - WorkerKind → constructor
//!
//! # 内部実装
//! - `HashMap<WorkerKind, WorkerConstructor>` で管理
//! - 二重登録は `AlreadyRegistered`
//! - 未登録の kind は `NotFound`

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    DeferredWorker, FacetStorageWorker, MergeWorker, ModelRegistry, ProjectionWorker,
    RecommendationWorker,
};
use crate::domain::{RelayError, TaskSpec, WorkerKind};
use crate::ports::{Recommender, RecordStore};
use crate::table::TableStoreFactory;

pub type WorkerConstructor =
    Arc<dyn Fn(&TaskSpec) -> Result<Box<dyn DeferredWorker>, RelayError> + Send + Sync>;

/// Shared collaborators captured by the pipeline worker constructors.
#[derive(Clone)]
pub struct WorkerDeps {
    pub tables: Arc<dyn TableStoreFactory>,
    pub records: Arc<dyn RecordStore>,
    pub recommender: Arc<dyn Recommender>,
    pub models: Arc<ModelRegistry>,
}

#[derive(Default)]
pub struct WorkerFactory {
    constructors: HashMap<WorkerKind, WorkerConstructor>,
}

impl WorkerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with all four pipeline workers registered.
    pub fn with_pipeline_workers(deps: WorkerDeps) -> Result<Self, RelayError> {
        let mut factory = Self::new();

        let d = deps.clone();
        factory.register(WorkerKind::Projection, move |spec| {
            let worker = ProjectionWorker::from_spec(
                spec,
                Arc::clone(&d.records),
                Arc::clone(&d.tables),
                &d.models,
            )?;
            Ok(Box::new(worker) as Box<dyn DeferredWorker>)
        })?;

        let d = deps.clone();
        factory.register(WorkerKind::Merge, move |spec| {
            let worker = MergeWorker::from_options(&spec.options, Arc::clone(&d.tables))?;
            Ok(Box::new(worker) as Box<dyn DeferredWorker>)
        })?;

        let d = deps.clone();
        factory.register(WorkerKind::AlbumRecommendation, move |spec| {
            let worker = RecommendationWorker::from_options(
                &spec.options,
                Arc::clone(&d.tables),
                Arc::clone(&d.recommender),
            )?;
            Ok(Box::new(worker) as Box<dyn DeferredWorker>)
        })?;

        let d = deps;
        factory.register(WorkerKind::RecommendationFacetStorage, move |spec| {
            let worker = FacetStorageWorker::from_options(
                &spec.options,
                Arc::clone(&d.tables),
                Arc::clone(&d.records),
            )?;
            Ok(Box::new(worker) as Box<dyn DeferredWorker>)
        })?;

        Ok(factory)
    }

    pub fn register<F>(&mut self, kind: WorkerKind, constructor: F) -> Result<(), RelayError>
    where
        F: Fn(&TaskSpec) -> Result<Box<dyn DeferredWorker>, RelayError> + Send + Sync + 'static,
    {
        if self.constructors.contains_key(&kind) {
            return Err(RelayError::AlreadyRegistered(kind.to_string()));
        }
        self.constructors.insert(kind, Arc::new(constructor));
        Ok(())
    }

    /// Build a fresh worker for `spec`. Option errors surface here.
    pub fn create(&self, spec: &TaskSpec) -> Result<Box<dyn DeferredWorker>, RelayError> {
        let constructor = self
            .constructors
            .get(&spec.worker)
            .ok_or_else(|| RelayError::not_found("worker", spec.worker.to_string()))?;
        constructor(spec)
    }

    pub fn registered_kinds(&self) -> Vec<WorkerKind> {
        let mut kinds: Vec<_> = self.constructors.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
