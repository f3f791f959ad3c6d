//! Task registration specs: what to run, with which options, after what.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::errors::RelayError;
use super::ids::TaskId;
use super::record::RecordQuery;

/// Well-known option keys shared by the pipeline workers.
pub mod keys {
    pub const SCHEMA_NAME: &str = "schema_name";
    pub const TABLE_NAME: &str = "table_name";
    pub const SOURCE_TABLE_NAME: &str = "source_table_name";
    pub const TARGET_TABLE_NAME: &str = "target_table_name";
    pub const PREFIX: &str = "prefix";
    pub const LIMIT: &str = "limit";
    pub const TIME_TO_LIVE_SECS: &str = "time_to_live_secs";
    pub const MODEL: &str = "model";
    pub const CONCURRENCY: &str = "concurrency";
    pub const FAIL_ON_ROW_ERROR: &str = "fail_on_row_error";
}

/// How a task gets its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Seeded from a record-store query and a projection model.
    DataSourceProjection,
    /// Reads tables only (or nothing) and runs a deferred worker.
    DeferredWorker,
}

/// Tagged worker kind. `WorkerFactory` maps each kind to a constructor.
///
/// # 命名規約
/// - `{namespace}.{action}.v{major}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WorkerKind {
    Projection,
    Merge,
    AlbumRecommendation,
    RecommendationFacetStorage,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 4] = [
        WorkerKind::Projection,
        WorkerKind::Merge,
        WorkerKind::AlbumRecommendation,
        WorkerKind::RecommendationFacetStorage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerKind::Projection => "relay.projection.v1",
            WorkerKind::Merge => "relay.merge.v1",
            WorkerKind::AlbumRecommendation => "music.album_recommendation.v1",
            WorkerKind::RecommendationFacetStorage => "music.recommendation_facet_storage.v1",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RelayError::not_found("worker kind", s))
    }
}

impl TryFrom<String> for WorkerKind {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkerKind> for String {
    fn from(kind: WorkerKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Worker-specific configuration: string keys to string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerOptions(BTreeMap<String, String>);

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// A missing required key is a `ValidationError`.
    pub fn required(&self, key: &str) -> Result<&str, RelayError> {
        self.get(key)
            .ok_or_else(|| RelayError::validation(format!("missing required option '{key}'")))
    }

    pub fn parse<T>(&self, key: &str) -> Result<T, RelayError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.required(key)?;
        raw.parse()
            .map_err(|e| RelayError::validation(format!("option '{key}'='{raw}': {e}")))
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, RelayError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(_) => self.parse(key),
            None => Ok(default),
        }
    }

    pub fn duration_secs(&self, key: &str) -> Result<Duration, RelayError> {
        self.parse::<u64>(key).map(Duration::from_secs)
    }

    pub fn extend(&mut self, other: WorkerOptions) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for WorkerOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = WorkerOptions::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}

/// Where a projection task reads its records from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceOptions {
    pub query: RecordQuery,

    /// Records per data-source batch. Each batch becomes one partial table.
    pub max_batch_size: usize,
}

impl DataSourceOptions {
    pub fn new(query: RecordQuery, max_batch_size: usize) -> Self {
        Self {
            query,
            max_batch_size,
        }
    }
}

/// Options for the projection worker of a data-source task.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionWorkerOptions {
    /// Registered projection model name.
    pub model: String,
    pub time_to_live: Duration,
    pub schema_name: String,
    pub model_options: WorkerOptions,
}

impl ProjectionWorkerOptions {
    pub fn into_worker_options(self) -> WorkerOptions {
        let mut options = WorkerOptions::new()
            .with(keys::MODEL, self.model)
            .with(keys::TIME_TO_LIVE_SECS, self.time_to_live.as_secs())
            .with(keys::SCHEMA_NAME, self.schema_name);
        options.extend(self.model_options);
        options
    }
}

/// Options for a deferred (table-to-table) worker.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredWorkerOptions {
    pub worker: WorkerKind,
    pub options: WorkerOptions,
}

impl DeferredWorkerOptions {
    pub fn new(worker: WorkerKind, options: WorkerOptions) -> Self {
        Self { worker, options }
    }

    /// Merge every table starting with `prefix` into `table_name`.
    pub fn merge(
        table_name: impl Into<String>,
        prefix: impl Into<String>,
        time_to_live: Duration,
        schema_name: impl Into<String>,
    ) -> Self {
        Self::new(
            WorkerKind::Merge,
            WorkerOptions::new()
                .with(keys::TABLE_NAME, table_name.into())
                .with(keys::PREFIX, prefix.into())
                .with(keys::TIME_TO_LIVE_SECS, time_to_live.as_secs())
                .with(keys::SCHEMA_NAME, schema_name.into()),
        )
    }
}

/// Everything the registry needs to track and later dispatch a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub worker: WorkerKind,
    pub options: WorkerOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSourceOptions>,
    #[serde(default)]
    pub prerequisites: BTreeSet<TaskId>,
    pub expires_after: Duration,
}

impl TaskSpec {
    pub fn projection(
        data_source: DataSourceOptions,
        worker: ProjectionWorkerOptions,
        prerequisites: impl IntoIterator<Item = TaskId>,
        expires_after: Duration,
    ) -> Self {
        Self {
            kind: TaskKind::DataSourceProjection,
            worker: WorkerKind::Projection,
            options: worker.into_worker_options(),
            data_source: Some(data_source),
            prerequisites: prerequisites.into_iter().collect(),
            expires_after,
        }
    }

    pub fn deferred(
        worker: DeferredWorkerOptions,
        prerequisites: impl IntoIterator<Item = TaskId>,
        expires_after: Duration,
    ) -> Self {
        Self {
            kind: TaskKind::DeferredWorker,
            worker: worker.worker,
            options: worker.options,
            data_source: None,
            prerequisites: prerequisites.into_iter().collect(),
            expires_after,
        }
    }

    /// Structural checks done at registration time.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.expires_after.is_zero() {
            return Err(RelayError::validation("expires_after must be positive"));
        }
        match (self.kind, self.worker, &self.data_source) {
            (TaskKind::DataSourceProjection, WorkerKind::Projection, Some(ds)) => {
                if ds.max_batch_size == 0 {
                    return Err(RelayError::validation("max_batch_size must be positive"));
                }
                Ok(())
            }
            (TaskKind::DataSourceProjection, _, _) => Err(RelayError::validation(
                "a data-source task needs a data source and the projection worker",
            )),
            (TaskKind::DeferredWorker, WorkerKind::Projection, _) => Err(RelayError::validation(
                "the projection worker needs a data source",
            )),
            (TaskKind::DeferredWorker, _, Some(_)) => Err(RelayError::validation(
                "a deferred task does not take a data source",
            )),
            (TaskKind::DeferredWorker, _, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn data_source() -> DataSourceOptions {
        DataSourceOptions::new(RecordQuery::default(), 30)
    }

    fn projection_options() -> ProjectionWorkerOptions {
        ProjectionWorkerOptions {
            model: "music.album_recommendation_model.v1".into(),
            time_to_live: Duration::from_secs(1800),
            schema_name: "recommendation".into(),
            model_options: WorkerOptions::new().with(keys::TABLE_NAME, "contactArtists"),
        }
    }

    #[rstest]
    #[case::projection(WorkerKind::Projection)]
    #[case::merge(WorkerKind::Merge)]
    #[case::recommendation(WorkerKind::AlbumRecommendation)]
    #[case::facet(WorkerKind::RecommendationFacetStorage)]
    fn worker_kind_name_roundtrip(#[case] kind: WorkerKind) {
        assert_eq!(kind.as_str().parse::<WorkerKind>().unwrap(), kind);
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{}\"", kind.as_str()));
    }

    #[test]
    fn unknown_worker_kind_is_not_found() {
        let err = "acme.unknown.v1".parse::<WorkerKind>().unwrap_err();
        assert!(matches!(err, RelayError::NotFound { .. }));
    }

    #[test]
    fn missing_option_is_validation_error() {
        let options = WorkerOptions::new().with(keys::LIMIT, "five");
        assert!(matches!(
            options.required(keys::SCHEMA_NAME),
            Err(RelayError::Validation(_))
        ));
        assert!(matches!(
            options.parse::<usize>(keys::LIMIT),
            Err(RelayError::Validation(_))
        ));
        assert_eq!(options.parse_or(keys::CONCURRENCY, 4usize).unwrap(), 4);
    }

    #[test]
    fn projection_options_flatten_model_options() {
        let options = projection_options().into_worker_options();
        assert_eq!(options.get(keys::TABLE_NAME), Some("contactArtists"));
        assert_eq!(options.get(keys::TIME_TO_LIVE_SECS), Some("1800"));
        assert_eq!(options.get(keys::SCHEMA_NAME), Some("recommendation"));
    }

    #[test]
    fn projection_spec_is_valid() {
        let spec = TaskSpec::projection(
            data_source(),
            projection_options(),
            [],
            Duration::from_secs(600),
        );
        assert!(spec.validate().is_ok());
        assert!(spec.prerequisites.is_empty());
    }

    #[test]
    fn deferred_projection_is_rejected() {
        let spec = TaskSpec::deferred(
            DeferredWorkerOptions::new(WorkerKind::Projection, WorkerOptions::new()),
            [],
            Duration::from_secs(600),
        );
        assert!(matches!(spec.validate(), Err(RelayError::Validation(_))));
    }

    #[test]
    fn zero_expiry_is_rejected() {
        let spec = TaskSpec::deferred(
            DeferredWorkerOptions::merge("final", "partial", Duration::from_secs(60), "s"),
            [],
            Duration::ZERO,
        );
        assert!(matches!(spec.validate(), Err(RelayError::Validation(_))));
    }

    #[test]
    fn spec_roundtrip_json() {
        let spec = TaskSpec::deferred(
            DeferredWorkerOptions::merge("final", "partial", Duration::from_secs(60), "s"),
            [TaskId::from_u128(7)],
            Duration::from_secs(600),
        );
        let json = serde_json::to_string(&spec).unwrap();
        let back: TaskSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
