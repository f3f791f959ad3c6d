//! RecordStore port - customer records and their facets

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::domain::{ExpandOptions, FacetUpdate, Record, RecordQuery, RelayError};

/// Lazily produced batches of query results.
pub type RecordBatches = BoxStream<'static, Result<Vec<Record>, RelayError>>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// `NotFound` when no record has this id.
    async fn get_by_id(&self, id: Uuid, expand: &ExpandOptions) -> Result<Record, RelayError>;

    /// Records matching `query`, in batches of at most `batch_size`.
    fn query(&self, query: &RecordQuery, expand: &ExpandOptions, batch_size: usize)
    -> RecordBatches;

    /// Apply staged facet writes. Facets not defined by the store's model are
    /// rejected with `ValidationError` and nothing is written.
    async fn submit(&self, update: FacetUpdate) -> Result<(), RelayError>;
}
