//! Domain model (IDs, task specs, status, records, bus messages, ...).

pub mod album;
pub mod errors;
pub mod events;
pub mod ids;
pub mod progress;
pub mod record;
pub mod state;
pub mod task;

pub use album::{AlbumDescriptor, AlbumRecommendationFacet};
pub use errors::RelayError;
pub use events::{Ordered, ProgressMessage, RegistrationMessage, StatusChange};
pub use ids::{RequestId, TaskId};
pub use progress::{ProgressSnapshot, ProgressUpdate};
pub use record::{
    ExpandOptions, Facet, FacetUpdate, Interaction, InteractionEvent, MusicPurchaseOutcome,
    Record, RecordModel, RecordQuery,
};
pub use state::TaskStatus;
pub use task::{
    DataSourceOptions, DeferredWorkerOptions, ProjectionWorkerOptions, TaskKind, TaskSpec,
    WorkerKind, WorkerOptions, keys,
};
