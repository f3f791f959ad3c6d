//! Recommender port - 外部レコメンド API

use async_trait::async_trait;

use crate::domain::{AlbumDescriptor, RelayError};

/// Album recommendations seeded by artist ids.
///
/// Implementations return at most `limit` albums. A non-success response from
/// the remote service is `RelayError::Upstream`.
#[async_trait]
pub trait Recommender: Send + Sync {
    async fn recommend(
        &self,
        seed_artist_ids: &[String],
        limit: usize,
    ) -> Result<Vec<AlbumDescriptor>, RelayError>;
}
