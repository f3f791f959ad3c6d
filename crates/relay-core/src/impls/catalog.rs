//! CatalogRecommender - オフライン用の固定カタログ
//!
//! 外部 API なしで pipeline を動かすための Recommender。
//! seed に含まれないアーティストのアルバムをカタログ順に返す。

use async_trait::async_trait;

use crate::domain::{AlbumDescriptor, RelayError};
use crate::ports::Recommender;

pub struct CatalogRecommender {
    albums: Vec<AlbumDescriptor>,
}

impl CatalogRecommender {
    /// The built-in catalog.
    pub fn new() -> Self {
        Self::with_albums(vec![
            AlbumDescriptor::new("muse", "Muse", "muse-drones", "Drones"),
            AlbumDescriptor::new(
                "marilyn-manson",
                "Marilyn Manson",
                "manson-heaven-upside-down",
                "Heaven Upside Down",
            ),
            AlbumDescriptor::new("deftones", "Deftones", "deftones-gore", "Gore"),
        ])
    }

    pub fn with_albums(albums: Vec<AlbumDescriptor>) -> Self {
        Self { albums }
    }

    pub fn albums(&self) -> &[AlbumDescriptor] {
        &self.albums
    }
}

impl Default for CatalogRecommender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Recommender for CatalogRecommender {
    async fn recommend(
        &self,
        seed_artist_ids: &[String],
        limit: usize,
    ) -> Result<Vec<AlbumDescriptor>, RelayError> {
        Ok(self
            .albums
            .iter()
            .filter(|album| !seed_artist_ids.contains(&album.artist_id))
            .take(limit)
            .cloned()
            .collect())
    }
}
