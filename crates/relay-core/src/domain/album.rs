//! Albums exchanged between the recommender and pipeline rows.

use serde::{Deserialize, Serialize};

use super::record::Facet;

/// An album which has been purchased or recommended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlbumDescriptor {
    pub artist_id: String,
    pub artist_name: String,
    pub album_id: String,
    pub album_name: String,
}

impl AlbumDescriptor {
    pub fn new(
        artist_id: impl Into<String>,
        artist_name: impl Into<String>,
        album_id: impl Into<String>,
        album_name: impl Into<String>,
    ) -> Self {
        Self {
            artist_id: artist_id.into(),
            artist_name: artist_name.into(),
            album_id: album_id.into(),
            album_name: album_name.into(),
        }
    }
}

/// Recommended albums attached to a contact. Append-only, unique by album id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRecommendationFacet {
    #[serde(default)]
    pub album_recommendations: Vec<AlbumDescriptor>,
}

impl AlbumRecommendationFacet {
    /// Append `album` unless an album with the same id is already present.
    /// Returns whether the facet changed.
    pub fn add(&mut self, album: AlbumDescriptor) -> bool {
        if self.contains(&album.album_id) {
            return false;
        }
        self.album_recommendations.push(album);
        true
    }

    pub fn contains(&self, album_id: &str) -> bool {
        self.album_recommendations
            .iter()
            .any(|existing| existing.album_id == album_id)
    }

    pub fn len(&self) -> usize {
        self.album_recommendations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.album_recommendations.is_empty()
    }
}

impl Facet for AlbumRecommendationFacet {
    const NAME: &'static str = "AlbumRecommendationFacet";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_pony() -> AlbumDescriptor {
        AlbumDescriptor::new(
            "6Ghvu1VvMGScGpOUJBAHNH",
            "Deftones",
            "5LEXck3kfixFaA3CqVE7bC",
            "White Pony",
        )
    }

    #[test]
    fn add_appends_new_album() {
        let mut facet = AlbumRecommendationFacet::default();
        assert!(facet.add(white_pony()));
        assert_eq!(facet.len(), 1);
    }

    #[test]
    fn add_is_idempotent_by_album_id() {
        let mut facet = AlbumRecommendationFacet::default();
        facet.add(white_pony());

        let mut renamed = white_pony();
        renamed.album_name = "White Pony (Deluxe)".into();
        assert!(!facet.add(renamed));

        assert_eq!(facet.album_recommendations, vec![white_pony()]);
    }
}
