//! Projection models: how a record becomes (at most) one table row.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{ExpandOptions, Interaction, Record, RelayError};
use crate::table::{DataRow, FieldDataType, FieldDefinition, RowSchema, TableDefinition};

pub trait ProjectionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Schema of the rows this model produces.
    fn schema(&self) -> Arc<RowSchema>;

    /// What to load with each record.
    fn expand(&self) -> ExpandOptions;

    /// Project one record. `None` skips it.
    fn project(&self, record: &Record) -> Result<Option<DataRow>, RelayError>;

    fn definition(&self, table_name: &str) -> TableDefinition {
        TableDefinition::new(table_name, self.schema())
    }
}

/// Projection models by name.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn ProjectionModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the models the music pipeline needs.
    pub fn music() -> Result<Self, RelayError> {
        let mut registry = Self::new();
        registry.register(Arc::new(AlbumRecommendationModel::new()?))?;
        Ok(registry)
    }

    pub fn register(&mut self, model: Arc<dyn ProjectionModel>) -> Result<(), RelayError> {
        let name = model.name().to_string();
        if self.models.contains_key(&name) {
            return Err(RelayError::AlreadyRegistered(name));
        }
        self.models.insert(name, model);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProjectionModel>, RelayError> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::not_found("projection model", name))
    }
}

/// Contact → the artists bought in their latest interaction.
///
/// | field     | type   | kind      |
/// |-----------|--------|-----------|
/// | ContactID | guid   | key       |
/// | Artists   | string | attribute |
///
/// `Artists` holds up to five distinct artist ids, comma separated, in
/// purchase order.
pub struct AlbumRecommendationModel {
    schema: Arc<RowSchema>,
}

impl AlbumRecommendationModel {
    pub const NAME: &'static str = "music.album_recommendation_model.v1";
    pub const CONTACT_ID: &'static str = "ContactID";
    pub const ARTISTS: &'static str = "Artists";
    pub const MAX_ARTISTS: usize = 5;

    pub fn new() -> Result<Self, RelayError> {
        let schema = RowSchema::new(vec![
            FieldDefinition::key(Self::CONTACT_ID, FieldDataType::Guid),
            FieldDefinition::attribute(Self::ARTISTS, FieldDataType::String),
        ])?;
        Ok(Self {
            schema: Arc::new(schema),
        })
    }

    fn latest_interaction(record: &Record) -> Option<&Interaction> {
        record.interactions.iter().max_by_key(|i| i.ended_at)
    }
}

impl ProjectionModel for AlbumRecommendationModel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn schema(&self) -> Arc<RowSchema> {
        Arc::clone(&self.schema)
    }

    fn expand(&self) -> ExpandOptions {
        ExpandOptions::interactions()
    }

    fn project(&self, record: &Record) -> Result<Option<DataRow>, RelayError> {
        let Some(interaction) = Self::latest_interaction(record) else {
            return Ok(None);
        };

        let mut artists: Vec<&str> = Vec::with_capacity(Self::MAX_ARTISTS);
        for purchase in interaction
            .events
            .iter()
            .filter_map(|event| event.as_music_purchase())
        {
            let artist = purchase.album.artist_id.as_str();
            if !artists.contains(&artist) {
                artists.push(artist);
            }
            if artists.len() == Self::MAX_ARTISTS {
                break;
            }
        }
        if artists.is_empty() {
            return Ok(None);
        }

        let row = DataRow::new(self.schema())
            .with(Self::CONTACT_ID, record.id)?
            .with(Self::ARTISTS, artists.join(","))?;
        Ok(Some(row))
    }
}
