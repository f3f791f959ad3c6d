//! Customer records as seen through the record-store port.
//!
//! Facets are attached by composition: a record carries a name → JSON map,
//! and the `Facet` trait gives each entry its type. `RecordModel` lists the
//! facet names and event types a store accepts; it is built once at startup
//! and shared by reference.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use super::album::{AlbumDescriptor, AlbumRecommendationFacet};
use super::errors::RelayError;

/// A named, typed attachment on a record.
pub trait Facet: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;
}

/// A purchase of an album at a point-of-sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicPurchaseOutcome {
    pub timestamp: DateTime<Utc>,
    pub currency_code: String,
    pub monetary_value: f64,
    pub album: AlbumDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InteractionEvent {
    MusicPurchaseOutcome(MusicPurchaseOutcome),
    /// Any event the pipeline does not project.
    Other { definition_id: Uuid },
}

impl InteractionEvent {
    pub const MUSIC_PURCHASE_OUTCOME: &'static str = "MusicPurchaseOutcome";

    pub fn event_type(&self) -> &'static str {
        match self {
            InteractionEvent::MusicPurchaseOutcome(_) => Self::MUSIC_PURCHASE_OUTCOME,
            InteractionEvent::Other { .. } => "Other",
        }
    }

    pub fn as_music_purchase(&self) -> Option<&MusicPurchaseOutcome> {
        match self {
            InteractionEvent::MusicPurchaseOutcome(outcome) => Some(outcome),
            InteractionEvent::Other { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_agent: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub events: Vec<InteractionEvent>,
}

/// A customer record (contact).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    facets: HashMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            interactions: Vec::new(),
            facets: HashMap::new(),
        }
    }

    /// Typed facet lookup. `None` when the facet is absent (or not expanded).
    pub fn facet<T: Facet>(&self) -> Result<Option<T>, RelayError> {
        let Some(value) = self.facets.get(T::NAME) else {
            return Ok(None);
        };
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| RelayError::TypeMismatch {
                field: T::NAME.to_string(),
                expected: std::any::type_name::<T>().to_string(),
                found: e.to_string(),
            })
    }

    pub fn facet_value(&self, name: &str) -> Option<&serde_json::Value> {
        self.facets.get(name)
    }

    pub fn facet_names(&self) -> impl Iterator<Item = &str> {
        self.facets.keys().map(String::as_str)
    }

    pub(crate) fn put_facet_value(&mut self, name: String, value: serde_json::Value) {
        self.facets.insert(name, value);
    }

    /// A copy containing only what `expand` asks for.
    pub fn expanded(&self, expand: &ExpandOptions) -> Record {
        let interactions = if expand.interactions {
            self.interactions.clone()
        } else {
            Vec::new()
        };
        let facets = self
            .facets
            .iter()
            .filter(|(name, _)| expand.facets.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Record {
            id: self.id,
            interactions,
            facets,
        }
    }
}

/// What to load alongside a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandOptions {
    #[serde(default)]
    pub interactions: bool,
    #[serde(default)]
    pub facets: BTreeSet<String>,
}

impl ExpandOptions {
    pub fn interactions() -> Self {
        Self {
            interactions: true,
            facets: BTreeSet::new(),
        }
    }

    pub fn facet<T: Facet>() -> Self {
        Self {
            interactions: false,
            facets: BTreeSet::from([T::NAME.to_string()]),
        }
    }
}

/// Data-source predicate: records having at least one interaction with an
/// event of `event_type` that ended after `ended_after`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_after: Option<DateTime<Utc>>,
}

impl RecordQuery {
    /// Music purchases in interactions that ended after `since`.
    pub fn music_purchases_since(since: DateTime<Utc>) -> Self {
        Self {
            event_type: Some(InteractionEvent::MUSIC_PURCHASE_OUTCOME.to_string()),
            ended_after: Some(since),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.interactions.iter().any(|interaction| {
            let recent = self
                .ended_after
                .is_none_or(|since| interaction.ended_at > since);
            let has_event = match &self.event_type {
                Some(event_type) => interaction
                    .events
                    .iter()
                    .any(|event| event.event_type() == event_type),
                None => true,
            };
            recent && has_event
        })
    }
}

/// Staged facet writes, applied atomically per record by `RecordStore::submit`.
#[derive(Debug, Clone, Default)]
pub struct FacetUpdate {
    changes: Vec<FacetChange>,
}

#[derive(Debug, Clone)]
pub struct FacetChange {
    pub record_id: Uuid,
    pub name: String,
    pub value: serde_json::Value,
}

impl FacetUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_facet<T: Facet>(&mut self, record: &Record, facet: &T) -> Result<(), RelayError> {
        let value = serde_json::to_value(facet)
            .map_err(|e| RelayError::validation(format!("facet {}: {e}", T::NAME)))?;
        self.changes.push(FacetChange {
            record_id: record.id,
            name: T::NAME.to_string(),
            value,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn into_changes(self) -> Vec<FacetChange> {
        self.changes
    }
}

/// The schema a record store is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordModel {
    pub name: String,
    pub version: (u32, u32),
    pub facets: BTreeSet<String>,
    pub event_types: BTreeSet<String>,
}

impl RecordModel {
    /// Contacts with music-purchase events and album recommendations.
    pub fn music() -> Self {
        Self {
            name: "music".to_string(),
            version: (1, 0),
            facets: BTreeSet::from([AlbumRecommendationFacet::NAME.to_string()]),
            event_types: BTreeSet::from([InteractionEvent::MUSIC_PURCHASE_OUTCOME.to_string()]),
        }
    }

    pub fn check_facet(&self, name: &str) -> Result<(), RelayError> {
        if self.facets.contains(name) {
            Ok(())
        } else {
            Err(RelayError::validation(format!(
                "facet '{name}' is not defined in model '{}'",
                self.name
            )))
        }
    }
}
