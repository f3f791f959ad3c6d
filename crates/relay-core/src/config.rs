//! Runtime settings.
//!
//! Loaded from an optional JSON file; any field left out takes its default.
//! A few `RELAY_*` environment variables override the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::domain::RelayError;

pub const ENV_SPOTIFY_CLIENT_ID: &str = "RELAY_SPOTIFY_CLIENT_ID";
pub const ENV_SPOTIFY_CLIENT_SECRET: &str = "RELAY_SPOTIFY_CLIENT_SECRET";
pub const ENV_WORKER_COUNT: &str = "RELAY_WORKER_COUNT";

fn default_schema_name() -> String {
    "recommendation".to_string()
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_storage_ttl_secs() -> u64 {
    1800
}

fn default_recommendation_limit() -> usize {
    5
}

fn default_interaction_window_mins() -> i64 {
    15
}

fn default_max_batch_size() -> usize {
    30
}

fn default_worker_count() -> usize {
    2
}

fn default_handler_lanes() -> usize {
    4
}

fn default_recommender_concurrency() -> usize {
    4
}

fn default_ack_timeout_secs() -> u64 {
    60
}

fn default_reaper_interval_ms() -> u64 {
    1000
}

fn default_gc_interval_ms() -> u64 {
    30_000
}

fn default_service_url() -> String {
    "https://api.spotify.com".to_string()
}

fn default_accounts_url() -> String {
    "https://accounts.spotify.com".to_string()
}

/// Credentials and endpoints for the Spotify Web API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyOptions {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_service_url")]
    pub service_url: String,
    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,
}

impl Default for SpotifyOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            service_url: default_service_url(),
            accounts_url: default_accounts_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Table-store schema shared by the pipeline stages.
    #[serde(default = "default_schema_name")]
    pub schema_name: String,

    /// `expires_after` of each pipeline task.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Time to live of intermediate tables.
    #[serde(default = "default_storage_ttl_secs")]
    pub storage_ttl_secs: u64,

    #[serde(default = "default_recommendation_limit")]
    pub recommendation_limit: usize,

    /// Only interactions that ended within this window are projected.
    #[serde(default = "default_interaction_window_mins")]
    pub interaction_window_mins: i64,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Handler lanes per bus topic.
    #[serde(default = "default_handler_lanes")]
    pub handler_lanes: usize,

    #[serde(default = "default_recommender_concurrency")]
    pub recommender_concurrency: usize,

    #[serde(default = "default_ack_timeout_secs")]
    pub registration_timeout_secs: u64,

    #[serde(default = "default_ack_timeout_secs")]
    pub progress_timeout_secs: u64,

    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,

    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,

    /// Without it the offline catalog recommender is used.
    #[serde(default)]
    pub spotify: Option<SpotifyOptions>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            schema_name: default_schema_name(),
            task_timeout_secs: default_task_timeout_secs(),
            storage_ttl_secs: default_storage_ttl_secs(),
            recommendation_limit: default_recommendation_limit(),
            interaction_window_mins: default_interaction_window_mins(),
            max_batch_size: default_max_batch_size(),
            worker_count: default_worker_count(),
            handler_lanes: default_handler_lanes(),
            recommender_concurrency: default_recommender_concurrency(),
            registration_timeout_secs: default_ack_timeout_secs(),
            progress_timeout_secs: default_ack_timeout_secs(),
            reaper_interval_ms: default_reaper_interval_ms(),
            gc_interval_ms: default_gc_interval_ms(),
            spotify: None,
        }
    }
}

impl RelayConfig {
    /// Read `path` (if given), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, RelayError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, RelayError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, RelayError> {
        serde_json::from_str(raw).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Apply overrides from `lookup` (the environment, in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = lookup(ENV_SPOTIFY_CLIENT_ID);
        let client_secret = lookup(ENV_SPOTIFY_CLIENT_SECRET);
        if client_id.is_some() || client_secret.is_some() {
            let spotify = self.spotify.get_or_insert_with(SpotifyOptions::default);
            if let Some(id) = client_id {
                spotify.client_id = id;
            }
            if let Some(secret) = client_secret {
                spotify.client_secret = secret;
            }
        }
        if let Some(raw) = lookup(ENV_WORKER_COUNT) {
            self.worker_count = raw
                .parse()
                .map_err(|e| RelayError::Config(format!("{ENV_WORKER_COUNT}='{raw}': {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        let positive = [
            ("task_timeout_secs", self.task_timeout_secs as usize),
            ("storage_ttl_secs", self.storage_ttl_secs as usize),
            ("recommendation_limit", self.recommendation_limit),
            ("max_batch_size", self.max_batch_size),
            ("worker_count", self.worker_count),
            ("handler_lanes", self.handler_lanes),
            ("recommender_concurrency", self.recommender_concurrency),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(RelayError::Config(format!("{name} must be positive")));
        }
        if let Some(spotify) = &self.spotify
            && (spotify.client_id.is_empty() || spotify.client_secret.is_empty())
        {
            return Err(RelayError::Config(
                "spotify needs both client_id and client_secret".into(),
            ));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn storage_ttl(&self) -> Duration {
        Duration::from_secs(self.storage_ttl_secs)
    }

    pub fn interaction_window(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::minutes(self.interaction_window_mins)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }

    pub fn progress_timeout(&self) -> Duration {
        Duration::from_secs(self.progress_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}
