//! SpotifyRecommender - Spotify Web API を使う Recommender
//!
//! - client-credentials で token を取得（Basic 認証）
//! - 期限の 60 秒前を切ったら token を取り直す
//! - 非 2xx は `RelayError::Upstream`

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::SpotifyOptions;
use crate::domain::{AlbumDescriptor, RelayError};
use crate::ports::{Clock, Recommender};

const REFRESH_MARGIN_SECS: i64 = 60;
const MARKET: &str = "AU";

#[derive(Debug, Clone)]
struct AccessToken {
    token_type: String,
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + TimeDelta::seconds(REFRESH_MARGIN_SECS)
    }

    fn header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct RecommendationsResponse {
    tracks: Vec<Track>,
}

#[derive(Deserialize)]
struct Track {
    artists: Vec<NamedRef>,
    album: NamedRef,
}

#[derive(Deserialize)]
struct NamedRef {
    id: String,
    name: String,
}

impl Track {
    /// First artist and the track's album. Tracks without artists are skipped.
    fn into_album(self) -> Option<AlbumDescriptor> {
        let artist = self.artists.into_iter().next()?;
        Some(AlbumDescriptor::new(
            artist.id,
            artist.name,
            self.album.id,
            self.album.name,
        ))
    }
}

pub struct SpotifyRecommender {
    http: Client,
    options: SpotifyOptions,
    clock: Arc<dyn Clock>,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyRecommender {
    pub fn new(options: SpotifyOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            http: Client::new(),
            options,
            clock,
            token: Mutex::new(None),
        }
    }

    fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.options.client_id, self.options.client_secret);
        format!("Basic {}", STANDARD.encode(raw))
    }

    async fn ensure_token(&self) -> Result<AccessToken, RelayError> {
        let mut guard = self.token.lock().await;
        let now = self.clock.now();
        if let Some(token) = guard.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.clone());
        }

        debug!("requesting spotify access token");
        let url = format!("{}/api/token", self.options.accounts_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.basic_auth())
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let body: TokenResponse = check_status(response).await?.json().await?;

        let token = AccessToken {
            token_type: body.token_type,
            access_token: body.access_token,
            expires_at: now + TimeDelta::seconds(body.expires_in),
        };
        *guard = Some(token.clone());
        Ok(token)
    }
}

async fn check_status(response: Response) -> Result<Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::Upstream(format!("{status}: {body}")))
}

#[async_trait]
impl Recommender for SpotifyRecommender {
    async fn recommend(
        &self,
        seed_artist_ids: &[String],
        limit: usize,
    ) -> Result<Vec<AlbumDescriptor>, RelayError> {
        let token = self.ensure_token().await?;
        let url = format!(
            "{}/v1/recommendations",
            self.options.service_url.trim_end_matches('/')
        );
        let limit = limit.to_string();
        let seeds = seed_artist_ids.join(",");

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token.header())
            .query(&[
                ("limit", limit.as_str()),
                ("market", MARKET),
                ("seed_artists", seeds.as_str()),
            ])
            .send()
            .await?;
        let body: RecommendationsResponse = check_status(response).await?.json().await?;

        Ok(body.tracks.into_iter().filter_map(Track::into_album).collect())
    }
}
