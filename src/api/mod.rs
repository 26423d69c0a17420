//! Thin client for the VK audio API.
//!
//! Every call goes through one envelope helper that authenticates the
//! request and surfaces VK-level errors as [`AppError::Api`]. Listings are
//! paged transparently; callers always see the full track list.

use std::time::Duration;

use log::warn;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{AppError, Result};
use crate::resolver::{PlaylistRef, TrackRef};

pub const VK_API_VERSION: &str = "5.199";
const VK_API_BASE: &str = "https://api.vk.com/method";
const PAGE_SIZE: usize = 200;
pub const USER_AGENT: &str = "vk-audio-downloader/1.0";

/// One audio item as reported by the VK API. `url` may be empty for
/// tracks the platform no longer serves.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiTrack {
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub duration: u64,
}

impl ApiTrack {
    pub fn artist_or_unknown(&self) -> &str {
        if self.artist.trim().is_empty() {
            "Unknown Artist"
        } else {
            &self.artist
        }
    }

    pub fn title_or_unknown(&self) -> &str {
        if self.title.trim().is_empty() {
            "Unknown Title"
        } else {
            &self.title
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist_or_unknown(), self.title_or_unknown())
    }
}

#[derive(Debug, Clone)]
pub struct VkClient {
    client: Client,
    token: String,
}

impl VkClient {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            token,
        }
    }

    async fn api_call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", VK_API_BASE, method);
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("access_token", self.token.clone()));
        query.push(("v", VK_API_VERSION.to_string()));

        let response = self.client.get(&url).query(&query).send().await?;
        let data: Value = response.error_for_status()?.json().await?;
        unwrap_envelope(data)
    }

    /// Looks up a single track. An empty response means the track is
    /// removed, private or region-blocked.
    pub async fn get_track(&self, track: &TrackRef) -> Result<ApiTrack> {
        let response = self
            .api_call("audio.getById", &[("audios", track.audio_ref())])
            .await?;
        let first = response
            .as_array()
            .and_then(|items| items.first())
            .cloned()
            .ok_or_else(|| AppError::TrackNotFound(track.audio_ref()))?;
        Ok(serde_json::from_value(first)?)
    }

    pub async fn get_playlist_tracks(&self, playlist: &PlaylistRef) -> Result<Vec<ApiTrack>> {
        let mut params = vec![
            ("owner_id", playlist.owner_id.to_string()),
            ("album_id", playlist.playlist_id.to_string()),
        ];
        if let Some(key) = &playlist.access_key {
            params.push(("access_key", key.clone()));
        }
        self.paged_tracks(params, "playlist").await
    }

    pub async fn get_user_tracks(&self, owner_id: i64) -> Result<Vec<ApiTrack>> {
        self.paged_tracks(vec![("owner_id", owner_id.to_string())], "user audio")
            .await
    }

    /// Best-effort playlist title for logging; failures are swallowed.
    pub async fn get_playlist_title(&self, playlist: &PlaylistRef) -> Option<String> {
        let mut params = vec![
            ("owner_id", playlist.owner_id.to_string()),
            ("playlist_ids", playlist.playlist_id.to_string()),
        ];
        if let Some(key) = &playlist.access_key {
            params.push(("access_key", key.clone()));
        }

        match self.api_call("audio.getPlaylists", &params).await {
            Ok(response) => response["items"]
                .as_array()
                .and_then(|items| items.first())
                .and_then(|item| item["title"].as_str())
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .map(str::to_string),
            Err(err) => {
                warn!("Could not get playlist title: {}", err);
                None
            }
        }
    }

    async fn paged_tracks(
        &self,
        base_params: Vec<(&'static str, String)>,
        what: &str,
    ) -> Result<Vec<ApiTrack>> {
        let mut offset = 0usize;
        let mut total: Option<usize> = None;
        let mut all_tracks = Vec::new();

        loop {
            let mut params = base_params.clone();
            params.push(("offset", offset.to_string()));
            params.push(("count", PAGE_SIZE.to_string()));

            let response = self.api_call("audio.get", &params).await?;
            if total.is_none() {
                total = response["count"].as_u64().map(|count| count as usize);
            }

            let items = match response["items"].as_array() {
                Some(items) if !items.is_empty() => items.clone(),
                _ => break,
            };

            let batch_len = items.len();
            for item in items {
                all_tracks.push(serde_json::from_value(item)?);
            }

            if batch_len < PAGE_SIZE {
                break;
            }
            offset += batch_len;
            if let Some(total) = total {
                if offset >= total {
                    break;
                }
            }
        }

        if all_tracks.is_empty() {
            return Err(AppError::NotFound(format!(
                "{} is empty, inaccessible, or the VK API returned no items",
                what
            )));
        }
        Ok(all_tracks)
    }
}

fn unwrap_envelope(data: Value) -> Result<Value> {
    if let Some(error) = data.get("error") {
        return Err(AppError::Api {
            code: error["error_code"].as_i64().unwrap_or(0),
            message: error["error_msg"]
                .as_str()
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(data["response"].clone())
}
