//! Playlist resolution over the YouTube Data API (v3).

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    domain::{PlaylistContext, PlaylistInfo, VideoRef},
    errors::Error,
    formatting::truncate_chars,
    Result,
};

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com";

/// Playlist-level metadata as returned by the lookup endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub item_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistItem {
    pub video_id: String,
    pub position: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaylistItemsPage {
    pub items: Vec<PlaylistItem>,
    /// Empty when there are no further pages.
    pub next_page_token: String,
}

/// Paginated playlist metadata endpoints.
#[async_trait]
pub trait PlaylistApi: Send + Sync {
    /// All playlists matching `id` (normally exactly one).
    async fn playlists(&self, id: &str) -> Result<Vec<PlaylistSummary>>;
    async fn playlist_items(&self, id: &str, page_token: &str) -> Result<PlaylistItemsPage>;
}

#[derive(Clone)]
pub struct PlaylistResolver {
    api: Arc<dyn PlaylistApi>,
}

impl PlaylistResolver {
    pub fn new(api: Arc<dyn PlaylistApi>) -> Self {
        Self { api }
    }

    pub async fn resolve(&self, id: &str) -> Result<PlaylistInfo> {
        let mut found = self.api.playlists(id).await?;
        if found.is_empty() {
            return Err(Error::Extraction(format!(
                "no playlists found with provided id {id}"
            )));
        }
        if found.len() > 1 {
            return Err(Error::Extraction(format!(
                "more than one ({}) playlists found with provided id {id}",
                found.len()
            )));
        }
        let summary = found.remove(0);
        info!(playlist = %id, title = %summary.title, "playlist found");

        let mut items = Vec::new();
        let mut token = String::new();
        let mut seen_tokens = HashSet::new();
        loop {
            let page = self.api.playlist_items(id, &token).await?;
            debug!(
                playlist = %id,
                items = page.items.len(),
                next = %page.next_page_token,
                "playlist page"
            );
            items.extend(page.items);

            let next = page.next_page_token;
            if next.is_empty() || next == token || !seen_tokens.insert(next.clone()) {
                break;
            }
            token = next;
        }

        let context = Arc::new(PlaylistContext {
            id: id.to_string(),
            title: summary.title.clone(),
            size: items.len(),
        });
        let videos = items
            .into_iter()
            .map(|item| VideoRef {
                id: item.video_id,
                position: Some(item.position),
                playlist: Some(Arc::clone(&context)),
            })
            .collect();

        Ok(PlaylistInfo {
            id: id.to_string(),
            title: summary.title,
            thumbnail_url: summary.thumbnail_url,
            item_count: summary.item_count,
            videos,
        })
    }
}

/// `PlaylistApi` over HTTPS with an API key.
#[derive(Clone, Debug)]
pub struct YoutubeDataApi {
    http: reqwest::Client,
    base_url: String,
    key: String,
    max_results: u32,
    debug: bool,
}

impl YoutubeDataApi {
    pub fn new(key: impl Into<String>, max_results: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("youtube api http client: {e}")))?;
        Ok(Self {
            http,
            base_url: YOUTUBE_API_BASE.to_string(),
            key: key.into(),
            max_results: max_results.max(1),
            debug: false,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.key.as_str())])
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("GET {path}: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Extraction(format!("GET {path} body: {e}")))?;
        if self.debug {
            debug!(path, %status, body = %body, "youtube api response");
        }
        if !status.is_success() {
            return Err(Error::Extraction(format!(
                "GET {path}: status {status}: {}",
                truncate_chars(&body, 200)
            )));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl PlaylistApi for YoutubeDataApi {
    async fn playlists(&self, id: &str) -> Result<Vec<PlaylistSummary>> {
        let resp: PlaylistsResponse = self
            .get_json(
                "/youtube/v3/playlists",
                &[
                    ("part", "snippet,contentDetails".to_string()),
                    ("id", id.to_string()),
                    ("maxResults", self.max_results.to_string()),
                ],
            )
            .await?;
        Ok(resp.into_summaries())
    }

    async fn playlist_items(&self, id: &str, page_token: &str) -> Result<PlaylistItemsPage> {
        let resp: PlaylistItemsResponse = self
            .get_json(
                "/youtube/v3/playlistItems",
                &[
                    ("part", "snippet".to_string()),
                    ("playlistId", id.to_string()),
                    ("maxResults", self.max_results.to_string()),
                    ("pageToken", page_token.to_string()),
                ],
            )
            .await?;
        Ok(resp.into_page())
    }
}

// ============== Wire types ==============

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnails {
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    standard: Option<Thumbnail>,
    maxres: Option<Thumbnail>,
}

impl Thumbnails {
    fn best(&self) -> Option<String> {
        [&self.maxres, &self.standard, &self.high, &self.medium]
            .into_iter()
            .flatten()
            .map(|t| t.url.trim())
            .find(|u| !u.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaylistSnippet {
    title: String,
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlaylistContentDetails {
    item_count: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlaylistResource {
    snippet: PlaylistSnippet,
    content_details: PlaylistContentDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaylistsResponse {
    items: Vec<PlaylistResource>,
}

impl PlaylistsResponse {
    fn into_summaries(self) -> Vec<PlaylistSummary> {
        self.items
            .into_iter()
            .map(|p| PlaylistSummary {
                thumbnail_url: p.snippet.thumbnails.best(),
                title: p.snippet.title,
                item_count: p.content_details.item_count,
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ResourceId {
    video_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlaylistItemSnippet {
    position: u32,
    resource_id: ResourceId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PlaylistItemResource {
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlaylistItemsResponse {
    next_page_token: String,
    items: Vec<PlaylistItemResource>,
}

impl PlaylistItemsResponse {
    fn into_page(self) -> PlaylistItemsPage {
        PlaylistItemsPage {
            next_page_token: self.next_page_token,
            items: self
                .items
                .into_iter()
                .filter(|i| !i.snippet.resource_id.video_id.is_empty())
                .map(|i| PlaylistItem {
                    video_id: i.snippet.resource_id.video_id,
                    position: i.snippet.position,
                })
                .collect(),
        }
    }
}
