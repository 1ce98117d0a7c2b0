//! `reqwest` implementations of the collaborator traits.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::{
    CatalogVideo, CollaboratorError, CollaboratorResult, ExternalVideo, RoomDirectory, RoomInfo,
    VideoCatalog,
};
use crate::state::VideoCandidate;

/// Timeout applied to every collaborator request.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Page size requested from the external search provider.
const SEARCH_MAX_RESULTS: u32 = 20;

/// Watch page of external search hits.
const EXTERNAL_WATCH_URL: &str = "https://www.youtube.com/watch?v=";

fn build_client() -> CollaboratorResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(CollaboratorError::from)
}

fn parse_base(base_url: &str) -> CollaboratorResult<Url> {
    let mut base = Url::parse(base_url).map_err(|e| CollaboratorError::Http(e.to_string()))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn join(base: &Url, path: &str) -> CollaboratorResult<Url> {
    base.join(path)
        .map_err(|e| CollaboratorError::Http(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Room Directory
// ─────────────────────────────────────────────────────────────────────────────

/// Room directory served under `{base}/api/rooms/{id}`.
#[derive(Clone)]
pub struct HttpRoomDirectory {
    client: Client,
    base: Url,
}

impl HttpRoomDirectory {
    /// Creates a directory client for the relay at `base_url` (e.g. `http://host:port`).
    pub fn new(base_url: &str) -> CollaboratorResult<Self> {
        Ok(Self {
            client: build_client()?,
            base: parse_base(base_url)?,
        })
    }

    /// Creates a room owned by `owner_id`.
    pub async fn create_room(&self, owner_id: &str) -> CollaboratorResult<RoomInfo> {
        let url = join(&self.base, "api/rooms")?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "ownerId": owner_id }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    async fn get_room_info(&self, room_id: &str) -> CollaboratorResult<Option<RoomInfo>> {
        let mut url = join(&self.base, "api/rooms/")?;
        url.path_segments_mut()
            .map_err(|_| CollaboratorError::Http("base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .push(room_id);

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.json().await?))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Video Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Credentials of the external search provider.
#[derive(Debug, Clone)]
pub struct ExternalSearchConfig {
    /// Search endpoint, e.g. `https://www.googleapis.com/youtube/v3/search`.
    pub endpoint: String,
    pub api_key: String,
}

/// Catalog served under `{base}/video/list` with playable files at
/// `{base}/video/play/{title}`, plus optional external search.
#[derive(Clone)]
pub struct HttpVideoCatalog {
    client: Client,
    base: Url,
    search: Option<ExternalSearchConfig>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: SearchSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Deserialize)]
struct SearchSnippet {
    title: String,
    #[serde(default)]
    thumbnails: SearchThumbnails,
}

#[derive(Deserialize, Default)]
struct SearchThumbnails {
    #[serde(default)]
    medium: Option<SearchThumbnail>,
}

#[derive(Deserialize)]
struct SearchThumbnail {
    url: String,
}

impl HttpVideoCatalog {
    pub fn new(base_url: &str, search: Option<ExternalSearchConfig>) -> CollaboratorResult<Self> {
        Ok(Self {
            client: build_client()?,
            base: parse_base(base_url)?,
            search,
        })
    }

    fn parse_search(body: SearchResponse) -> Vec<ExternalVideo> {
        body.items
            .into_iter()
            .filter_map(|item| {
                let id = item.id.video_id?;
                Some(ExternalVideo {
                    id,
                    title: item.snippet.title,
                    thumbnail_url: item
                        .snippet
                        .thumbnails
                        .medium
                        .map(|t| t.url)
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl VideoCatalog for HttpVideoCatalog {
    async fn list_catalog_videos(&self) -> CollaboratorResult<Vec<CatalogVideo>> {
        let url = join(&self.base, "video/list")?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }

    async fn search_external_videos(&self, term: &str) -> CollaboratorResult<Vec<ExternalVideo>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let Some(search) = &self.search else {
            log::debug!("[Catalog] External search not configured");
            return Ok(Vec::new());
        };

        let mut url =
            Url::parse(&search.endpoint).map_err(|e| CollaboratorError::Http(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("part", "snippet")
            .append_pair("type", "video")
            .append_pair("q", term)
            .append_pair("key", &search.api_key)
            .append_pair("maxResults", &SEARCH_MAX_RESULTS.to_string());

        let response = self.client.get(url).send().await?.error_for_status()?;
        let body: SearchResponse = response.json().await?;
        Ok(Self::parse_search(body))
    }

    fn catalog_candidate(&self, video: &CatalogVideo) -> CollaboratorResult<VideoCandidate> {
        let mut source = self.base.clone();
        source
            .path_segments_mut()
            .map_err(|_| CollaboratorError::Http("base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .extend(["video", "play", video.title.as_str()]);

        let thumbnail = if video.thumbnail_url.is_empty() {
            String::new()
        } else {
            join(&self.base, video.thumbnail_url.trim_start_matches('/'))?.to_string()
        };

        Ok(VideoCandidate::new(&video.title, source.to_string(), thumbnail))
    }

    fn external_candidate(&self, video: &ExternalVideo) -> VideoCandidate {
        VideoCandidate::new(
            &video.title,
            format!("{}{}", EXTERNAL_WATCH_URL, video.id),
            &video.thumbnail_url,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_candidate_encodes_title() {
        let catalog = HttpVideoCatalog::new("http://relay.local:8080", None).unwrap();
        let candidate = catalog
            .catalog_candidate(&CatalogVideo {
                title: "My Film.mp4".into(),
                thumbnail_url: "/thumbs/my-film.jpg".into(),
                duration_label: "1:02:00".into(),
            })
            .unwrap();

        assert_eq!(
            candidate.source_url,
            "http://relay.local:8080/video/play/My%20Film.mp4"
        );
        assert_eq!(
            candidate.thumbnail_url,
            "http://relay.local:8080/thumbs/my-film.jpg"
        );
    }

    #[test]
    fn catalog_video_accepts_short_field_names() {
        let video: CatalogVideo =
            serde_json::from_str(r#"{"title":"a.mp4","thumbnail":"/t/a.jpg","duration":"3:10"}"#)
                .unwrap();
        assert_eq!(video.thumbnail_url, "/t/a.jpg");
        assert_eq!(video.duration_label, "3:10");
    }

    #[test]
    fn search_response_skips_non_video_hits() {
        let body: SearchResponse = serde_json::from_str(
            r#"{"items":[
                {"id":{"videoId":"abc"},"snippet":{"title":"Clip","thumbnails":{"medium":{"url":"https://i/abc.jpg"}}}},
                {"id":{"channelId":"zzz"},"snippet":{"title":"Channel"}}
            ]}"#,
        )
        .unwrap();
        let hits = HttpVideoCatalog::parse_search(body);
        assert_eq!(
            hits,
            vec![ExternalVideo {
                id: "abc".into(),
                title: "Clip".into(),
                thumbnail_url: "https://i/abc.jpg".into(),
            }]
        );
    }

    #[test]
    fn external_candidate_points_at_watch_page() {
        let catalog = HttpVideoCatalog::new("http://relay.local", None).unwrap();
        let candidate = catalog.external_candidate(&ExternalVideo {
            id: "abc".into(),
            title: "Clip".into(),
            thumbnail_url: String::new(),
        });
        assert_eq!(candidate.source_url, "https://www.youtube.com/watch?v=abc");
    }

    #[tokio::test]
    async fn empty_search_term_short_circuits() {
        let catalog = HttpVideoCatalog::new("http://relay.local", None).unwrap();
        assert!(catalog.search_external_videos("   ").await.unwrap().is_empty());
    }
}
