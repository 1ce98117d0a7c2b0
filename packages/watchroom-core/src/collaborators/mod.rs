//! Request/response collaborators reached over HTTP.
//!
//! - [`RoomDirectory`]: room metadata (who owns the room)
//! - [`VideoCatalog`]: hosted catalog listing and external video search

mod http;
mod search;

pub use http::{HttpRoomDirectory, HttpVideoCatalog, ExternalSearchConfig};
pub use search::DebouncedSearch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::VideoCandidate;

/// Errors raised by collaborator calls.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    /// Transport-level failure (connect, timeout).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Server answered with a non-success status.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Response body did not match the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Superseded by a newer request.
    #[error("Request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::HttpStatus(status.as_u16())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Convenient Result alias for collaborator calls.
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Room metadata as stored by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// Entry of the hosted video catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogVideo {
    pub title: String,
    /// Relative to the catalog host.
    #[serde(default, alias = "thumbnail")]
    pub thumbnail_url: String,
    /// Human readable duration, e.g. `"12:04"`.
    #[serde(default, alias = "duration")]
    pub duration_label: String,
}

/// Result of an external video search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalVideo {
    pub id: String,
    pub title: String,
    pub thumbnail_url: String,
}

/// Room metadata lookup.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Fetches metadata of `room_id`; `None` when the room does not exist.
    async fn get_room_info(&self, room_id: &str) -> CollaboratorResult<Option<RoomInfo>>;
}

/// Catalog and search of playable videos.
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Lists the hosted catalog.
    async fn list_catalog_videos(&self) -> CollaboratorResult<Vec<CatalogVideo>>;

    /// Searches an external provider for `term`.
    async fn search_external_videos(&self, term: &str) -> CollaboratorResult<Vec<ExternalVideo>>;

    /// Turns a catalog entry into a playable candidate.
    fn catalog_candidate(&self, video: &CatalogVideo) -> CollaboratorResult<VideoCandidate>;

    /// Turns a search hit into a playable candidate.
    fn external_candidate(&self, video: &ExternalVideo) -> VideoCandidate;
}
