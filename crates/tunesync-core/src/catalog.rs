//! Remote catalog API client and wire types.
//!
//! The catalog exposes three paginated JSON endpoints: the caller's
//! playlists, the items of one playlist, and per-item media resolution.
//! Page tokens are opaque; callers loop until no further token is returned.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::error::Result;

/// Immutable descriptor of one remote media item.
///
/// Fetched from the catalog and never mutated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    /// Stable catalog identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Channel or uploader name.
    pub author: String,
    /// Duration in milliseconds.
    pub duration_millis: u64,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Thumbnail image URL.
    pub thumbnail_url: String,
}

/// One remote playlist as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlaylist {
    /// Stable catalog identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Thumbnail image URL.
    #[serde(default)]
    pub thumbnail_url: String,
    /// Number of items the playlist contains.
    #[serde(default)]
    pub item_count: u64,
}

/// One page of the caller's playlists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistPage {
    /// Playlists on this page.
    pub items: Vec<RemotePlaylist>,
    /// Token for the next page, absent on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// One page of a playlist's items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPage {
    /// Items on this page.
    pub items: Vec<RemoteItem>,
    /// Token for the next page, absent on the last page.
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Resolved media location for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMedia {
    /// Direct URL of the audio stream.
    pub media_url: String,
    /// Size of the stream in bytes, when the catalog knows it.
    #[serde(default)]
    pub content_length: Option<u64>,
    /// Whether the content is a live stream (not downloadable).
    #[serde(default)]
    pub live: bool,
}

/// Remote catalog API consumed by the download engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Fetch one page of the caller's playlists.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is unusable.
    async fn playlists_page(&self, page_token: Option<String>) -> Result<PlaylistPage>;

    /// Fetch one page of a playlist's items.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is unusable.
    async fn playlist_items_page(
        &self,
        playlist_id: &str,
        page_token: Option<String>,
    ) -> Result<ItemPage>;

    /// Resolve the media location and liveness of one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item's media metadata is unobtainable.
    async fn resolve_item(&self, item_id: &str) -> Result<ResolvedMedia>;
}

/// Collect the ids of every remote playlist, paginating to exhaustion.
///
/// # Errors
///
/// Returns the first page error; nothing partial is returned.
pub async fn collect_playlist_ids(catalog: &dyn RemoteCatalog) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = catalog.playlists_page(page_token.take()).await?;
        ids.extend(page.items.into_iter().map(|playlist| playlist.id));

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    debug!("collected {} remote playlist ids", ids.len());
    Ok(ids)
}

/// Collect every item of one playlist, paginating to exhaustion.
///
/// # Errors
///
/// Returns the first page error; nothing partial is returned.
pub async fn collect_playlist_items(
    catalog: &dyn RemoteCatalog,
    playlist_id: &str,
) -> Result<Vec<RemoteItem>> {
    let mut items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = catalog
            .playlist_items_page(playlist_id, page_token.take())
            .await?;
        items.extend(page.items);

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    debug!("collected {} items from playlist {playlist_id}", items.len());
    Ok(items)
}

/// HTTP implementation of [`RemoteCatalog`].
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl HttpCatalog {
    /// Create a catalog client for the given API base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, page_size: u32) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, page_size)
    }

    /// Create a catalog client reusing an existing HTTP client.
    #[must_use]
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>, page_size: u32) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            page_size,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RemoteCatalog for HttpCatalog {
    async fn playlists_page(&self, page_token: Option<String>) -> Result<PlaylistPage> {
        let mut query = vec![("maxResults", self.page_size.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json(self.endpoint("playlists"), &query).await
    }

    async fn playlist_items_page(
        &self,
        playlist_id: &str,
        page_token: Option<String>,
    ) -> Result<ItemPage> {
        let mut query = vec![("maxResults", self.page_size.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json(self.endpoint(&format!("playlists/{playlist_id}/items")), &query)
            .await
    }

    async fn resolve_item(&self, item_id: &str) -> Result<ResolvedMedia> {
        self.get_json(self.endpoint(&format!("items/{item_id}/media")), &[])
            .await
    }
}
