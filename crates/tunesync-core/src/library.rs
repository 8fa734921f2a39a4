//! Media library collaborator interface.
//!
//! The library is the durable store of completed downloads and their
//! playlist memberships. The engine only consumes this interface; the
//! durable schema behind it belongs to the host application. An in-memory
//! implementation is provided for wiring and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::catalog::RemoteItem;
use crate::error::{DownloadError, Result};

/// A local playlist a downloaded item can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPlaylist {
    /// Local playlist identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
}

impl LocalPlaylist {
    /// Create a playlist reference.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Durable store of completed items and playlist bindings.
///
/// Registration is not idempotent: callers must not register the same item
/// twice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaLibrary: Send + Sync {
    /// Whether `item_id` is already part of the library.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    async fn exists(&self, item_id: &str) -> Result<bool>;

    /// Register a completed download together with its requested playlists.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is already registered or the store
    /// cannot be written.
    async fn register_completed_item(
        &self,
        item: RemoteItem,
        playlists: Vec<LocalPlaylist>,
    ) -> Result<()>;

    /// Playlists the item was assigned to at registration time.
    ///
    /// Unknown items yield an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    async fn assigned_playlists(&self, item_id: &str) -> Result<Vec<LocalPlaylist>>;
}

/// One registered library entry.
#[derive(Debug, Clone)]
struct LibraryEntry {
    item: RemoteItem,
    playlists: Vec<LocalPlaylist>,
}

/// Memory-backed [`MediaLibrary`].
///
/// Entries do not survive the process; suitable for tests and hosts that
/// provide their own persistence on top.
#[derive(Debug, Default)]
pub struct InMemoryMediaLibrary {
    entries: RwLock<HashMap<String, LibraryEntry>>,
}

impl InMemoryMediaLibrary {
    /// Create an empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered items.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the library holds no items.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl MediaLibrary for InMemoryMediaLibrary {
    async fn exists(&self, item_id: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(item_id))
    }

    async fn register_completed_item(
        &self,
        item: RemoteItem,
        playlists: Vec<LocalPlaylist>,
    ) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&item.id) {
            return Err(DownloadError::Registration {
                item_id: item.id.clone(),
                reason: "item is already registered".to_string(),
            }
            .into());
        }

        debug!("registered {} with {} playlists", item.id, playlists.len());
        entries.insert(item.id.clone(), LibraryEntry { item, playlists });
        Ok(())
    }

    async fn assigned_playlists(&self, item_id: &str) -> Result<Vec<LocalPlaylist>> {
        Ok(self
            .entries
            .read()
            .await
            .get(item_id)
            .map(|entry| entry.playlists.clone())
            .unwrap_or_default())
    }
}
