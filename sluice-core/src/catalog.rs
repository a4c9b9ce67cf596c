//! Source of live library configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_model::{Library, LibraryId};
use tokio::sync::RwLock;

use crate::error::{Result, SluiceError};

/// Read access to libraries. The core only ever writes `last_scanned`.
#[async_trait]
pub trait LibraryCatalog: Send + Sync {
    async fn list(&self) -> Result<Vec<Library>>;

    async fn get(&self, id: LibraryId) -> Result<Option<Library>>;

    async fn mark_scanned(&self, id: LibraryId, at: DateTime<Utc>) -> Result<()>;
}

/// Catalog held in memory, seeded from configuration.
#[derive(Clone, Default)]
pub struct InMemoryLibraryCatalog {
    libraries: Arc<RwLock<HashMap<LibraryId, Library>>>,
    order: Arc<RwLock<Vec<LibraryId>>>,
}

impl fmt::Debug for InMemoryLibraryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryLibraryCatalog");
        match self.libraries.try_read() {
            Ok(guard) => {
                debug.field("library_count", &guard.len());
            }
            Err(_) => {
                debug.field("libraries", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryLibraryCatalog {
    pub fn new(libraries: impl IntoIterator<Item = Library>) -> Self {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for library in libraries {
            if map.insert(library.id, library.clone()).is_none() {
                order.push(library.id);
            }
        }
        Self {
            libraries: Arc::new(RwLock::new(map)),
            order: Arc::new(RwLock::new(order)),
        }
    }

    /// Insert or replace a library definition.
    pub async fn upsert(&self, library: Library) {
        let mut libraries = self.libraries.write().await;
        let mut order = self.order.write().await;
        if !libraries.contains_key(&library.id) {
            order.push(library.id);
        }
        libraries.insert(library.id, library);
    }

    pub async fn set_enabled(&self, id: LibraryId, enabled: bool) -> Result<()> {
        let mut libraries = self.libraries.write().await;
        let library = libraries
            .get_mut(&id)
            .ok_or_else(|| SluiceError::NotFound(format!("library {id}")))?;
        library.enabled = enabled;
        Ok(())
    }
}

#[async_trait]
impl LibraryCatalog for InMemoryLibraryCatalog {
    async fn list(&self) -> Result<Vec<Library>> {
        let libraries = self.libraries.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| libraries.get(id).cloned())
            .collect())
    }

    async fn get(&self, id: LibraryId) -> Result<Option<Library>> {
        Ok(self.libraries.read().await.get(&id).cloned())
    }

    async fn mark_scanned(&self, id: LibraryId, at: DateTime<Utc>) -> Result<()> {
        let mut libraries = self.libraries.write().await;
        let library = libraries
            .get_mut(&id)
            .ok_or_else(|| SluiceError::NotFound(format!("library {id}")))?;
        library.last_scanned = Some(at);
        Ok(())
    }
}
