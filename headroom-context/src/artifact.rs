//! Content-addressed storage for externalized payloads

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::ContextError;

/// Identifier for a stored artifact
///
/// Keys derived with [`ArtifactKey::for_content`] are content-addressed:
/// the same payload always derives the same key, so duplicate
/// externalizations deduplicate for free.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Derive a key from payload content (SHA-256, hex-encoded)
    pub fn for_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an explicit key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key/value store for externalized payloads
///
/// Storing under an existing key overwrites the prior content. The store is
/// long-lived and shared across pipeline runs; implementations must support
/// concurrent callers. Retention is an external concern: this library never
/// deletes artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store content under a key, overwriting any prior content
    async fn store(&self, key: &ArtifactKey, content: &str) -> Result<(), ContextError>;

    /// Whether a key is present
    async fn exists(&self, key: &ArtifactKey) -> bool;

    /// Fetch the content for a key, if present
    async fn retrieve(&self, key: &ArtifactKey) -> Result<Option<String>, ContextError>;
}

/// In-memory artifact store
///
/// Suitable for tests and short-lived processes; data is lost when the
/// process stops. Production deployments back the [`ArtifactStore`] trait
/// with persistent storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    artifacts: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts
    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, key: &ArtifactKey, content: &str) -> Result<(), ContextError> {
        trace!("Storing artifact {}", key);
        let mut artifacts = self.artifacts.write().await;
        let replaced = artifacts
            .insert(key.as_str().to_string(), content.to_string())
            .is_some();
        debug!("Stored artifact {} (replaced: {})", key, replaced);
        Ok(())
    }

    async fn exists(&self, key: &ArtifactKey) -> bool {
        self.artifacts.read().await.contains_key(key.as_str())
    }

    async fn retrieve(&self, key: &ArtifactKey) -> Result<Option<String>, ContextError> {
        trace!("Retrieving artifact {}", key);
        Ok(self.artifacts.read().await.get(key.as_str()).cloned())
    }
}
