//! The `MediaFetcher` collaborator contract.
//!
//! File caching itself is out of scope; this trait exists so the enricher
//! has a single seam to ensure a remote media reference has a local path.
//! Shaped after the teacher's `ToolHandler` trait (`mneme_core::tools`):
//! a small `Send + Sync` async trait with one entry point, implementors
//! swapped in by the composition root.

use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Record,
    File,
}

#[derive(Debug, Clone)]
pub struct CachedMedia {
    pub path: PathBuf,
    pub cache_path: PathBuf,
    pub file_size: Option<u64>,
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn ensure_cached(&self, url: &str, kind: MediaKind) -> anyhow::Result<CachedMedia>;
}

/// No local cache: echoes the remote reference back as both `path` and
/// `cache_path`. Used when no real media fetcher has been wired in.
pub struct NullMediaFetcher;

#[async_trait]
impl MediaFetcher for NullMediaFetcher {
    async fn ensure_cached(&self, url: &str, _kind: MediaKind) -> anyhow::Result<CachedMedia> {
        Ok(CachedMedia {
            path: PathBuf::from(url),
            cache_path: PathBuf::from(url),
            file_size: None,
        })
    }
}

#[cfg(test)]
pub(crate) struct InMemoryMediaFetcher {
    pub(crate) entries: std::collections::HashMap<String, CachedMedia>,
}

#[cfg(test)]
#[async_trait]
impl MediaFetcher for InMemoryMediaFetcher {
    async fn ensure_cached(&self, url: &str, _kind: MediaKind) -> anyhow::Result<CachedMedia> {
        self.entries
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no cached entry for {url}"))
    }
}
