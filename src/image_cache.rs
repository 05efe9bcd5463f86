//! Content-addressed on-disk store for downloaded thumbnails.
//!
//! Each source URL maps to `<md5(url)>.jpg` under the cache root. Entries are
//! written once and never expire; growth is visible via [`ImageCache::disk_usage_bytes`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::error::RenderResult;

const CACHE_EXTENSION: &str = "jpg";

static TEMP_NONCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct ImageCache {
    root: PathBuf,
}

fn hash_url(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

impl ImageCache {
    /// Opens a cache rooted at `root`, creating the directory when missing.
    pub fn new(root: impl Into<PathBuf>) -> RenderResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic cache location for `url`, whether or not it exists yet.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root
            .join(format!("{}.{CACHE_EXTENSION}", hash_url(url)))
    }

    pub async fn lookup(&self, url: &str) -> Option<PathBuf> {
        let path = self.path_for(url);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    /// Reads the cached blob for `url`, if any.
    pub async fn read(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.lookup(url).await?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                debug!("cache read failed path={} error={}", path.display(), error);
                None
            }
        }
    }

    /// Persists `bytes` for `url` atomically and returns the final path.
    ///
    /// Concurrent stores for the same URL are tolerated; the last rename wins.
    pub async fn store(&self, url: &str, bytes: &[u8]) -> RenderResult<PathBuf> {
        let target_path = self.path_for(url);
        let nonce = TEMP_NONCE.fetch_add(1, Ordering::Relaxed);
        let temp_path = target_path.with_extension(format!(
            "{CACHE_EXTENSION}.{}.{nonce}.tmp",
            std::process::id()
        ));
        tokio::fs::write(&temp_path, bytes).await?;
        if let Err(error) = tokio::fs::rename(&temp_path, &target_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(error.into());
        }
        Ok(target_path)
    }

    /// Removes an entry that turned out to be unreadable.
    pub async fn evict(&self, url: &str) {
        let path = self.path_for(url);
        if tokio::fs::remove_file(&path).await.is_ok() {
            debug!("evicted unreadable cache entry path={}", path.display());
        }
    }

    /// Total bytes held by finished cache entries.
    pub fn disk_usage_bytes(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                entry.path().extension().and_then(|ext| ext.to_str()) == Some(CACHE_EXTENSION)
            })
            .filter_map(|entry| entry.metadata().ok())
            .filter(|metadata| metadata.is_file())
            .map(|metadata| metadata.len())
            .sum()
    }
}

#[cfg(test)]
pub(crate) fn unique_temp_dir(test_name: &str) -> PathBuf {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock should be after UNIX_EPOCH")
        .as_nanos();
    std::env::temp_dir().join(format!(
        "cardgrid_{}_{}_{}",
        test_name,
        std::process::id(),
        nanos
    ))
}
