//! # Chart Archive Download
//!
//! Downloads packaged charts over HTTP into a local cache directory.
//!
//! Archives are cached by URL: a chart URL carrying a version is immutable, so a
//! cached archive is reused across passes. Downloads land in a temporary file and
//! are renamed into place, so a partial download never poisons the cache.
//!
//! Reusing an archive refreshes its modification time. After every download,
//! files not used for `max_age` are evicted.

use super::ReleaseError;
use crate::checksum::sha256_hex;
use crate::constants::DEFAULT_ARCHIVE_CACHE_MAX_AGE_SECS;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, info_span, warn, Instrument};

/// Downloads chart archives into `cache_dir`
#[derive(Debug, Clone)]
pub struct ArchivePuller {
    client: reqwest::Client,
    cache_dir: PathBuf,
    max_age: Duration,
}

impl ArchivePuller {
    pub fn new(cache_dir: PathBuf, timeout: Duration) -> Result<Self, ReleaseError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReleaseError::Execution(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            cache_dir,
            max_age: Duration::from_secs(DEFAULT_ARCHIVE_CACHE_MAX_AGE_SECS),
        })
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Path an archive for `url` is cached at
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .map(sanitize_file_name)
            .unwrap_or_else(|| "chart.tgz".to_string());
        let digest = sha256_hex(url.as_bytes());
        self.cache_dir.join(format!("{}-{}", &digest[..12], file_name))
    }

    pub async fn pull(&self, url: &str) -> Result<PathBuf, ReleaseError> {
        let target = self.cache_path(url);
        if is_cached(&target).await {
            debug!("Using cached chart archive at {}", target.display());
            if let Err(e) = touch(&target) {
                warn!("Failed to refresh {}: {}", target.display(), e);
            }
            return Ok(target);
        }

        let span = info_span!("archive.download", archive.url = url);
        let start = Instant::now();
        async move {
            info!("Downloading chart archive from {}", url);

            let response = self.client.get(url).send().await.map_err(|e| {
                warn!("Failed to download chart archive from {}: {}", url, e);
                if e.is_timeout() {
                    ReleaseError::PullTimeout(format!("{url}: {e}"))
                } else {
                    ReleaseError::PullFailed(format!("{url}: {e}"))
                }
            })?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(ReleaseError::ArchiveNotFound(url.to_string()));
            }
            if !status.is_success() {
                return Err(ReleaseError::PullFailed(format!(
                    "{url}: HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )));
            }

            let bytes = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    ReleaseError::PullTimeout(format!("{url}: {e}"))
                } else {
                    ReleaseError::PullFailed(format!("{url}: {e}"))
                }
            })?;

            tokio::fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| ReleaseError::PullFailed(format!("failed to create cache dir: {e}")))?;

            let staging = tempfile::NamedTempFile::new_in(&self.cache_dir)
                .map_err(|e| ReleaseError::PullFailed(format!("failed to create temp file: {e}")))?;
            tokio::fs::write(staging.path(), &bytes)
                .await
                .map_err(|e| ReleaseError::PullFailed(format!("failed to write archive: {e}")))?;
            staging
                .persist(&target)
                .map_err(|e| ReleaseError::PullFailed(format!("failed to store archive: {e}")))?;

            info!(
                "Downloaded chart archive {} ({} bytes) in {}ms",
                target.display(),
                bytes.len(),
                start.elapsed().as_millis()
            );
            self.evict_stale(&target).await;
            Ok(target)
        }
        .instrument(span)
        .await
    }

    /// Remove cache entries unused for longer than `max_age`, except `keep`
    pub async fn evict_stale(&self, keep: &Path) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read archive cache {}: {}", self.cache_dir.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut evicted = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path == keep {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let idle = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if !metadata.is_file() || idle <= self.max_age {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => evicted += 1,
                Err(e) => warn!("Failed to evict {}: {}", path.display(), e),
            }
        }

        if evicted > 0 {
            info!("Evicted {} stale chart archive(s)", evicted);
        }
        evicted
    }
}

/// Mark a cached archive as recently used
fn touch(path: &Path) -> std::io::Result<()> {
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

async fn is_cached(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Keep only characters that are safe in a file name
fn sanitize_file_name(name: &str) -> String {
    let name = name.split(['?', '#']).next().unwrap_or(name);
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn puller() -> ArchivePuller {
        ArchivePuller::new(PathBuf::from("/tmp/charts"), Duration::from_secs(1))
            .expect("client builds")
    }

    #[test]
    fn test_cache_path_keeps_archive_name() {
        let path = puller().cache_path("https://charts.example.com/nginx-1.0.0.tgz");
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.ends_with("-nginx-1.0.0.tgz"), "unexpected name {name}");
        assert!(path.starts_with("/tmp/charts"));
    }

    #[test]
    fn test_cache_path_differs_per_url() {
        let p = puller();
        assert_ne!(
            p.cache_path("https://a.example.com/nginx-1.0.0.tgz"),
            p.cache_path("https://b.example.com/nginx-1.0.0.tgz")
        );
    }

    #[test]
    fn test_sanitize_file_name_strips_query() {
        assert_eq!(sanitize_file_name("nginx-1.0.0.tgz?token=abc"), "nginx-1.0.0.tgz");
        assert_eq!(sanitize_file_name("weird name.tgz"), "weird_name.tgz");
    }

    fn age(path: &Path, by: Duration) {
        let when = SystemTime::now() - by;
        std::fs::File::options()
            .write(true)
            .open(path)
            .and_then(|f| f.set_modified(when))
            .expect("set mtime");
    }

    fn modified(path: &Path) -> SystemTime {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .expect("mtime")
    }

    #[tokio::test]
    async fn test_evicts_only_stale_archives() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = ArchivePuller::new(dir.path().to_path_buf(), Duration::from_secs(1))
            .expect("client builds")
            .with_max_age(Duration::from_secs(3_600));

        let stale = dir.path().join("aaaa-nginx-0.9.0.tgz");
        let fresh = dir.path().join("bbbb-nginx-1.0.0.tgz");
        let kept = dir.path().join("cccc-redis-2.0.0.tgz");
        for path in [&stale, &fresh, &kept] {
            std::fs::write(path, b"archive").expect("write");
        }
        age(&stale, Duration::from_secs(7_200));
        age(&kept, Duration::from_secs(7_200));

        assert_eq!(p.evict_stale(&kept).await, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_cache_hit_refreshes_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = ArchivePuller::new(dir.path().to_path_buf(), Duration::from_millis(10))
            .expect("client builds");
        let url = "http://127.0.0.1:9/nginx-1.0.0.tgz";
        let path = p.cache_path(url);
        std::fs::write(&path, b"archive").expect("write cache");
        age(&path, Duration::from_secs(2 * DEFAULT_ARCHIVE_CACHE_MAX_AGE_SECS));

        p.pull(url).await.expect("cache hit");
        let idle = SystemTime::now()
            .duration_since(modified(&path))
            .unwrap_or_default();
        assert!(idle < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_cached_archive_is_reused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let p = ArchivePuller::new(dir.path().to_path_buf(), Duration::from_millis(10))
            .expect("client builds");
        let url = "http://127.0.0.1:9/nginx-1.0.0.tgz";
        tokio::fs::write(p.cache_path(url), b"archive")
            .await
            .expect("write cache");
        assert_eq!(p.pull(url).await, Ok(p.cache_path(url)));
    }
}
