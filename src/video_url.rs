use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::store::LocalStore;

const URL_CACHE_PREFIX: &str = "exploreyou.video-url";
const MIN_CACHE_TTL_SECONDS: u64 = 30;
const PUBLIC_URL_TTL_SECONDS: u64 = 3_600;

/// External object store holding the video files. URL signing and listing
/// live behind this seam.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_signed_url(&self, object_path: &str, ttl_seconds: u64) -> Result<String>;

    /// Unsigned public URL, when the store exposes one.
    fn public_url(&self, object_path: &str) -> Option<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedUrl {
    url: String,
    expires_at: i64,
}

/// Strip the API and bucket prefixes a raw reference may carry and decode
/// it into a bare object path.
fn normalize_object_path(raw: &str) -> String {
    let mut path = raw.to_string();
    if let Some(rest) = path.strip_prefix("/api/") {
        path = format!("/{rest}");
    }
    if let Some(rest) = path
        .strip_prefix("/videos/")
        .or_else(|| path.strip_prefix("videos/"))
    {
        path = rest.to_string();
    }
    let trimmed = path.trim();
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
    percent_decode_str(trimmed).decode_utf8_lossy().into_owned()
}

/// Resolves raw video references to playable URLs via time-limited signed
/// URLs, cached in memory and in the local store so repeated navigations do
/// not regenerate signatures until they are near expiry.
pub struct VideoUrlResolver {
    objects: Arc<dyn ObjectStore>,
    store: LocalStore,
    memory: Mutex<HashMap<String, CachedUrl>>,
    signed_url_ttl_seconds: u64,
    buffer_seconds: u64,
}

impl VideoUrlResolver {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        store: LocalStore,
        signed_url_ttl_seconds: u64,
        buffer_seconds: u64,
    ) -> Self {
        Self {
            objects,
            store,
            memory: Mutex::new(HashMap::new()),
            signed_url_ttl_seconds,
            buffer_seconds,
        }
    }

    /// Resolve a raw reference to a playable URL. Absolute URLs pass
    /// through; everything else is normalized, served from cache when
    /// possible, signed otherwise, with public-URL and caller-supplied
    /// fallbacks behind that.
    pub async fn resolve(&self, raw_url: Option<&str>, fallback: Option<&str>) -> String {
        let fallback_url = fallback.or(raw_url).unwrap_or("").to_string();

        let Some(raw_url) = raw_url else {
            return fallback_url;
        };

        let lowered = raw_url.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return raw_url.to_string();
        }

        let object_path = normalize_object_path(raw_url);
        if object_path.is_empty() {
            return fallback_url;
        }

        if let Some(cached) = self.read_cache(&object_path).await {
            return cached;
        }

        match self
            .objects
            .create_signed_url(&object_path, self.signed_url_ttl_seconds)
            .await
        {
            Ok(signed_url) => {
                let ttl = self
                    .signed_url_ttl_seconds
                    .saturating_sub(self.buffer_seconds);
                self.write_cache(&object_path, &signed_url, ttl).await;
                return signed_url;
            }
            Err(err) => {
                warn!("Failed to create signed URL for {object_path}: {err}");
            }
        }

        if let Some(public_url) = self.objects.public_url(&object_path) {
            self.write_cache(&object_path, &public_url, PUBLIC_URL_TTL_SECONDS)
                .await;
            return public_url;
        }

        fallback_url
    }

    fn memory_guard(&self) -> MutexGuard<'_, HashMap<String, CachedUrl>> {
        match self.memory.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn read_cache(&self, object_path: &str) -> Option<String> {
        let now_ms = Utc::now().timestamp_millis();

        {
            let memory = self.memory_guard();
            if let Some(entry) = memory.get(object_path) {
                if entry.expires_at > now_ms {
                    return Some(entry.url.clone());
                }
            }
        }

        let key = format!("{URL_CACHE_PREFIX}:{object_path}");
        match self.store.get_json::<CachedUrl>(&key).await {
            Ok(Some(entry)) if entry.expires_at > now_ms => {
                let url = entry.url.clone();
                self.memory_guard().insert(object_path.to_string(), entry);
                Some(url)
            }
            Ok(_) => None,
            Err(err) => {
                warn!("Video URL cache read failed: {err}");
                None
            }
        }
    }

    async fn write_cache(&self, object_path: &str, url: &str, ttl_seconds: u64) {
        let ttl_seconds = ttl_seconds.max(MIN_CACHE_TTL_SECONDS);
        let ttl_ms = (ttl_seconds * 1_000) as i64;
        let entry = CachedUrl {
            url: url.to_string(),
            expires_at: Utc::now().timestamp_millis() + ttl_ms,
        };

        self.memory_guard()
            .insert(object_path.to_string(), entry.clone());

        let key = format!("{URL_CACHE_PREFIX}:{object_path}");
        if let Err(err) = self.store.put_json(&key, &entry, Some(ttl_ms)).await {
            warn!("Video URL cache write failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockObjectStore;

    fn resolver(objects: Arc<MockObjectStore>) -> VideoUrlResolver {
        VideoUrlResolver::new(objects, LocalStore::in_memory().unwrap(), 3_600, 60)
    }

    #[test]
    fn normalizes_prefixed_and_encoded_paths() {
        assert_eq!(
            normalize_object_path("/api/videos/Airplane%20Video.mp4"),
            "Airplane Video.mp4"
        );
        assert_eq!(normalize_object_path("videos/intro.mp4"), "intro.mp4");
        assert_eq!(normalize_object_path("/clip.mp4"), "clip.mp4");
    }

    #[tokio::test]
    async fn absolute_urls_pass_through() {
        let objects = Arc::new(MockObjectStore::new());
        let resolver = resolver(objects.clone());

        let url = resolver
            .resolve(Some("https://cdn.example.com/a.mp4"), None)
            .await;
        assert_eq!(url, "https://cdn.example.com/a.mp4");
        assert_eq!(objects.sign_calls(), 0);
    }

    #[tokio::test]
    async fn signs_once_then_serves_from_cache() {
        let objects = Arc::new(MockObjectStore::new());
        objects.set_signed("intro.mp4", "https://signed.example.com/intro");
        let resolver = resolver(objects.clone());

        let first = resolver.resolve(Some("videos/intro.mp4"), None).await;
        let second = resolver.resolve(Some("videos/intro.mp4"), None).await;

        assert_eq!(first, "https://signed.example.com/intro");
        assert_eq!(second, first);
        assert_eq!(objects.sign_calls(), 1);
    }

    #[tokio::test]
    async fn cached_signed_url_expires_buffer_before_the_signature() {
        let objects = Arc::new(MockObjectStore::new());
        objects.set_signed("intro.mp4", "https://signed.example.com/intro");
        let store = LocalStore::in_memory().unwrap();
        let resolver = VideoUrlResolver::new(objects, store.clone(), 3_600, 60);

        let before = Utc::now().timestamp_millis();
        resolver.resolve(Some("videos/intro.mp4"), None).await;
        let after = Utc::now().timestamp_millis();

        let entry: CachedUrl = store
            .get_json("exploreyou.video-url:intro.mp4")
            .await
            .unwrap()
            .unwrap();
        // Cached for ttl minus the safety buffer, not the full signature ttl.
        let ttl_ms = (3_600 - 60) * 1_000;
        assert!(entry.expires_at >= before + ttl_ms);
        assert!(entry.expires_at <= after + ttl_ms);
    }

    #[tokio::test]
    async fn signing_failure_falls_back_to_public_url() {
        let objects = Arc::new(MockObjectStore::new());
        objects.fail_signing();
        objects.set_public("intro.mp4", "https://public.example.com/intro");
        let resolver = resolver(objects.clone());

        let url = resolver.resolve(Some("intro.mp4"), None).await;
        assert_eq!(url, "https://public.example.com/intro");
    }

    #[tokio::test]
    async fn missing_reference_returns_fallback() {
        let objects = Arc::new(MockObjectStore::new());
        let resolver = resolver(objects);

        let url = resolver.resolve(None, Some("/placeholder.mp4")).await;
        assert_eq!(url, "/placeholder.mp4");
    }

    #[tokio::test]
    async fn everything_failing_returns_fallback() {
        let objects = Arc::new(MockObjectStore::new());
        objects.fail_signing();
        let resolver = resolver(objects);

        let url = resolver
            .resolve(Some("intro.mp4"), Some("/placeholder.mp4"))
            .await;
        assert_eq!(url, "/placeholder.mp4");
    }
}
