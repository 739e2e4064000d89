use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::ApiClient;
use crate::identity::IdentityResolver;
use crate::store::LocalStore;

const PROGRESS_CACHE_PREFIX: &str = "exploreyou.progress";

/// Well-known task status values. The field stays a free string on the
/// wire; unknown statuses pass through untouched.
pub mod task_status {
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
    pub const PAUSED: &str = "paused";
}

/// Latest persisted playback state for a (user, video) pair. The server
/// assigns the id and timestamps; the store may retain history but this is
/// not an append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoProgressRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    pub video_id: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub position_seconds: f64,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub stream_selected: Option<String>,
    #[serde(default)]
    pub task_status: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordVideoProgressOptions {
    pub video_id: String,
    pub video_url: Option<String>,
    pub progress: f64,
    pub position_seconds: f64,
    pub duration_seconds: Option<f64>,
    pub stream_selected: Option<String>,
    pub task_status: Option<String>,
    pub event_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchVideoProgressOptions {
    pub video_id: Option<String>,
    pub limit: Option<u32>,
}

pub(crate) fn clamp_progress(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub(crate) fn clamp_seconds(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.max(0.0)
}

fn cache_key(user_key: &str, video_id: &str) -> String {
    format!("{PROGRESS_CACHE_PREFIX}:{user_key}:{video_id}")
}

/// Records video progress events and serves the latest record through a
/// TTL'd per-(user, video) cache. All failures degrade to `None`/empty;
/// telemetry never blocks playback.
pub struct ProgressTracker {
    api: ApiClient,
    identity: Arc<IdentityResolver>,
    store: LocalStore,
    cache_ttl_ms: i64,
}

impl ProgressTracker {
    pub fn new(
        api: ApiClient,
        identity: Arc<IdentityResolver>,
        store: LocalStore,
        cache_ttl_ms: i64,
    ) -> Self {
        Self {
            api,
            identity,
            store,
            cache_ttl_ms,
        }
    }

    /// Submit one progress event. Progress is clamped to [0, 1], position
    /// and duration to >= 0, before transmission. On success the cache for
    /// this (user, video) key holds the server's canonical record.
    pub async fn record_video_progress_event(
        &self,
        options: RecordVideoProgressOptions,
    ) -> Option<VideoProgressRecord> {
        let identity = self.identity.resolve().await;
        if !identity.is_present() {
            warn!("No user identity available for progress tracking");
            return None;
        }

        let payload = json!({
            "user_id": identity.user_id,
            "user_email": identity.email,
            "video_id": options.video_id,
            "video_url": options.video_url,
            "progress": clamp_progress(options.progress),
            "position_seconds": clamp_seconds(options.position_seconds),
            "duration_seconds": options.duration_seconds.map(clamp_seconds),
            "stream_selected": options.stream_selected,
            "task_status": options.task_status,
            "event_name": options.event_name,
            "event_timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        match self.api.post_video_progress(&payload).await {
            Ok(record) => {
                if let Some(user_key) = identity.user_key() {
                    self.write_cache(&user_key, &options.video_id, &record).await;
                }
                Some(record)
            }
            Err(err) => {
                warn!("Failed to record video progress: {err}");
                None
            }
        }
    }

    /// Fetch recent records, newest first. When a video filter is given the
    /// newest record refreshes the cache. Failure yields an empty list.
    pub async fn fetch_video_progress(
        &self,
        options: FetchVideoProgressOptions,
    ) -> Vec<VideoProgressRecord> {
        let identity = self.identity.resolve().await;
        if !identity.is_present() {
            return Vec::new();
        }

        let result = self
            .api
            .get_video_progress(
                identity.user_id.as_deref(),
                identity.email.as_deref(),
                options.video_id.as_deref(),
                options.limit,
            )
            .await;

        match result {
            Ok(records) => {
                if let (Some(video_id), Some(newest)) =
                    (options.video_id.as_deref(), records.first())
                {
                    if let Some(user_key) = identity.user_key() {
                        self.write_cache(&user_key, video_id, newest).await;
                    }
                }
                records
            }
            Err(err) => {
                warn!("Failed to fetch video progress: {err}");
                Vec::new()
            }
        }
    }

    /// Latest known record for a video: cache hit if unexpired, otherwise a
    /// network read written back to the cache. `None` when no record exists
    /// or no identity is available.
    pub async fn fetch_latest_progress_for_video(
        &self,
        video_id: &str,
    ) -> Option<VideoProgressRecord> {
        let identity = self.identity.resolve().await;
        if !identity.is_present() {
            return None;
        }

        if let Some(user_key) = identity.user_key() {
            match self
                .store
                .get_json::<VideoProgressRecord>(&cache_key(&user_key, video_id))
                .await
            {
                Ok(Some(cached)) => return Some(cached),
                Ok(None) => {}
                Err(err) => warn!("Progress cache read failed: {err}"),
            }
        }

        let records = self
            .fetch_video_progress(FetchVideoProgressOptions {
                video_id: Some(video_id.to_string()),
                limit: Some(1),
            })
            .await;
        records.into_iter().next()
    }

    async fn write_cache(&self, user_key: &str, video_id: &str, record: &VideoProgressRecord) {
        if let Err(err) = self
            .store
            .put_json(
                &cache_key(user_key, video_id),
                record,
                Some(self.cache_ttl_ms),
            )
            .await
        {
            warn!("Progress cache write failed: {err}");
        }
    }
}
