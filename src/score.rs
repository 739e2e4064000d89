use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::ApiClient;
use crate::identity::IdentityResolver;
use crate::store::LocalStore;

const SCORE_CACHE_PREFIX: &str = "exploreyou.score";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_points: f64,
    pub total_possible: f64,
    pub score_percent: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreEventOptions {
    pub points_earned: f64,
    pub points_possible: f64,
    pub source: Option<String>,
}

fn cache_key(user_key: &str) -> String {
    format!("{SCORE_CACHE_PREFIX}:{user_key}")
}

/// Score summary reads and score event writes, cached per user.
///
/// A failed write falls back to the cached summary so the caller always has
/// something plausible to show; a failed read degrades to `None`.
pub struct ScoreTracker {
    api: ApiClient,
    identity: Arc<IdentityResolver>,
    store: LocalStore,
    cache_ttl_ms: i64,
}

impl ScoreTracker {
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

    pub async fn fetch_score_summary(&self, force: bool) -> Option<ScoreSummary> {
        let identity = self.identity.resolve_with(force).await;
        if !identity.is_present() {
            return None;
        }
        let user_key = identity.user_key();

        if !force {
            if let Some(user_key) = &user_key {
                if let Some(cached) = self.read_cache(user_key).await {
                    return Some(cached);
                }
            }
        }

        match self.api.get_score_summary(identity.email.as_deref()).await {
            Ok(summary) => {
                if let Some(user_key) = &user_key {
                    self.write_cache(user_key, &summary).await;
                }
                Some(summary)
            }
            Err(err) => {
                warn!("Failed to fetch score summary: {err}");
                None
            }
        }
    }

    pub async fn record_score_event(&self, options: ScoreEventOptions) -> Option<ScoreSummary> {
        let identity = self.identity.resolve().await;
        if !identity.is_present() {
            warn!("No identity available for score recording");
            return None;
        }
        let user_key = identity.user_key();

        let payload = json!({
            "points_earned": options.points_earned.max(0.0),
            "points_possible": options.points_possible.max(0.0),
            "source": options.source,
            "user_email": identity.email,
        });

        match self.api.post_score_event(&payload).await {
            Ok(summary) => {
                if let Some(user_key) = &user_key {
                    self.write_cache(user_key, &summary).await;
                }
                Some(summary)
            }
            Err(err) => {
                warn!("Failed to record score event: {err}");
                match &user_key {
                    Some(user_key) => self.read_cache(user_key).await,
                    None => None,
                }
            }
        }
    }

    async fn read_cache(&self, user_key: &str) -> Option<ScoreSummary> {
        match self
            .store
            .get_json::<ScoreSummary>(&cache_key(user_key))
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                warn!("Score cache read failed: {err}");
                None
            }
        }
    }

    async fn write_cache(&self, user_key: &str, summary: &ScoreSummary) {
        if let Err(err) = self
            .store
            .put_json(&cache_key(user_key), summary, Some(self.cache_ttl_ms))
            .await
        {
            warn!("Score cache write failed: {err}");
        }
    }
}
