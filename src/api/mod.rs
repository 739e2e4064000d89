use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cursor::CursorDwellUpdate;
use crate::progress::VideoProgressRecord;
use crate::score::ScoreSummary;
use crate::session::QueuedEvent;

mod transport;

pub use transport::{HttpTransport, Transport};

#[derive(Debug, Deserialize)]
struct StartSessionResponse {
    id: String,
}

/// Typed client for the telemetry HTTP surface.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn start_page_session(&self, page: &str) -> Result<String> {
        let body = json!({ "page": page });
        let value = self.transport.post_json("/page-sessions/start", &body).await?;
        let response: StartSessionResponse =
            serde_json::from_value(value).context("malformed page session start response")?;
        Ok(response.id)
    }

    pub async fn post_events_batch(&self, session_id: &str, events: &[QueuedEvent]) -> Result<()> {
        let body = json!({ "events": events });
        self.transport
            .post_json(&format!("/page-sessions/{session_id}/events-batch"), &body)
            .await
            .map(|_| ())
    }

    pub async fn post_cursor_dwell(
        &self,
        session_id: &str,
        items: &[CursorDwellUpdate],
    ) -> Result<()> {
        let body = json!({ "items": items });
        self.transport
            .post_json(&format!("/page-sessions/{session_id}/cursor-dwell"), &body)
            .await
            .map(|_| ())
    }

    /// End a page session. With `use_beacon`, the teardown-surviving channel
    /// is tried first; an unsupported or failed beacon falls through to the
    /// ordinary write.
    pub async fn end_page_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        duration_seconds: Option<i64>,
        use_beacon: bool,
    ) -> Result<()> {
        let path = format!("/page-sessions/{session_id}/end");
        let body = json!({
            "ended_at": ended_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "duration_seconds": duration_seconds,
        });

        if use_beacon {
            let bytes = serde_json::to_vec(&body).context("failed to encode end payload")?;
            if self.transport.send_beacon(&path, bytes) {
                return Ok(());
            }
        }

        self.transport.post_json(&path, &body).await.map(|_| ())
    }

    pub async fn post_video_progress(&self, payload: &Value) -> Result<VideoProgressRecord> {
        let value = self.transport.post_json("/video-progress", payload).await?;
        serde_json::from_value(value).context("malformed video progress response")
    }

    pub async fn get_video_progress(
        &self,
        user_id: Option<&str>,
        user_email: Option<&str>,
        video_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<VideoProgressRecord>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(user_id) = user_id {
            query.push(("user_id", user_id.to_string()));
        }
        if let Some(user_email) = user_email {
            query.push(("user_email", user_email.to_string()));
        }
        if let Some(video_id) = video_id {
            query.push(("video_id", video_id.to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let value = self.transport.get_json("/video-progress", &query).await?;
        serde_json::from_value(value).context("malformed video progress list response")
    }

    pub async fn get_score_summary(&self, user_email: Option<&str>) -> Result<ScoreSummary> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(email) = user_email {
            query.push(("user_email", email.to_string()));
        }
        let value = self.transport.get_json("/scores/me", &query).await?;
        serde_json::from_value(value).context("malformed score summary response")
    }

    pub async fn post_score_event(&self, payload: &Value) -> Result<ScoreSummary> {
        let value = self.transport.post_json("/scores/events", payload).await?;
        serde_json::from_value(value).context("malformed score event response")
    }
}
