use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use log::warn;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::config::TelemetryConfig;
use crate::progress::{task_status, FetchVideoProgressOptions, ProgressTracker, VideoProgressRecord};
use crate::store::LocalStore;

const SELECTION_PREFIX: &str = "exploreyou.selection";

/// Top-level study stream choices a `video_id` may refer to directly.
pub const KNOWN_STREAMS: &[&str] = &["consulting", "commerce", "math", "arts"];

/// Navigation shell seam. The engine decides, the shell moves.
pub trait Navigator: Send + Sync {
    /// Replace-navigation to a route within the app.
    fn replace(&self, route: &str);

    /// Re-open a top-level stream's flow.
    fn reopen_stream(&self, stream_id: &str);
}

/// A remembered option choice for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSelection {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Persists the user's last option selection per subject so a resumed
/// task-simulation can carry it forward.
pub struct SelectionStore {
    store: LocalStore,
}

impl SelectionStore {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub async fn save(&self, subject: &str, selection: &OptionSelection) -> Result<()> {
        self.store
            .put_json(&format!("{SELECTION_PREFIX}:{subject}"), selection, None)
            .await
    }

    pub async fn load(&self, subject: &str) -> Option<OptionSelection> {
        match self
            .store
            .get_json::<OptionSelection>(&format!("{SELECTION_PREFIX}:{subject}"))
            .await
        {
            Ok(selection) => selection,
            Err(err) => {
                warn!("Selection read failed for {subject}: {err}");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteDecision {
    NextVideo {
        subject: String,
    },
    TaskSimulation {
        subject: String,
        option: String,
        label: Option<String>,
    },
    NextTasks {
        subject: String,
        option: String,
    },
    ReopenStream {
        stream: String,
    },
}

impl RouteDecision {
    /// Route string for replace-navigation. `ReopenStream` goes through
    /// `Navigator::reopen_stream` instead and has no route here.
    pub fn route(&self) -> Option<String> {
        match self {
            Self::NextVideo { subject } => Some(format!("/next-video/{subject}")),
            Self::TaskSimulation {
                subject,
                option,
                label,
            } => {
                let mut route = format!("/task-simulation/{subject}?option={option}");
                if let Some(label) = label {
                    route.push_str("&label=");
                    route.push_str(&encode_component(label));
                }
                Some(route)
            }
            Self::NextTasks { subject, option } => Some(format!("/next-tasks/{subject}/{option}")),
            Self::ReopenStream { .. } => None,
        }
    }
}

/// Everything but unreserved characters gets percent-encoded in query
/// component values.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, QUERY_COMPONENT).to_string()
}

/// Option key carried in an event name, e.g.
/// `task_option_selected:OptionB` yields `B`.
fn option_from_event_name(event_name: Option<&str>) -> Option<String> {
    let token = event_name?.split(':').nth(1)?;
    let stripped = token.replace("Option", "");
    let trimmed = stripped.trim();
    let first = trimmed.chars().next()?;
    Some(first.to_ascii_uppercase().to_string())
}

/// `next-tasks-{subject}-option-{a|b}` with a case-insensitive option slug.
fn parse_next_tasks(rest: &str) -> Option<(String, String)> {
    let lowered = rest.to_ascii_lowercase();
    for option in ["option-a", "option-b"] {
        let suffix = format!("-{option}");
        if lowered.ends_with(&suffix) {
            let subject_len = rest.len() - suffix.len();
            if subject_len == 0 {
                return None;
            }
            return Some((rest[..subject_len].to_string(), option.to_string()));
        }
    }
    None
}

/// Whether a record still represents an interrupted flow. The threshold is
/// a tunable policy constant: a paused video at 97% is still resumed
/// because its status never reached completed.
pub fn needs_resume(record: &VideoProgressRecord, threshold: f64) -> bool {
    let status = record.task_status.as_deref().unwrap_or("");
    record.progress < threshold || status != task_status::COMPLETED
}

/// Decode a `video_id` against the known id-prefix patterns.
pub fn decode_video_id(
    video_id: &str,
    event_name: Option<&str>,
    stored: Option<&OptionSelection>,
) -> Option<RouteDecision> {
    if let Some(subject) = video_id.strip_prefix("next-video-") {
        if !subject.is_empty() {
            return Some(RouteDecision::NextVideo {
                subject: subject.to_string(),
            });
        }
        return None;
    }

    if let Some(subject) = video_id.strip_prefix("simulation-") {
        if !subject.is_empty() {
            let option = option_from_event_name(event_name)
                .or_else(|| stored.map(|selection| selection.key.clone()))
                .unwrap_or_else(|| "A".to_string());
            return Some(RouteDecision::TaskSimulation {
                subject: subject.to_string(),
                option,
                label: stored.and_then(|selection| selection.label.clone()),
            });
        }
        return None;
    }

    if let Some(rest) = video_id.strip_prefix("next-tasks-") {
        if let Some((subject, option)) = parse_next_tasks(rest) {
            return Some(RouteDecision::NextTasks { subject, option });
        }
        return None;
    }

    if KNOWN_STREAMS.contains(&video_id) {
        return Some(RouteDecision::ReopenStream {
            stream: video_id.to_string(),
        });
    }

    None
}

/// Routes a returning user back into an interrupted flow based on their
/// most recent progress record. Advisory and best-effort: failed or empty
/// fetches leave the user on the landing surface.
pub struct ResumptionRouter {
    progress: Arc<ProgressTracker>,
    selections: SelectionStore,
    navigator: Arc<dyn Navigator>,
    threshold: f64,
    fetch_limit: u32,
    ran: AtomicBool,
}

impl ResumptionRouter {
    pub fn new(
        progress: Arc<ProgressTracker>,
        selections: SelectionStore,
        navigator: Arc<dyn Navigator>,
        config: &TelemetryConfig,
    ) -> Self {
        Self {
            progress,
            selections,
            navigator,
            threshold: config.resume_progress_threshold,
            fetch_limit: config.resume_fetch_limit,
            ran: AtomicBool::new(false),
        }
    }

    /// Inspect the latest progress and navigate at most once per mount.
    pub async fn run_once(&self) {
        if self.ran.swap(true, Ordering::SeqCst) {
            return;
        }

        let records = self
            .progress
            .fetch_video_progress(FetchVideoProgressOptions {
                video_id: None,
                limit: Some(self.fetch_limit),
            })
            .await;
        let Some(latest) = records.first() else {
            return;
        };

        if !needs_resume(latest, self.threshold) {
            return;
        }

        let stored = match latest.video_id.strip_prefix("simulation-") {
            Some(subject) if !subject.is_empty() => self.selections.load(subject).await,
            _ => None,
        };

        match decode_video_id(&latest.video_id, latest.event_name.as_deref(), stored.as_ref()) {
            Some(RouteDecision::ReopenStream { stream }) => {
                self.navigator.reopen_stream(&stream);
            }
            Some(decision) => {
                if let Some(route) = decision.route() {
                    self.navigator.replace(&route);
                }
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::identity::IdentityResolver;
    use crate::testing::{MockAuthProvider, MockNavigator, MockTransport};
    use serde_json::json;

    fn record(video_id: &str, progress: f64, status: &str) -> serde_json::Value {
        json!({
            "id": "vp-1",
            "user_id": "user:abc",
            "video_id": video_id,
            "progress": progress,
            "position_seconds": 10.0,
            "task_status": status,
        })
    }

    fn typed(video_id: &str, progress: f64, status: Option<&str>) -> VideoProgressRecord {
        serde_json::from_value(json!({
            "id": "vp-1",
            "video_id": video_id,
            "progress": progress,
            "position_seconds": 0.0,
            "task_status": status,
        }))
        .unwrap()
    }

    struct Fixture {
        router: ResumptionRouter,
        navigator: Arc<MockNavigator>,
        store: LocalStore,
    }

    fn fixture(transport: Arc<MockTransport>) -> Fixture {
        let store = LocalStore::in_memory().unwrap();
        let identity = Arc::new(IdentityResolver::new(
            Arc::new(MockAuthProvider::with_user("abc", None)),
            store.clone(),
            5 * 60 * 1_000,
        ));
        let progress = Arc::new(ProgressTracker::new(
            ApiClient::new(transport),
            identity,
            store.clone(),
            60_000,
        ));
        let navigator = Arc::new(MockNavigator::new());
        let router = ResumptionRouter::new(
            progress,
            SelectionStore::new(store.clone()),
            navigator.clone(),
            &TelemetryConfig::default(),
        );
        Fixture {
            router,
            navigator,
            store,
        }
    }

    #[test]
    fn incomplete_math_video_routes_to_next_video() {
        let decision = decode_video_id("next-video-math", None, None).unwrap();
        assert_eq!(decision.route().as_deref(), Some("/next-video/math"));
    }

    #[test]
    fn simulation_option_comes_from_event_name() {
        let decision =
            decode_video_id("simulation-math", Some("task_option_selected:OptionB"), None)
                .unwrap();
        assert_eq!(
            decision.route().as_deref(),
            Some("/task-simulation/math?option=B")
        );
    }

    #[test]
    fn simulation_falls_back_to_stored_selection() {
        let stored = OptionSelection {
            key: "C".into(),
            label: Some("Deep Dive".into()),
        };
        let decision = decode_video_id("simulation-arts", None, Some(&stored)).unwrap();
        assert_eq!(
            decision.route().as_deref(),
            Some("/task-simulation/arts?option=C&label=Deep%20Dive")
        );
    }

    #[test]
    fn simulation_defaults_to_option_a() {
        let decision = decode_video_id("simulation-commerce", Some("video_started"), None).unwrap();
        assert_eq!(
            decision.route().as_deref(),
            Some("/task-simulation/commerce?option=A")
        );
    }

    #[test]
    fn next_tasks_parses_case_insensitive_option_slug() {
        let decision = decode_video_id("next-tasks-math-Option-B", None, None).unwrap();
        assert_eq!(decision.route().as_deref(), Some("/next-tasks/math/option-b"));
    }

    #[test]
    fn known_stream_id_reopens_the_stream() {
        let decision = decode_video_id("math", None, None).unwrap();
        assert_eq!(
            decision,
            RouteDecision::ReopenStream {
                stream: "math".into()
            }
        );
    }

    #[test]
    fn unknown_id_decodes_to_nothing() {
        assert!(decode_video_id("mystery-clip", None, None).is_none());
        assert!(decode_video_id("next-video-", None, None).is_none());
        assert!(decode_video_id("next-tasks-option-a", None, None).is_none());
    }

    #[test]
    fn paused_near_complete_record_still_needs_resume() {
        let record = typed("vid", 0.97, Some(task_status::PAUSED));
        assert!(needs_resume(&record, 0.95));

        let completed = typed("vid", 1.0, Some(task_status::COMPLETED));
        assert!(!needs_resume(&completed, 0.95));

        let low_progress_completed = typed("vid", 0.5, Some(task_status::COMPLETED));
        assert!(needs_resume(&low_progress_completed, 0.95));
    }

    #[tokio::test]
    async fn routes_to_next_video_for_incomplete_record() {
        let transport = Arc::new(MockTransport::new());
        transport.set_get_response(
            "/video-progress",
            json!([record("next-video-math", 0.3, task_status::IN_PROGRESS)]),
        );
        let fixture = fixture(transport);

        fixture.router.run_once().await;
        assert_eq!(fixture.navigator.replaced(), vec!["/next-video/math"]);
    }

    #[tokio::test]
    async fn completed_records_navigate_nowhere() {
        let transport = Arc::new(MockTransport::new());
        transport.set_get_response(
            "/video-progress",
            json!([
                record("next-video-math", 1.0, task_status::COMPLETED),
                record("simulation-arts", 1.0, task_status::COMPLETED),
            ]),
        );
        let fixture = fixture(transport);

        fixture.router.run_once().await;
        assert!(fixture.navigator.replaced().is_empty());
        assert!(fixture.navigator.reopened().is_empty());
    }

    #[tokio::test]
    async fn runs_at_most_once() {
        let transport = Arc::new(MockTransport::new());
        transport.set_get_response(
            "/video-progress",
            json!([record("next-video-math", 0.3, task_status::IN_PROGRESS)]),
        );
        let fixture = fixture(transport);

        fixture.router.run_once().await;
        fixture.router.run_once().await;
        assert_eq!(fixture.navigator.replaced().len(), 1);
    }

    #[tokio::test]
    async fn empty_or_failed_fetch_is_swallowed() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_path("/video-progress");
        let fixture = fixture(transport);

        fixture.router.run_once().await;
        assert!(fixture.navigator.replaced().is_empty());
    }

    #[tokio::test]
    async fn stream_record_reopens_the_stream() {
        let transport = Arc::new(MockTransport::new());
        transport.set_get_response(
            "/video-progress",
            json!([record("consulting", 0.2, task_status::IN_PROGRESS)]),
        );
        let fixture = fixture(transport);

        fixture.router.run_once().await;
        assert_eq!(fixture.navigator.reopened(), vec!["consulting"]);
    }

    #[tokio::test]
    async fn resumed_simulation_carries_remembered_selection() {
        let transport = Arc::new(MockTransport::new());
        transport.set_get_response(
            "/video-progress",
            json!([record("simulation-math", 0.4, task_status::IN_PROGRESS)]),
        );
        let fixture = fixture(transport);
        SelectionStore::new(fixture.store.clone())
            .save(
                "math",
                &OptionSelection {
                    key: "B".into(),
                    label: Some("How to Play".into()),
                },
            )
            .await
            .unwrap();

        fixture.router.run_once().await;
        assert_eq!(
            fixture.navigator.replaced(),
            vec!["/task-simulation/math?option=B&label=How%20to%20Play"]
        );
    }
}
