//! Client-resident telemetry and playback-resumption engine for the
//! ExploreYou learning app: page session lifecycle, cursor dwell tracking,
//! batched event delivery, cached progress/score/identity, signed video
//! URLs, and one-shot resumption routing.

mod api;
mod config;
mod cursor;
mod identity;
mod progress;
mod resume;
mod score;
mod session;
mod store;
#[cfg(test)]
mod testing;
mod video_url;

use std::{path::Path, sync::Arc};

use anyhow::Result;

pub use api::{ApiClient, HttpTransport, Transport};
pub use config::TelemetryConfig;
pub use cursor::{
    CursorDwellTracker, CursorDwellUpdate, CursorTargetConfig, CursorTargetDefinition,
    PathMatcher, DEFAULT_SOURCE_KEY,
};
pub use identity::{AuthProfile, AuthProvider, AuthUser, IdentityResolver, UserIdentity};
pub use progress::{
    FetchVideoProgressOptions, ProgressTracker, RecordVideoProgressOptions, VideoProgressRecord,
};
pub use resume::{
    Navigator, OptionSelection, ResumptionRouter, RouteDecision, SelectionStore, KNOWN_STREAMS,
};
pub use score::{ScoreEventOptions, ScoreSummary, ScoreTracker};
pub use session::{EventQueue, PageSessionManager, QueuedEvent};
pub use store::LocalStore;
pub use video_url::{ObjectStore, VideoUrlResolver};

/// Initialize logging (reads RUST_LOG env var).
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}

/// Everything the engine needs, wired once at startup. External
/// collaborators (network, auth, object store, navigation shell) come in
/// through their seam traits; no module reaches for ambient globals.
pub struct TelemetryContext {
    pub config: TelemetryConfig,
    pub store: LocalStore,
    pub identity: Arc<IdentityResolver>,
    pub sessions: PageSessionManager,
    pub progress: Arc<ProgressTracker>,
    pub scores: ScoreTracker,
    pub video_urls: VideoUrlResolver,
    pub selections: SelectionStore,
    pub resume: ResumptionRouter,
}

impl TelemetryContext {
    pub fn new(
        config: TelemetryConfig,
        store: LocalStore,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        objects: Arc<dyn ObjectStore>,
        navigator: Arc<dyn Navigator>,
        targets: CursorTargetConfig,
    ) -> Self {
        let api = ApiClient::new(transport);
        let identity = Arc::new(IdentityResolver::new(
            auth,
            store.clone(),
            config.identity_cache_ttl_ms,
        ));
        let sessions = PageSessionManager::new(api.clone(), &config, targets);
        let progress = Arc::new(ProgressTracker::new(
            api.clone(),
            identity.clone(),
            store.clone(),
            config.progress_cache_ttl_ms,
        ));
        let scores = ScoreTracker::new(
            api,
            identity.clone(),
            store.clone(),
            config.score_cache_ttl_ms,
        );
        let video_urls = VideoUrlResolver::new(
            objects,
            store.clone(),
            config.signed_url_ttl_seconds,
            config.signed_url_buffer_seconds,
        );
        let resume = ResumptionRouter::new(
            progress.clone(),
            SelectionStore::new(store.clone()),
            navigator,
            &config,
        );
        let selections = SelectionStore::new(store.clone());

        Self {
            config,
            store,
            identity,
            sessions,
            progress,
            scores,
            video_urls,
            selections,
            resume,
        }
    }

    /// Open the engine against a data directory: config from
    /// `telemetry.json` (defaults when absent), local cache in
    /// `exploreyou.sqlite3`, HTTP transport from the configured base URL.
    pub fn open(
        data_dir: &Path,
        auth: Arc<dyn AuthProvider>,
        objects: Arc<dyn ObjectStore>,
        navigator: Arc<dyn Navigator>,
        targets: CursorTargetConfig,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let config = TelemetryConfig::load_or_default(&data_dir.join("telemetry.json"))?;
        let store = LocalStore::open(data_dir.join("exploreyou.sqlite3"))?;
        let transport = Arc::new(HttpTransport::new(config.base_url.clone()));
        Ok(Self::new(
            config, store, transport, auth, objects, navigator, targets,
        ))
    }

    /// Start the periodic flush loop.
    pub async fn attach(&self) {
        self.sessions.attach().await;
    }

    /// Stop the flush loop and end any open session.
    pub async fn detach(&self) {
        self.sessions.detach().await;
    }

    /// One-shot resumption check, run when the landing surface mounts.
    pub async fn resume_if_needed(&self) {
        self.resume.run_once().await;
    }
}
