use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Tunable policy knobs for the telemetry engine.
///
/// Every field has a sensible default; a missing or partial config file
/// falls back to those defaults rather than failing startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Base URL for the telemetry API, without a trailing slash.
    pub base_url: String,
    /// Interval of the periodic flush loop, in milliseconds.
    pub flush_interval_ms: u64,
    /// Minimum accrued dwell before a non-forced flush emits an update.
    pub min_cursor_batch_ms: u64,
    pub identity_cache_ttl_ms: i64,
    pub progress_cache_ttl_ms: i64,
    pub score_cache_ttl_ms: i64,
    pub signed_url_ttl_seconds: u64,
    /// Safety margin subtracted from a signed URL's TTL before caching it,
    /// so cached URLs are never served right at expiry.
    pub signed_url_buffer_seconds: u64,
    /// A record with progress below this (or a non-completed status) still
    /// needs resume. Policy constant, not a contract; see ResumptionRouter.
    pub resume_progress_threshold: f64,
    pub resume_fetch_limit: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".into(),
            flush_interval_ms: 2_000,
            min_cursor_batch_ms: 250,
            identity_cache_ttl_ms: 5 * 60 * 1_000,
            progress_cache_ttl_ms: 60_000,
            score_cache_ttl_ms: 60_000,
            signed_url_ttl_seconds: 3_600,
            signed_url_buffer_seconds: 60,
            resume_progress_threshold: 0.95,
            resume_fetch_limit: 5,
        }
    }
}

impl TelemetryConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// absent or unreadable as config.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Ok(serde_json::from_str(&contents).unwrap_or_default())
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}
