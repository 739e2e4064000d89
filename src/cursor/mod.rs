use serde::{Deserialize, Serialize};

mod tracker;

pub use tracker::CursorDwellTracker;

/// Reserved source key for targets derived from the current page path.
pub const DEFAULT_SOURCE_KEY: &str = "__default__";

/// A circular region-of-interest tracked for dwell and entry statistics.
///
/// Ids are unique within a source; the effective target set is the union of
/// all sources' definitions keyed by id, with a later source winning an id
/// collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorTargetDefinition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CursorTargetDefinition {
    /// Geometry/label identity used by reconciliation: a change here
    /// finalizes in-flight dwell, a metadata-only change does not.
    fn shape_matches(&self, other: &Self) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.radius == other.radius
            && self.label == other.label
    }
}

/// One flushed batch of dwell statistics for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorDwellUpdate {
    pub target_key: String,
    pub duration_ms: u64,
    pub entry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub center_x: i64,
    pub center_y: i64,
    pub radius: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Matcher for path-keyed default target configuration.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    Prefix(String),
    Predicate(fn(&str) -> bool),
}

impl PathMatcher {
    /// Build a matcher from a pattern string; a trailing `*` means prefix.
    pub fn pattern(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Predicate(predicate) => predicate(path),
        }
    }
}

/// Static table of default cursor targets per page path. The session
/// manager feeds the first matching entry's targets in under
/// [`DEFAULT_SOURCE_KEY`] on every route change.
#[derive(Debug, Clone, Default)]
pub struct CursorTargetConfig {
    entries: Vec<(PathMatcher, Vec<CursorTargetDefinition>)>,
}

impl CursorTargetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, matcher: PathMatcher, targets: Vec<CursorTargetDefinition>) {
        self.entries.push((matcher, targets));
    }

    pub fn targets_for_path(&self, path: &str) -> Vec<CursorTargetDefinition> {
        for (matcher, targets) in &self.entries {
            if matcher.matches(path) {
                return targets.clone();
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str) -> CursorTargetDefinition {
        CursorTargetDefinition {
            id: id.into(),
            x: 100.0,
            y: 100.0,
            radius: 50.0,
            label: None,
            metadata: None,
        }
    }

    #[test]
    fn exact_matcher_requires_full_path() {
        let matcher = PathMatcher::pattern("/score");
        assert!(matcher.matches("/score"));
        assert!(!matcher.matches("/score/details"));
    }

    #[test]
    fn star_suffix_builds_prefix_matcher() {
        let matcher = PathMatcher::pattern("/video-player/*");
        assert!(matcher.matches("/video-player/math"));
        assert!(!matcher.matches("/score"));
    }

    #[test]
    fn first_matching_entry_wins() {
        let mut config = CursorTargetConfig::new();
        config.register(PathMatcher::pattern("/score*"), vec![target("chart")]);
        config.register(PathMatcher::pattern("/score/details"), vec![target("rows")]);

        let targets = config.targets_for_path("/score/details");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, "chart");
    }

    #[test]
    fn unmatched_path_yields_no_targets() {
        let config = CursorTargetConfig::new();
        assert!(config.targets_for_path("/anywhere").is_empty());
    }
}
