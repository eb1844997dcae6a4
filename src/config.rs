use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::ai::RetryPolicy;

/// Application-level constants
pub const APP_NAME: &str = "discovery-pipeline";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_CHUNK_SIZE: usize = 5;
/// Upper bound on concurrent outbound calls, whatever the environment asks for.
pub const MAX_WORKERS: usize = 5;
pub const DEFAULT_PIPELINE_RUNNERS: usize = 2;
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_JOB_TTL_SECS: u64 = 3600;
/// Below this many trimmed characters a document is treated as having no text layer.
pub const DEFAULT_MIN_TEXT_CHARS: usize = 50;
pub const DEFAULT_METADATA_PAGES: usize = 1;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_PRESET_ID: &str = "default";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,discovery_pipeline=debug"
}

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// `None` runs everything on the local heuristic backend.
    pub api_key: Option<String>,
    pub model: String,
    pub api_base_url: String,
    pub chunk_size: usize,
    pub max_workers: usize,
    pub pipeline_runners: usize,
    pub chunk_timeout: Duration,
    pub job_ttl: Duration,
    pub min_text_chars: usize,
    pub metadata_pages: usize,
    pub presets_folder: Option<PathBuf>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Use the local pattern parser when remote record extraction fails.
    pub local_parser_fallback: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: MAX_WORKERS,
            pipeline_runners: DEFAULT_PIPELINE_RUNNERS,
            chunk_timeout: Duration::from_secs(DEFAULT_CHUNK_TIMEOUT_SECS),
            job_ttl: Duration::from_secs(DEFAULT_JOB_TTL_SECS),
            min_text_chars: DEFAULT_MIN_TEXT_CHARS,
            metadata_pages: DEFAULT_METADATA_PAGES,
            presets_folder: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            local_parser_fallback: true,
        }
    }
}

impl PipelineSettings {
    /// Build settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Unparseable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let retry = RetryPolicy {
            max_retries: parse_or(&get, "RETRY_MAX", defaults.retry.max_retries),
            base_delay: Duration::from_millis(parse_or(
                &get,
                "RETRY_BASE_DELAY_MS",
                defaults.retry.base_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(parse_or(
                &get,
                "RETRY_MAX_DELAY_MS",
                defaults.retry.max_delay.as_millis() as u64,
            )),
            ..defaults.retry
        };

        Self {
            api_key: get("ANTHROPIC_API_KEY"),
            model: get("CLAUDE_MODEL").unwrap_or(defaults.model),
            api_base_url: get("ANTHROPIC_BASE_URL").unwrap_or(defaults.api_base_url),
            chunk_size: parse_or(&get, "ANALYSIS_CHUNK_SIZE", defaults.chunk_size).max(1),
            max_workers: parse_or(&get, "MAX_WORKERS", defaults.max_workers).clamp(1, MAX_WORKERS),
            pipeline_runners: parse_or(&get, "PIPELINE_RUNNERS", defaults.pipeline_runners).max(1),
            chunk_timeout: Duration::from_secs(parse_or(
                &get,
                "CHUNK_TIMEOUT_SECS",
                defaults.chunk_timeout.as_secs(),
            )),
            job_ttl: Duration::from_secs(parse_or(&get, "JOB_TTL_SECS", defaults.job_ttl.as_secs())),
            min_text_chars: parse_or(&get, "MIN_TEXT_CHARS", defaults.min_text_chars),
            metadata_pages: parse_or(&get, "METADATA_PAGES", defaults.metadata_pages).max(1),
            presets_folder: get("PRESETS_FOLDER").map(PathBuf::from),
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            retry,
            local_parser_fallback: parse_or(&get, "LOCAL_PARSER_FALLBACK", defaults.local_parser_fallback),
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid setting, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> PipelineSettings {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        PipelineSettings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let s = settings(&[]);
        assert!(s.api_key.is_none());
        assert_eq!(s.model, DEFAULT_MODEL);
        assert_eq!(s.chunk_size, 5);
        assert_eq!(s.max_workers, 5);
        assert_eq!(s.chunk_timeout, Duration::from_secs(120));
        assert_eq!(s.job_ttl, Duration::from_secs(3600));
        assert_eq!(s.min_text_chars, 50);
        assert_eq!(s.retry.max_retries, 3);
        assert_eq!(s.retry.base_delay, Duration::from_secs(1));
        assert_eq!(s.retry.max_delay, Duration::from_secs(30));
        assert!(s.local_parser_fallback);
    }

    #[test]
    fn values_are_read_from_lookup() {
        let s = settings(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("CLAUDE_MODEL", "claude-other"),
            ("ANALYSIS_CHUNK_SIZE", "8"),
            ("RETRY_MAX", "0"),
            ("PRESETS_FOLDER", "/tmp/presets"),
            ("LOCAL_PARSER_FALLBACK", "false"),
        ]);
        assert_eq!(s.api_key.as_deref(), Some("sk-test"));
        assert_eq!(s.model, "claude-other");
        assert_eq!(s.chunk_size, 8);
        assert_eq!(s.retry.max_retries, 0);
        assert_eq!(s.presets_folder, Some(PathBuf::from("/tmp/presets")));
        assert!(!s.local_parser_fallback);
    }

    #[test]
    fn max_workers_is_clamped() {
        assert_eq!(settings(&[("MAX_WORKERS", "50")]).max_workers, MAX_WORKERS);
        assert_eq!(settings(&[("MAX_WORKERS", "0")]).max_workers, 1);
        assert_eq!(settings(&[("MAX_WORKERS", "3")]).max_workers, 3);
    }

    #[test]
    fn invalid_values_fall_back_to_default() {
        let s = settings(&[("ANALYSIS_CHUNK_SIZE", "five"), ("JOB_TTL_SECS", "-1")]);
        assert_eq!(s.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(s.job_ttl, Duration::from_secs(DEFAULT_JOB_TTL_SECS));
    }

    #[test]
    fn blank_api_key_is_treated_as_absent() {
        assert!(settings(&[("ANTHROPIC_API_KEY", "  ")]).api_key.is_none());
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }
}
