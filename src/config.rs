//! Runtime settings gathered from the environment, overridable from the CLI.
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::util::env::{db_url, env_opt, env_parse};

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_EVENT_BATCH_SIZE: usize = 1000;

pub const DEFAULT_SITE_ROOT: &str = "https://www.whoscored.com";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0";

/// Which fetch backend serves page requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Http,
    Browser,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "reqwest" => Ok(Self::Http),
            "browser" | "chromium" => Ok(Self::Browser),
            other => Err(format!("unknown fetch backend '{other}' (expected http|browser)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_uri: String,
    pub db_max_connections: u32,
    pub matches_dir: PathBuf,
    pub backend: BackendKind,
    pub concurrency: usize,
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub event_batch_size: usize,
    pub user_agent: String,
    /// Scheme and host used for the front page, livescores and region tournament paths.
    pub site_root: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_uri: crate::util::env::DEFAULT_DATABASE_URI.to_string(),
            db_max_connections: 5,
            matches_dir: PathBuf::from("matches"),
            backend: BackendKind::Http,
            concurrency: DEFAULT_CONCURRENCY,
            retry_limit: DEFAULT_RETRY_LIMIT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            request_timeout: Duration::from_secs(30),
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            site_root: DEFAULT_SITE_ROOT.to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let backend = env_opt("SCRAPER_BACKEND")
            .and_then(|raw| match raw.parse::<BackendKind>() {
                Ok(kind) => Some(kind),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring SCRAPER_BACKEND");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            database_uri: db_url(),
            db_max_connections: env_parse("DB_MAX_CONNS", 5u32).max(1),
            matches_dir: env_opt("MATCHES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("matches")),
            backend,
            concurrency: env_parse("SCRAPER_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
            retry_limit: env_parse("SCRAPER_RETRY_LIMIT", DEFAULT_RETRY_LIMIT).max(1),
            retry_delay: Duration::from_millis(env_parse(
                "SCRAPER_RETRY_DELAY_MS",
                DEFAULT_RETRY_DELAY_MS,
            )),
            request_timeout: Duration::from_secs(env_parse("SCRAPER_TIMEOUT_SECS", 30u64)),
            event_batch_size: env_parse("EVENT_BATCH_SIZE", DEFAULT_EVENT_BATCH_SIZE).max(1),
            user_agent: env_opt("SCRAPER_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            site_root: env_opt("SCRAPER_SITE_ROOT")
                .map(|root| root.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_SITE_ROOT.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("HTTP".parse::<BackendKind>(), Ok(BackendKind::Http));
        assert_eq!(" chromium ".parse::<BackendKind>(), Ok(BackendKind::Browser));
        assert!("curl".parse::<BackendKind>().is_err());
    }

    #[test]
    fn defaults_match_pipeline_limits() {
        let s = Settings::default();
        assert_eq!(s.concurrency, 5);
        assert_eq!(s.retry_limit, 3);
        assert_eq!(s.retry_delay, Duration::from_secs(1));
        assert_eq!(s.event_batch_size, 1000);
    }
}
