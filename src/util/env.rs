//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use tracing::warn;

static INIT: Once = Once::new();

/// Fallback store when `DATABASE_URI` is unset: a SQLite file next to the binary's cwd.
pub const DEFAULT_DATABASE_URI: &str = "sqlite://matches.db?mode=rwc";

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback. Unparsable values are logged and ignored.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone + std::fmt::Debug,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    env_key = key,
                    raw_value = %raw,
                    fallback = ?default,
                    "invalid env value; using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Relational store connection string (`DATABASE_URI`), defaulting to a local SQLite file.
pub fn db_url() -> String {
    env_opt("DATABASE_URI").unwrap_or_else(|| DEFAULT_DATABASE_URI.to_string())
}

/// Strip credentials from a connection string before it reaches the logs.
pub fn redact_db_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(mut u) if !u.username().is_empty() || u.password().is_some() => {
            let _ = u.set_username("***");
            let _ = u.set_password(Some("***"));
            u.to_string()
        }
        _ => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credentials_only_when_present() {
        assert_eq!(
            redact_db_url("postgres://user:secret@db:5432/x"),
            "postgres://***:***@db:5432/x"
        );
        assert_eq!(redact_db_url(DEFAULT_DATABASE_URI), DEFAULT_DATABASE_URI);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("MATCH_HARVEST_TEST_PARSE", "not-a-number");
        assert_eq!(env_parse("MATCH_HARVEST_TEST_PARSE", 7u32), 7);
        std::env::set_var("MATCH_HARVEST_TEST_PARSE", " 12 ");
        assert_eq!(env_parse("MATCH_HARVEST_TEST_PARSE", 7u32), 12);
        std::env::remove_var("MATCH_HARVEST_TEST_PARSE");
    }
}
