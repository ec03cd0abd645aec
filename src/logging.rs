//! Subscriber setup for the `match-harvest` binary.
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Crawl progress at `info`; sqlx statement logging is only interesting on failure.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
