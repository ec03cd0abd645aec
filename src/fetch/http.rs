use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::Client;
use tracing::instrument;

use super::{FetchError, PageBackend, RawResponse, DEFAULT_HEADERS};

/// Plain HTTP client backend.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for &(name, value) in DEFAULT_HEADERS {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {name}"))?;
            headers.insert(name, HeaderValue::from_static(value));
        }
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).context("invalid user agent header")?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("build reqwest client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(level = "debug", skip(self))]
    async fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok(RawResponse { status, body })
    }
}
