//! Headless Chromium backend, for pages that only render behind a real browser.
use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, Headers, SetExtraHttpHeadersParams,
};
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{FetchError, PageBackend, RawResponse, DEFAULT_HEADERS};

pub struct BrowserBackend {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserBackend {
    pub async fn launch(user_agent: &str) -> anyhow::Result<Self> {
        let config = BrowserConfig::builder()
            .arg(format!("--user-agent={user_agent}"))
            .arg("--disable-gpu")
            .build()
            .map_err(anyhow::Error::msg)?;
        let (browser, mut events) = Browser::launch(config).await?;

        // The CDP connection only makes progress while its event stream is polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    warn!(error = %e, "browser handler stopped");
                    break;
                }
            }
        });
        debug!("headless browser launched");
        Ok(Self { browser, handler })
    }
}

/// `DEFAULT_HEADERS` as the header object the DevTools protocol expects.
fn extra_headers() -> Headers {
    let map: Map<String, Value> = DEFAULT_HEADERS
        .iter()
        .map(|&(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect();
    Headers::new(Value::Object(map))
}

impl Drop for BrowserBackend {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl PageBackend for BrowserBackend {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Browser(e.to_string()))?;

        let rendered = async {
            page.execute(EnableParams::default()).await?;
            page.execute(SetExtraHttpHeadersParams::new(extra_headers())).await?;
            page.goto(url).await?;
            page.content().await
        }
        .await;

        // Pages have no Drop cleanup; close explicitly whatever the outcome.
        if let Err(e) = page.close().await {
            debug!(url = %url, error = %e, "page close failed");
        }

        let html = rendered.map_err(|e| FetchError::Browser(e.to_string()))?;
        // The DevTools protocol does not surface the document status here.
        Ok(RawResponse {
            status: 200,
            body: Bytes::from(html),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_headers_match_the_http_profile() {
        let headers = serde_json::to_value(extra_headers()).unwrap();
        assert_eq!(headers["Referer"], "https://www.google.com/");
        assert_eq!(headers.as_object().unwrap().len(), DEFAULT_HEADERS.len());
    }
}
