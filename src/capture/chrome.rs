use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, RequestId,
};
use chromiumoxide::Page;
use futures_util::{FutureExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{CapturedExchange, CapturedPage, CapturedResponse, NetworkCapture};
use crate::config::BrowserConfig;
use crate::Result;

/// Network capture backed by a headless Chrome over the DevTools protocol
pub struct ChromeCapture {
    config: BrowserConfig,
}

impl ChromeCapture {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl NetworkCapture for ChromeCapture {
    async fn capture(&self, url: &str) -> Result<CapturedPage> {
        tracing::info!("Getting book requests. Please wait...");

        let session = BrowserSession::launch(&self.config).await?;
        let outcome = session.capture(url, &self.config).await;
        session.close().await;

        outcome
    }

    fn backend_name(&self) -> &'static str {
        "Chrome DevTools"
    }
}

/// A running browser plus the task pumping its protocol connection.
///
/// `close` shuts the browser down; dropping the session without closing it still stops
/// the handler task so the connection does not outlive the capture.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(config: &BrowserConfig) -> Result<Self> {
        let mut builder = ChromeConfig::builder()
            .request_timeout(Duration::from_secs(config.navigation_timeout_secs));

        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(executable) = &config.chrome_executable {
            builder = builder.chrome_executable(executable);
        }
        for arg in &config.extra_args {
            builder = builder.arg(arg.as_str());
        }

        let chrome_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid browser configuration: {}", e))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .context("Failed to launch Chrome")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self { browser, handler })
    }

    async fn capture(&self, url: &str, config: &BrowserConfig) -> Result<CapturedPage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser tab")?;
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable network tracking")?;

        let mut requests = page.event_listener::<EventRequestWillBeSent>().await?;
        let mut responses = page.event_listener::<EventResponseReceived>().await?;
        let mut finished = page.event_listener::<EventLoadingFinished>().await?;

        let navigation = tokio::time::timeout(
            Duration::from_secs(config.navigation_timeout_secs),
            page.goto(url),
        )
        .await
        .with_context(|| format!("Timed out loading {}", url))?;
        navigation.with_context(|| format!("Failed to load {}", url))?;

        // Late XHRs (the book data request among them) fire after the load event.
        tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;

        let mut exchanges: Vec<(String, CapturedExchange)> = Vec::new();
        let mut latest: HashMap<String, usize> = HashMap::new();
        while let Some(Some(event)) = requests.next().now_or_never() {
            let id = event.request_id.inner().clone();
            latest.insert(id.clone(), exchanges.len());
            exchanges.push((
                id,
                CapturedExchange::new(&event.request.method, &event.request.url),
            ));
        }

        while let Some(Some(event)) = responses.next().now_or_never() {
            if let Some(&index) = latest.get(event.request_id.inner()) {
                exchanges[index].1.response = Some(CapturedResponse {
                    status: u16::try_from(event.response.status).unwrap_or_default(),
                    // The protocol hands out bodies with the transfer encoding removed.
                    content_encoding: None,
                    body: None,
                });
            }
        }

        let mut loaded = HashSet::new();
        while let Some(Some(event)) = finished.next().now_or_never() {
            loaded.insert(event.request_id.inner().clone());
        }

        for (id, exchange) in exchanges.iter_mut() {
            if exchange.method != "POST" || !loaded.contains(id.as_str()) {
                continue;
            }
            if let Some(response) = exchange.response.as_mut() {
                match fetch_body(&page, id).await {
                    Ok(body) => response.body = Some(body),
                    Err(e) => tracing::debug!("No body for {}: {}", exchange.url, e),
                }
            }
        }

        let html = page.content().await.context("Failed to read page HTML")?;
        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close tab: {}", e);
        }

        tracing::debug!("Captured {} exchanges from {}", exchanges.len(), url);

        Ok(CapturedPage {
            url: url.to_string(),
            exchanges: exchanges.into_iter().map(|(_, exchange)| exchange).collect(),
            html,
        })
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            tracing::debug!("Failed waiting for browser exit: {}", e);
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

async fn fetch_body(page: &Page, request_id: &str) -> Result<Vec<u8>> {
    let response = page
        .execute(GetResponseBodyParams::new(RequestId::new(request_id)))
        .await?;

    let body = if response.result.base64_encoded {
        base64::engine::general_purpose::STANDARD
            .decode(response.result.body.as_bytes())
            .context("Response body is not valid base64")?
    } else {
        response.result.body.clone().into_bytes()
    };

    Ok(body)
}
