//! Chromium-backed renderer

use super::{filter_by_extension, RenderError, Renderer};
use crate::config::RenderConfig;
use crate::crawler::{HtmlExtractor, LinkExtractor};
use crate::url::resolve_link;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

/// Settle time after the load event for late XHR-driven content
const SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Collects candidate file URLs from attributes scripts commonly use
const DOWNLOAD_TRIGGER_SCRIPT: &str = r#"
    (() => {
        const found = [];
        const attrs = ['href', 'src', 'data-href', 'data-url', 'data-link', 'data-download', 'data-file'];
        for (const el of document.querySelectorAll('*')) {
            for (const attr of attrs) {
                const value = el.getAttribute(attr);
                if (value) found.push(value);
            }
            const onclick = el.getAttribute('onclick');
            if (onclick) {
                const match = onclick.match(/['"]([^'"]+\.[A-Za-z0-9]{2,5})['"]/);
                if (match) found.push(match[1]);
            }
        }
        return found;
    })()
"#;

/// Renders pages in a headless (or headed) Chromium
pub struct ChromiumRenderer {
    timeout: Duration,
    headless: bool,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Option<Page>,
    current_url: Option<Url>,
}

impl ChromiumRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            timeout: config.timeout(),
            headless: config.headless,
            browser: None,
            handler: None,
            page: None,
            current_url: None,
        }
    }

    fn page(&self) -> Result<&Page, RenderError> {
        self.page.as_ref().ok_or(RenderError::NotStarted)
    }

    async fn content(&self) -> Result<String, RenderError> {
        let page = self.page()?;
        match tokio::time::timeout(self.timeout, page.content()).await {
            Ok(Ok(html)) => Ok(html),
            Ok(Err(e)) => Err(RenderError::Script(e.to_string())),
            Err(_) => Err(RenderError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn start(&mut self, proxy: Option<&str>) -> Result<(), RenderError> {
        if self.browser.is_some() {
            return Ok(());
        }

        tracing::info!("Launching browser (headless={})", self.headless);

        let mut builder = BrowserConfig::builder();
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        let config = builder.build().map_err(RenderError::Launch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        self.browser = Some(browser);
        self.handler = Some(handler_task);
        self.page = Some(page);
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        let page = self.page()?;
        let navigation_error = |message: String| RenderError::Navigation {
            url: url.to_string(),
            message,
        };

        let load = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };

        match tokio::time::timeout(self.timeout, load).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(navigation_error(e.to_string())),
            Err(_) => return Err(RenderError::Timeout(self.timeout)),
        }

        tokio::time::sleep(SETTLE_DELAY).await;

        let current = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|u| Url::parse(&u).ok());
        self.current_url = current.or_else(|| Url::parse(url).ok());
        tracing::debug!("Rendered {}", url);
        Ok(())
    }

    async fn extract_links(&mut self, base_url: &Url) -> Result<BTreeSet<Url>, RenderError> {
        let html = self.content().await?;
        let base = self.current_url.as_ref().unwrap_or(base_url);
        Ok(HtmlExtractor.extract_links(&html, base))
    }

    async fn find_download_triggers(
        &mut self,
        extensions: &[String],
    ) -> Result<Vec<Url>, RenderError> {
        let page = self.page()?;
        let base = self.current_url.clone().ok_or(RenderError::NotStarted)?;

        let values: Vec<String> = page
            .evaluate(DOWNLOAD_TRIGGER_SCRIPT)
            .await
            .map_err(|e| RenderError::Script(e.to_string()))?
            .into_value()
            .map_err(|e| RenderError::Script(e.to_string()))?;

        let candidates = values
            .iter()
            .filter_map(|value| resolve_link(&base, value));
        Ok(filter_by_extension(candidates, extensions))
    }

    async fn stop(&mut self) {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                tracing::debug!("Error closing browser: {}", e);
            }
            let _ = browser.wait().await;
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        self.current_url = None;
    }

    fn is_started(&self) -> bool {
        self.browser.is_some()
    }
}
